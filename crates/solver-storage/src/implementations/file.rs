//! File-based storage backend.
//!
//! Each key is stored as one `.bin` file under a base directory. Writes go to
//! a temporary file that is synced and then renamed over the target, so a
//! reader never observes a partially written value.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use solver_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const EXTENSION: &str = "bin";

pub struct FileStorage {
	base_path: PathBuf,
	/// Distinguishes temp files of concurrent writers.
	write_seq: AtomicU64,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_seq: AtomicU64::new(0),
		}
	}

	pub fn base_path(&self) -> &Path {
		&self.base_path
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", encode_key(key), EXTENSION))
	}

	async fn sync_dir(&self) {
		// Directories cannot be opened for sync on every platform.
		if let Ok(dir) = fs::File::open(&self.base_path).await {
			let _ = dir.sync_all().await;
		}
	}
}

/// Escapes every byte outside `[A-Za-z0-9._-]` as `%XX`, keeping file names
/// filesystem-safe and reversible.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for b in key.bytes() {
		if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && !out.is_empty()) {
			out.push(b as char);
		} else {
			out.push_str(&format!("%{:02X}", b));
		}
	}
	out
}

fn decode_key(name: &str) -> Option<String> {
	let bytes = name.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let hex = name.get(i + 1..i + 3)?;
			out.push(u8::from_str_radix(hex, 16).ok()?);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8(out).ok()
}

fn backend_err(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

#[async_trait]
impl StorageInterface for FileStorage {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		match fs::read(self.get_file_path(key)).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_err)?;

		let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
		let temp_path = self
			.base_path
			.join(format!(".{}.{}.tmp", encode_key(key), seq));

		let mut file = fs::File::create(&temp_path).await.map_err(backend_err)?;
		file.write_all(&value).await.map_err(backend_err)?;
		file.sync_all().await.map_err(backend_err)?;
		drop(file);

		if let Err(e) = fs::rename(&temp_path, &path).await {
			let _ = fs::remove_file(&temp_path).await;
			return Err(backend_err(e));
		}
		self.sync_dir().await;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(backend_err)
	}

	async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_err(e)),
		};

		let mut out = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
				continue;
			}
			let Some(key) = path
				.file_stem()
				.and_then(|s| s.to_str())
				.and_then(decode_key)
			else {
				tracing::warn!(path = %path.display(), "Skipping unrecognized storage file");
				continue;
			};
			if !key.starts_with(prefix) {
				continue;
			}
			match fs::read(&path).await {
				Ok(data) => out.push((key, data)),
				// Deleted between listing and reading.
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
				Err(e) => return Err(backend_err(e)),
			}
		}
		Ok(out)
	}
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String)
				.with_validator(|value| match value.as_str() {
					Some(path) if !path.trim().is_empty() => Ok(()),
					_ => Err("storage_path must not be empty".to_string()),
				})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}
