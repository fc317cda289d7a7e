//! Storage module for the solver system.
//!
//! This module provides abstractions for persistent storage of solver data:
//! a byte-oriented [`StorageInterface`] implemented by each backend, a typed
//! [`StorageService`] over it, and the two domain stores built on top,
//! [`CheckpointStore`] for scan progress and processed orders and
//! [`IntentStore`] for intent records.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use solver_types::ConfigSchema;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

mod checkpoint;
mod intents;
mod locks;

pub use checkpoint::CheckpointStore;
pub use intents::IntentStore;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level key-value interface implemented by storage backends.
///
/// Keys are `namespace:id` strings. A successful `set_bytes` must survive a
/// process restart for any backend used outside of tests.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, replacing any previous value atomically.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value for `key`. Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Returns every `(key, value)` pair whose key starts with `prefix`.
	async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

/// High-level storage service that provides typed operations.
///
/// Values are serialized as JSON and stored under `namespace:id`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve), mapping `NotFound` to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Retrieves every value in `namespace` whose id starts with `id_prefix`.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = Self::key(namespace, id_prefix);
		let strip = namespace.len() + 1;
		let entries = self.backend.list_prefix(&prefix).await?;

		entries
			.into_iter()
			.map(|(key, bytes)| {
				let value = serde_json::from_slice(&bytes)
					.map_err(|e| StorageError::Serialization(format!("{}: {}", key, e)))?;
				Ok((key[strip..].to_string(), value))
			})
			.collect()
	}
}
