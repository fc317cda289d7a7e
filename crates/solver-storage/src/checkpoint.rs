//! Durable scan progress and processed-order membership.

use crate::locks::KeyLocks;
use crate::{StorageError, StorageService};
use serde::{Deserialize, Serialize};
use solver_types::{current_timestamp, OrderId};
use std::sync::Arc;

const CHECKPOINTS: &str = "checkpoints";
const PROCESSED: &str = "processed";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
	last_scanned_block: u64,
	updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessedMarker {
	processed_at: u64,
}

/// Checkpoint store shared by all Listeners and Fillers of a process.
///
/// Checkpoint writes are serialized per `(protocol, chain_id)` and never move
/// a checkpoint backwards. Processed markers are write-once.
pub struct CheckpointStore {
	storage: Arc<StorageService>,
	locks: KeyLocks,
}

impl CheckpointStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			locks: KeyLocks::new(),
		}
	}

	fn checkpoint_id(protocol: &str, chain_id: u64) -> String {
		format!("{}:{}", protocol, chain_id)
	}

	fn processed_id(protocol: &str, order_id: &OrderId) -> String {
		format!("{}:{}", protocol, order_id.to_hex())
	}

	pub async fn get_last_scanned_block(
		&self,
		protocol: &str,
		chain_id: u64,
	) -> Result<Option<u64>, StorageError> {
		let id = Self::checkpoint_id(protocol, chain_id);
		Ok(self
			.storage
			.retrieve_optional::<Checkpoint>(CHECKPOINTS, &id)
			.await?
			.map(|c| c.last_scanned_block))
	}

	/// Persists `block` as the last scanned block.
	///
	/// Returns `Ok(false)` without writing if the stored checkpoint is already
	/// at or past `block`.
	pub async fn set_last_scanned_block(
		&self,
		protocol: &str,
		chain_id: u64,
		block: u64,
	) -> Result<bool, StorageError> {
		let id = Self::checkpoint_id(protocol, chain_id);
		let _guard = self.locks.lock(&id).await;

		let current = self
			.storage
			.retrieve_optional::<Checkpoint>(CHECKPOINTS, &id)
			.await?;
		if let Some(current) = current.filter(|c| c.last_scanned_block >= block) {
			tracing::debug!(
				protocol,
				chain_id,
				stored = current.last_scanned_block,
				requested = block,
				"Ignoring non-advancing checkpoint write"
			);
			return Ok(false);
		}

		self.storage
			.store(
				CHECKPOINTS,
				&id,
				&Checkpoint {
					last_scanned_block: block,
					updated_at: current_timestamp(),
				},
			)
			.await?;
		Ok(true)
	}

	pub async fn is_processed(&self, protocol: &str, order_id: &OrderId) -> Result<bool, StorageError> {
		self.storage
			.exists(PROCESSED, &Self::processed_id(protocol, order_id))
			.await
	}

	/// Marks an order as processed. Marking an already processed order is a no-op.
	pub async fn mark_processed(&self, protocol: &str, order_id: &OrderId) -> Result<(), StorageError> {
		let id = Self::processed_id(protocol, order_id);
		let _guard = self.locks.lock(&format!("{}:{}", PROCESSED, id)).await;

		if self.storage.exists(PROCESSED, &id).await? {
			return Ok(());
		}
		self.storage
			.store(
				PROCESSED,
				&id,
				&ProcessedMarker {
					processed_at: current_timestamp(),
				},
			)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::file::FileStorage;
	use crate::implementations::memory::MemoryStorage;
	use tempfile::TempDir;

	fn memory_store() -> CheckpointStore {
		CheckpointStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	#[tokio::test]
	async fn test_checkpoint_is_monotonic() {
		let store = memory_store();
		assert_eq!(store.get_last_scanned_block("eip7683", 10).await.unwrap(), None);

		assert!(store.set_last_scanned_block("eip7683", 10, 100).await.unwrap());
		assert!(!store.set_last_scanned_block("eip7683", 10, 50).await.unwrap());
		assert!(!store.set_last_scanned_block("eip7683", 10, 100).await.unwrap());
		assert_eq!(store.get_last_scanned_block("eip7683", 10).await.unwrap(), Some(100));

		// Keys are independent per chain.
		assert_eq!(store.get_last_scanned_block("eip7683", 20).await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_concurrent_checkpoint_writes_keep_maximum() {
		let store = Arc::new(memory_store());
		let mut handles = Vec::new();
		for block in [5u64, 40, 12, 33, 40, 7] {
			let store = store.clone();
			handles.push(tokio::spawn(async move {
				store.set_last_scanned_block("eip7683", 10, block).await.unwrap()
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}
		assert_eq!(store.get_last_scanned_block("eip7683", 10).await.unwrap(), Some(40));
	}

	#[tokio::test]
	async fn test_mark_processed_is_idempotent() {
		let store = memory_store();
		let order = OrderId(vec![0xa1]);
		assert!(!store.is_processed("eip7683", &order).await.unwrap());

		store.mark_processed("eip7683", &order).await.unwrap();
		store.mark_processed("eip7683", &order).await.unwrap();
		assert!(store.is_processed("eip7683", &order).await.unwrap());

		// Scoped per protocol.
		assert!(!store.is_processed("other", &order).await.unwrap());
	}

	#[tokio::test]
	async fn test_write_locks_are_not_retained() {
		let store = memory_store();
		for id in 0..50u8 {
			store.mark_processed("eip7683", &OrderId(vec![id])).await.unwrap();
		}
		store.set_last_scanned_block("eip7683", 10, 100).await.unwrap();
		assert_eq!(store.locks.len(), 0);
	}

	#[tokio::test]
	async fn test_state_survives_restart() {
		let dir = TempDir::new().unwrap();
		let open = || {
			CheckpointStore::new(Arc::new(StorageService::new(Box::new(FileStorage::new(
				dir.path().to_path_buf(),
			)))))
		};

		{
			let store = open();
			store.set_last_scanned_block("eip7683", 10, 250).await.unwrap();
			store.mark_processed("eip7683", &OrderId(vec![0xa1])).await.unwrap();
		}

		let store = open();
		assert_eq!(store.get_last_scanned_block("eip7683", 10).await.unwrap(), Some(250));
		assert!(store.is_processed("eip7683", &OrderId(vec![0xa1])).await.unwrap());
		assert!(!store.set_last_scanned_block("eip7683", 10, 200).await.unwrap());
	}
}
