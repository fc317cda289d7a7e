//! Persistence of intent records across restarts.

use crate::locks::KeyLocks;
use crate::{StorageError, StorageService};
use solver_types::{Intent, IntentRecord, IntentStatus};
use std::sync::Arc;

const INTENTS: &str = "intents";

/// Stores one [`IntentRecord`] per `protocol:order_id`.
pub struct IntentStore {
	storage: Arc<StorageService>,
	locks: KeyLocks,
}

impl IntentStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			locks: KeyLocks::new(),
		}
	}

	/// Records a newly discovered intent as `Seen`.
	///
	/// Returns `false` and leaves the stored record untouched if one exists.
	pub async fn record_seen(&self, intent: &Intent) -> Result<bool, StorageError> {
		let key = intent.key();
		let _guard = self.locks.lock(&key).await;

		if self.storage.exists(INTENTS, &key).await? {
			return Ok(false);
		}
		self.storage
			.store(INTENTS, &key, &IntentRecord::seen(intent.clone()))
			.await?;
		Ok(true)
	}

	pub async fn get(&self, key: &str) -> Result<Option<IntentRecord>, StorageError> {
		self.storage.retrieve_optional(INTENTS, key).await
	}

	pub async fn save(&self, record: &IntentRecord) -> Result<(), StorageError> {
		self.storage
			.store(INTENTS, &record.intent.key(), record)
			.await
	}

	/// Records of `protocol` that are neither terminal nor failed, oldest first.
	pub async fn pending(&self, protocol: &str) -> Result<Vec<IntentRecord>, StorageError> {
		let mut records: Vec<IntentRecord> = self
			.storage
			.retrieve_all::<IntentRecord>(INTENTS, &format!("{}:", protocol))
			.await?
			.into_iter()
			.map(|(_, record)| record)
			.filter(|r| !r.status.is_terminal() && r.status != IntentStatus::Failed)
			.collect();
		records.sort_by_key(|r| (r.intent.origin_chain_id, r.intent.discovered_at_block, r.intent.log_index));
		Ok(records)
	}
}
