//! Raw chain event types consumed by intent discovery.

use serde::{Deserialize, Serialize};

use crate::{Address, TransactionHash};

/// A log emitted by a contract, as returned by a chain's read RPC.
///
/// Events are totally ordered within a chain by `(block_number, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
	/// Chain the log was read from.
	pub chain_id: u64,
	/// Contract that emitted the log.
	pub address: Address,
	/// Indexed topics, topic0 being the event signature hash.
	pub topics: Vec<[u8; 32]>,
	/// ABI-encoded non-indexed event data.
	pub data: Vec<u8>,
	pub block_number: u64,
	pub log_index: u64,
	pub transaction_hash: TransactionHash,
}

impl RawEvent {
	/// Ordering key used to sort events within a block range.
	pub fn position(&self) -> (u64, u64) {
		(self.block_number, self.log_index)
	}
}

/// Filter selecting intent-creation logs on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
	/// Contracts to read logs from. Must not be empty.
	pub addresses: Vec<Address>,
	/// Event signature hash (topic0).
	pub topic0: [u8; 32],
}
