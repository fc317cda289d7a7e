//! Intent types and lifecycle for the solver system.
//!
//! An [`Intent`] is the canonical, protocol-independent shape of a user-signed
//! cross-chain order as decoded from an intent-creation event. Its lifecycle
//! is tracked by [`IntentStatus`]; the persisted form is an [`IntentRecord`].

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{current_timestamp, Address, TransactionHash, TransactionReceipt};

/// Opaque order identifier, unique per protocol and origin chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Vec<u8>);

impl OrderId {
	pub fn to_hex(&self) -> String {
		hex::encode(&self.0)
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", self.to_hex())
	}
}

impl From<[u8; 32]> for OrderId {
	fn from(bytes: [u8; 32]) -> Self {
		OrderId(bytes.to_vec())
	}
}

/// A token amount on a specific chain.
///
/// The zero address denotes the chain's native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
	pub chain_id: u64,
	pub token: Address,
	pub amount: U256,
	/// Beneficiary of the asset, when the protocol specifies one.
	pub recipient: Option<Address>,
}

/// Lifecycle status of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentStatus {
	Seen,
	Validating,
	Rejected,
	Accepted,
	Filling,
	Filled,
	Settling,
	Settled,
	Failed,
}

impl IntentStatus {
	/// Settled and Rejected intents never change status again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Settled | Self::Rejected)
	}

	pub fn can_transition_to(&self, next: IntentStatus) -> bool {
		use IntentStatus::*;

		matches!(
			(self, next),
			(Seen, Validating)
				| (Validating, Rejected)
				| (Validating, Accepted)
				| (Accepted, Filling)
				| (Filling, Filled)
				| (Filled, Settling)
				| (Settling, Settled)
				| (Failed, Filling)
				| (Failed, Settling)
				// A crash between states leaves a record that is re-entered on recovery.
				| (Failed, Validating)
				| (Seen, Failed)
				| (Validating, Failed)
				| (Accepted, Failed)
				| (Filling, Failed)
				| (Filled, Failed)
				| (Settling, Failed)
		)
	}
}

impl fmt::Display for IntentStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Seen => "seen",
			Self::Validating => "validating",
			Self::Rejected => "rejected",
			Self::Accepted => "accepted",
			Self::Filling => "filling",
			Self::Filled => "filled",
			Self::Settling => "settling",
			Self::Settled => "settled",
			Self::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// A status change and the unix timestamp it happened at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
	pub status: IntentStatus,
	pub at: u64,
}

/// Canonical cross-chain intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
	pub order_id: OrderId,
	/// Name of the protocol integration that produced this intent.
	pub protocol: String,
	pub origin_chain_id: u64,
	pub destination_chain_id: u64,
	/// Account that signed the intent.
	pub user: Address,
	/// Assets the user locks on the origin chain (the solver's reward).
	pub inputs: Vec<AssetAmount>,
	/// Assets the solver must deliver on the destination chain.
	pub outputs: Vec<AssetAmount>,
	/// Unix timestamp after which the intent can no longer be filled.
	pub fill_deadline: Option<u64>,
	/// Contract receiving the fill call on the destination chain.
	pub destination_settler: Address,
	/// Protocol-specific payload, passed through unmodified.
	pub raw_origin_data: Vec<u8>,
	/// Protocol-specific filler payload, passed through unmodified.
	pub filler_data: Vec<u8>,
	pub discovered_at_block: u64,
	pub log_index: u64,
	pub transaction_hash: TransactionHash,
}

impl Intent {
	/// Storage key scoping the order id to its protocol.
	pub fn key(&self) -> String {
		format!("{}:{}", self.protocol, self.order_id.to_hex())
	}
}

/// Why the rules engine refused an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
	/// Name of the rule that rejected.
	pub rule: String,
	pub reason: String,
}

impl fmt::Display for Rejection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.rule, self.reason)
	}
}

/// Persisted state of an intent as it moves through the Filler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRecord {
	pub intent: Intent,
	pub status: IntentStatus,
	pub transitions: Vec<StatusTransition>,
	#[serde(default)]
	pub rejection: Option<Rejection>,
	/// Fingerprint of the rule configuration the rejection was decided under.
	#[serde(default)]
	pub rules_fingerprint: Option<String>,
	#[serde(default)]
	pub failure: Option<String>,
	/// Hash of the submitted fill call, recorded before waiting for its receipt.
	/// Cleared only once that fill is known to have reverted.
	#[serde(default)]
	pub pending_fill: Option<TransactionHash>,
	/// Every fill call submitted for this intent, oldest first.
	#[serde(default)]
	pub fill_submissions: Vec<TransactionHash>,
	#[serde(default)]
	pub fill_receipt: Option<TransactionReceipt>,
	/// Hash of the submitted settlement, with the same lifetime as `pending_fill`.
	#[serde(default)]
	pub pending_settle: Option<TransactionHash>,
	#[serde(default)]
	pub settle_receipt: Option<TransactionReceipt>,
	/// Number of fill or settlement attempts made so far.
	#[serde(default)]
	pub attempts: u32,
}

impl IntentRecord {
	pub fn seen(intent: Intent) -> Self {
		Self {
			intent,
			status: IntentStatus::Seen,
			transitions: vec![StatusTransition {
				status: IntentStatus::Seen,
				at: current_timestamp(),
			}],
			rejection: None,
			rules_fingerprint: None,
			failure: None,
			pending_fill: None,
			fill_submissions: Vec::new(),
			fill_receipt: None,
			pending_settle: None,
			settle_receipt: None,
			attempts: 0,
		}
	}

	/// Moves the record to `next`, appending to the transition history.
	///
	/// Returns an error describing the attempted transition if it is not allowed.
	pub fn transition(&mut self, next: IntentStatus) -> Result<(), String> {
		if !self.status.can_transition_to(next) {
			return Err(format!("invalid transition {} -> {}", self.status, next));
		}
		self.status = next;
		self.transitions.push(StatusTransition {
			status: next,
			at: current_timestamp(),
		});
		Ok(())
	}
}
