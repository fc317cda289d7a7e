//! Rule outcomes and the per-protocol rule configuration.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{keccak_hex, Address};

/// Result of evaluating one rule against an intent.
///
/// There is no third state: a rule that cannot decide rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOutcome {
	Pass,
	Reject(String),
}

impl RuleOutcome {
	pub fn reject(reason: impl Into<String>) -> Self {
		Self::Reject(reason.into())
	}

	pub fn is_pass(&self) -> bool {
		matches!(self, Self::Pass)
	}
}

/// Token allowed by the `token_allow_list` rule, with optional amount bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRule {
	pub chain_id: u64,
	pub address: Address,
	#[serde(default)]
	pub min_amount: Option<U256>,
	#[serde(default)]
	pub max_amount: Option<U256>,
}

/// Rule selection and parameters for one protocol (`[protocols.<name>.rules]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
	/// Rule names, evaluated in this order.
	#[serde(default = "default_rule_order")]
	pub order: Vec<String>,
	#[serde(default)]
	pub allowed_tokens: Vec<TokenRule>,
	#[serde(default)]
	pub blocked_senders: Vec<Address>,
	/// Minimum margin over the output value, in basis points.
	#[serde(default)]
	pub min_profit_bps: u64,
	/// Flat expected execution cost, in the route's token units.
	#[serde(default)]
	pub fill_cost: U256,
	/// Seconds of headroom required before the fill deadline.
	#[serde(default = "default_deadline_buffer")]
	pub deadline_buffer_secs: u64,
}

pub const CANONICAL_RULES: [&str; 7] = [
	"not_already_filled",
	"token_allow_list",
	"sender_block_list",
	"fill_deadline",
	"amount_bounds",
	"solvency",
	"profitability",
];

fn default_rule_order() -> Vec<String> {
	CANONICAL_RULES.iter().map(|s| s.to_string()).collect()
}

fn default_deadline_buffer() -> u64 {
	60
}

impl Default for RulesConfig {
	fn default() -> Self {
		Self {
			order: default_rule_order(),
			allowed_tokens: Vec::new(),
			blocked_senders: Vec::new(),
			min_profit_bps: 0,
			fill_cost: U256::ZERO,
			deadline_buffer_secs: default_deadline_buffer(),
		}
	}
}

impl RulesConfig {
	/// Stable digest of the configuration. A rejection is only final for the
	/// fingerprint it was decided under.
	pub fn fingerprint(&self) -> String {
		// Serializing a plain struct of strings and integers cannot fail.
		let bytes = serde_json::to_vec(self).unwrap_or_default();
		keccak_hex(&bytes)
	}

	pub fn token(&self, chain_id: u64, address: &Address) -> Option<&TokenRule> {
		self.allowed_tokens
			.iter()
			.find(|t| t.chain_id == chain_id && &t.address == address)
	}
}
