//! Order processing for the solver system.
//!
//! Two concerns live here: the [`rules`] pipeline that decides whether an
//! intent is accepted, and the per-protocol [`OrderInterface`] that builds the
//! fill and settlement transactions for an accepted intent.

use async_trait::async_trait;
use solver_types::{Address, ConfigSchema, Intent, Transaction, TransactionReceipt};
use thiserror::Error;

pub mod implementations {
	pub mod standards {
		pub mod _7683;
	}
}

pub mod rules;

pub use rules::{Rule, RuleContext, RuleEngine};

#[derive(Debug, Error)]
pub enum OrderError {
	#[error("Invalid intent: {0}")]
	InvalidIntent(String),
	#[error("Unknown rule: {0}")]
	UnknownRule(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Protocol-specific transaction construction.
///
/// The Filler drives every protocol through the same state machine; only the
/// shape of the destination and origin calls differs.
#[async_trait]
pub trait OrderInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Transactions that fill `intent` on its destination chain, in
	/// submission order. Token approvals come before the fill call.
	async fn generate_fill_transactions(
		&self,
		intent: &Intent,
		solver: &Address,
	) -> Result<Vec<Transaction>, OrderError>;

	/// Transaction that claims the reward for a confirmed fill on the origin chain.
	async fn generate_settle_transaction(
		&self,
		intent: &Intent,
		fill: &TransactionReceipt,
		solver: &Address,
	) -> Result<Transaction, OrderError>;
}
