//! Settlement readiness for the solver system.
//!
//! A settlement implementation answers two questions about a confirmed fill:
//! whether it is a valid fill of the intent, and whether it may be settled on
//! the origin chain yet.

use async_trait::async_trait;
use solver_discovery::DiscoveryError;
use solver_types::{ConfigSchema, Intent, TransactionReceipt};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub mod implementations {
	pub mod direct;
}

#[derive(Debug, Error)]
pub enum SettlementError {
	#[error("Validation failed: {0}")]
	ValidationFailed(String),
	#[error("Chain read failed: {0}")]
	Chain(#[from] DiscoveryError),
	#[error("Fill not settleable within {0:?}")]
	Timeout(Duration),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

#[async_trait]
pub trait SettlementInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Checks that `receipt` is a successful fill of `intent` on its destination chain.
	async fn validate_fill(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
	) -> Result<(), SettlementError>;

	/// Whether the fill has matured enough to be settled on the origin chain.
	async fn can_settle(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
	) -> Result<bool, SettlementError>;
}

/// Wraps the settlement implementation of one protocol.
pub struct SettlementService {
	implementation: Box<dyn SettlementInterface>,
	poll_interval: Duration,
}

impl SettlementService {
	pub fn new(implementation: Box<dyn SettlementInterface>, poll_interval: Duration) -> Self {
		Self {
			implementation,
			poll_interval,
		}
	}

	pub async fn validate_fill(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
	) -> Result<(), SettlementError> {
		self.implementation.validate_fill(intent, receipt).await
	}

	pub async fn can_settle(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
	) -> Result<bool, SettlementError> {
		self.implementation.can_settle(intent, receipt).await
	}

	/// Polls `can_settle` until it holds or `timeout` elapses.
	///
	/// Chain read errors while polling are logged and retried on the next tick.
	pub async fn wait_until_settleable(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
		timeout: Duration,
	) -> Result<(), SettlementError> {
		let deadline = Instant::now() + timeout;
		loop {
			match self.can_settle(intent, receipt).await {
				Ok(true) => return Ok(()),
				Ok(false) => {}
				Err(e) => {
					tracing::warn!(order_id = %intent.order_id, error = %e, "Settlement readiness check failed");
				}
			}
			if Instant::now() + self.poll_interval > deadline {
				return Err(SettlementError::Timeout(timeout));
			}
			tokio::time::sleep(self.poll_interval).await;
		}
	}
}
