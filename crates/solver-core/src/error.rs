// solver-core/src/error.rs

use solver_account::AccountError;
use solver_delivery::DeliveryError;
use solver_discovery::{DiscoveryError, ListenerError};
use solver_order::OrderError;
use solver_settlement::SettlementError;
use solver_storage::StorageError;
use thiserror::Error;

/// Failure while driving one intent through the Filler.
#[derive(Error, Debug)]
pub enum FillerError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Delivery error: {0}")]
	Delivery(#[from] DeliveryError),

	#[error("Order error: {0}")]
	Order(#[from] OrderError),

	#[error("Settlement error: {0}")]
	Settlement(#[from] SettlementError),

	#[error("Invalid state: {0}")]
	InvalidState(String),

	#[error("{phase} failed permanently after {attempts} attempt(s): {cause}")]
	PermanentFailure {
		phase: &'static str,
		attempts: u32,
		cause: String,
	},
}

impl FillerError {
	/// Whether another attempt may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Delivery(e) => matches!(
				e,
				DeliveryError::Network(_) | DeliveryError::Reverted(_) | DeliveryError::Timeout(_)
			),
			Self::Settlement(SettlementError::Chain(_)) => true,
			_ => false,
		}
	}
}

#[derive(Error, Debug)]
pub enum SolverError {
	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Account error: {0}")]
	Account(#[from] AccountError),

	#[error("Discovery error: {0}")]
	Discovery(#[from] DiscoveryError),

	#[error("Delivery error: {0}")]
	Delivery(#[from] DeliveryError),

	#[error("Order error: {0}")]
	Order(#[from] OrderError),

	#[error("Settlement error: {0}")]
	Settlement(#[from] SettlementError),

	#[error("Listener error: {0}")]
	Listener(#[from] ListenerError),

	#[error("Service error: {0}")]
	Service(String),
}
