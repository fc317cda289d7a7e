//! Operating key of the solver.
//!
//! Delivery signs every fill, approval and settlement transaction with the
//! key exposed here; the rules read balances of its address.

use alloy_network::EthereumWallet;
use async_trait::async_trait;
use solver_types::{Address, ConfigSchema};
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

#[async_trait]
pub trait AccountInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn address(&self) -> Result<Address, AccountError>;

	/// Wallet used by providers to sign transactions for `chain_id`.
	fn wallet(&self, chain_id: u64) -> Result<EthereumWallet, AccountError>;

	async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, AccountError>;
}

pub struct AccountService {
	provider: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(provider: Box<dyn AccountInterface>) -> Self {
		Self { provider }
	}

	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.provider.address().await
	}

	pub fn wallet(&self, chain_id: u64) -> Result<EthereumWallet, AccountError> {
		self.provider.wallet(chain_id)
	}

	pub async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, AccountError> {
		self.provider.sign_message(message).await
	}
}
