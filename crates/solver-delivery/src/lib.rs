//! Transaction delivery for the solver system.
//!
//! [`DeliveryInterface`] submits signed transactions to one chain and reads
//! their receipts. [`DeliveryService`] routes by chain id, assigns nonces
//! sequentially per chain for the solver account, and waits for confirmations
//! under a bounded timeout.

use async_trait::async_trait;
use dashmap::DashMap;
use solver_types::{truncate_id, Address, ConfigSchema, Transaction, TransactionHash, TransactionReceipt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Transaction {0} reverted")]
	Reverted(TransactionHash),
	#[error("Timed out: {0}")]
	Timeout(String),
	#[error("No delivery provider for chain {0}")]
	UnknownChain(u64),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Submission and receipt access for a single chain.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	fn chain_id(&self) -> u64;

	/// Signs and broadcasts `tx`. The nonce is already assigned.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Receipt of a mined transaction, `None` while pending or unknown.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	async fn get_block_number(&self) -> Result<u64, DeliveryError>;

	/// Next nonce of `account`, counting pending transactions.
	async fn pending_nonce(&self, account: &Address) -> Result<u64, DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
	/// Blocks that must follow the inclusion block before a receipt counts.
	pub confirmations: u64,
	pub confirmation_timeout: Duration,
	pub poll_interval: Duration,
	/// Bound on each individual RPC call.
	pub rpc_timeout: Duration,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			confirmations: 1,
			confirmation_timeout: Duration::from_secs(300),
			poll_interval: Duration::from_secs(2),
			rpc_timeout: Duration::from_secs(15),
		}
	}
}

pub struct DeliveryService {
	providers: HashMap<u64, Box<dyn DeliveryInterface>>,
	account: Address,
	/// Next nonce per chain. `None` means it must be fetched from the node.
	nonces: DashMap<u64, Arc<Mutex<Option<u64>>>>,
	config: DeliveryConfig,
}

impl DeliveryService {
	pub fn new(
		providers: Vec<Box<dyn DeliveryInterface>>,
		account: Address,
		config: DeliveryConfig,
	) -> Self {
		Self {
			providers: providers.into_iter().map(|p| (p.chain_id(), p)).collect(),
			account,
			nonces: DashMap::new(),
			config,
		}
	}

	pub fn account(&self) -> &Address {
		&self.account
	}

	fn provider(&self, chain_id: u64) -> Result<&dyn DeliveryInterface, DeliveryError> {
		self.providers
			.get(&chain_id)
			.map(|p| p.as_ref())
			.ok_or(DeliveryError::UnknownChain(chain_id))
	}

	async fn bounded<T>(
		&self,
		what: &str,
		fut: impl Future<Output = Result<T, DeliveryError>>,
	) -> Result<T, DeliveryError> {
		tokio::time::timeout(self.config.rpc_timeout, fut)
			.await
			.map_err(|_| {
				DeliveryError::Timeout(format!("{} after {:?}", what, self.config.rpc_timeout))
			})?
	}

	/// Assigns the next nonce and submits `tx`.
	///
	/// The per-chain nonce lock is held across assignment and submission. A
	/// failed submission forgets the cached nonce so the next call refetches it.
	pub async fn submit(&self, mut tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let chain_id = tx.chain_id;
		let provider = self.provider(chain_id)?;
		let slot = self
			.nonces
			.entry(chain_id)
			.or_insert_with(|| Arc::new(Mutex::new(None)))
			.clone();
		let mut next = slot.lock().await;

		let nonce = match *next {
			Some(nonce) => nonce,
			None => {
				self.bounded("pending_nonce", provider.pending_nonce(&self.account))
					.await?
			}
		};
		tx.nonce = Some(nonce);

		match self.bounded("submit", provider.submit(tx)).await {
			Ok(hash) => {
				*next = Some(nonce + 1);
				tracing::info!(
					chain_id,
					nonce,
					tx_hash = %truncate_id(&hash.to_string()),
					"Submitted transaction"
				);
				Ok(hash)
			}
			Err(e) => {
				*next = None;
				Err(e)
			}
		}
	}

	pub async fn get_receipt(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let provider = self.provider(chain_id)?;
		self.bounded("get_receipt", provider.get_receipt(hash)).await
	}

	/// Polls until `hash` is mined with the configured confirmations.
	///
	/// Returns `Reverted` for a failed receipt and `Timeout` once the
	/// confirmation timeout elapses. Transient RPC errors while polling are
	/// logged and polling continues until the deadline.
	pub async fn wait_for_confirmation(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, DeliveryError> {
		let provider = self.provider(chain_id)?;
		let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout;

		loop {
			match self.check_confirmed(provider, hash).await {
				Ok(Some(receipt)) if receipt.success => return Ok(receipt),
				Ok(Some(_)) => return Err(DeliveryError::Reverted(hash.clone())),
				Ok(None) => {}
				Err(e) => {
					tracing::debug!(chain_id, tx_hash = %hash, error = %e, "Receipt poll failed");
				}
			}

			if tokio::time::Instant::now() + self.config.poll_interval > deadline {
				return Err(DeliveryError::Timeout(format!(
					"{} not confirmed on chain {} within {:?}",
					hash, chain_id, self.config.confirmation_timeout
				)));
			}
			tokio::time::sleep(self.config.poll_interval).await;
		}
	}

	async fn check_confirmed(
		&self,
		provider: &dyn DeliveryInterface,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let Some(receipt) = self.bounded("get_receipt", provider.get_receipt(hash)).await? else {
			return Ok(None);
		};
		if self.config.confirmations == 0 {
			return Ok(Some(receipt));
		}
		let current = self
			.bounded("get_block_number", provider.get_block_number())
			.await?;
		if current.saturating_sub(receipt.block_number) >= self.config.confirmations {
			Ok(Some(receipt))
		} else {
			Ok(None)
		}
	}

	/// Submits `tx` and waits for a successful, confirmed receipt.
	pub async fn deliver(&self, tx: Transaction) -> Result<TransactionReceipt, DeliveryError> {
		let chain_id = tx.chain_id;
		let hash = self.submit(tx).await?;
		self.wait_for_confirmation(chain_id, &hash).await
	}
}
