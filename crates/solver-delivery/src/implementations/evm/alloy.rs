//! Alloy-based EVM delivery implementation.
//!
//! The provider carries the solver wallet, so transactions are signed locally
//! and broadcast with `eth_sendRawTransaction`. Gas and fees are filled by the
//! recommended fillers; the nonce is always assigned by the caller.

use crate::{DeliveryError, DeliveryInterface};
use alloy_network::EthereumWallet;
use alloy_primitives::FixedBytes;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_transport_http::Http;
use async_trait::async_trait;
use solver_types::{
	Address, ConfigSchema, Field, FieldType, Schema, Transaction, TransactionHash,
	TransactionReceipt, ValidationError,
};
use std::sync::Arc;

pub struct AlloyDelivery {
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
	chain_id: u64,
}

impl AlloyDelivery {
	pub fn new(rpc_url: &str, chain_id: u64, wallet: EthereumWallet) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Configuration(format!("Invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new()
			.with_recommended_fillers()
			.wallet(wallet)
			.on_http(url);

		Ok(Self {
			provider: Arc::new(provider),
			chain_id,
		})
	}

	fn tx_hash(hash: &TransactionHash) -> Result<FixedBytes<32>, DeliveryError> {
		if hash.0.len() != 32 {
			return Err(DeliveryError::Network(format!("Malformed transaction hash {}", hash)));
		}
		Ok(FixedBytes::<32>::from_slice(&hash.0))
	}
}

/// Configuration schema for a chain's delivery endpoint.
pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::String).with_validator(|value| {
				let url = value.as_str().unwrap_or_default();
				if url.starts_with("http://") || url.starts_with("https://") {
					Ok(())
				} else {
					Err("RPC URL must start with http:// or https://".to_string())
				}
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let request: TransactionRequest = tx.into();

		let pending = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to send transaction: {}", e)))?;

		Ok(TransactionHash(pending.tx_hash().0.to_vec()))
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(Self::tx_hash(hash)?)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get receipt: {}", e)))?;

		// A receipt without a block number is not yet mined.
		Ok(receipt.and_then(|r| {
			r.block_number.map(|block_number| TransactionReceipt {
				hash: TransactionHash(r.transaction_hash.0.to_vec()),
				chain_id: self.chain_id,
				block_number,
				success: r.status(),
			})
		}))
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get block number: {}", e)))
	}

	async fn pending_nonce(&self, account: &Address) -> Result<u64, DeliveryError> {
		let account = account
			.to_alloy()
			.ok_or_else(|| DeliveryError::Configuration(format!("Not an EVM address: {}", account)))?;

		self.provider
			.get_transaction_count(account)
			.pending()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get nonce: {}", e)))
	}
}

/// Factory function to create an HTTP delivery provider for one chain.
///
/// Configuration parameters come from the chain's `[chains.<id>]` table:
/// - `rpc_url`: The HTTP RPC endpoint URL
pub fn create_http_delivery(
	chain_id: u64,
	config: &toml::Value,
	wallet: EthereumWallet,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::Configuration("rpc_url is required".to_string()))?;

	Ok(Box::new(AlloyDelivery::new(rpc_url, chain_id, wallet)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_signer_local::PrivateKeySigner;

	#[test]
	fn test_schema_rejects_non_http_url() {
		let config: toml::Value = toml::from_str(r#"rpc_url = "ws://localhost:8545""#).unwrap();
		let wallet = EthereumWallet::from(PrivateKeySigner::random());
		assert!(matches!(
			create_http_delivery(1, &config, wallet),
			Err(DeliveryError::Configuration(_))
		));
	}

	#[test]
	fn test_malformed_hash() {
		assert!(AlloyDelivery::tx_hash(&TransactionHash(vec![1, 2])).is_err());
		assert!(AlloyDelivery::tx_hash(&TransactionHash(vec![0; 32])).is_ok());
	}
}
