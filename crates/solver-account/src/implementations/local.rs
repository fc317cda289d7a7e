//! Local private key wallet built on Alloy's signer.

use crate::{AccountError, AccountInterface};
use alloy_network::EthereumWallet;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use solver_types::{Address, ConfigSchema, Field, FieldType, Schema, ValidationError};

/// Holds the operating key in process memory.
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a wallet from a hex-encoded private key, with or without `0x`.
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;

		Ok(Self { signer })
	}
}

pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|value| {
				let key = value.as_str().unwrap_or_default();
				let key = key.strip_prefix("0x").unwrap_or(key);

				if key.len() != 64 {
					return Err("Private key must be 64 hex characters (32 bytes)".to_string());
				}
				if hex::decode(key).is_err() {
					return Err("Private key must be valid hexadecimal".to_string());
				}
				Ok(())
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address().into())
	}

	fn wallet(&self, chain_id: u64) -> Result<EthereumWallet, AccountError> {
		let signer = self.signer.clone().with_chain_id(Some(chain_id));
		Ok(EthereumWallet::from(signer))
	}

	async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, AccountError> {
		// EIP-191 prefixing is applied by the signer.
		let signature = self
			.signer
			.sign_message(message)
			.await
			.map_err(|e| AccountError::SigningFailed(format!("Failed to sign message: {}", e)))?;

		Ok(signature.as_bytes().to_vec())
	}
}

/// Factory function to create a local wallet from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded 32-byte key
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::Configuration(e.to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::Configuration("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(private_key)?))
}
