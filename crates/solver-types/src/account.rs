//! Account-related types for the solver system.
//!
//! This module defines the address and transaction types that flow between
//! order implementations, which build transactions, and delivery
//! implementations, which sign and submit them.

use alloy_primitives::{Address as AlloyAddress, Bytes, TxKind, U256};
use alloy_rpc_types::{TransactionInput, TransactionRequest};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Blockchain address representation.
///
/// Stores addresses as raw bytes to support different blockchain formats.
/// EVM addresses are 20 bytes.
/// Serialized as a `0x`-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub Vec<u8>);

impl Address {
	/// The 20-byte zero address, used by EVM protocols to denote the native asset.
	pub fn zero() -> Self {
		Address(vec![0u8; 20])
	}

	pub fn is_zero(&self) -> bool {
		self.0.iter().all(|b| *b == 0)
	}

	/// Builds an address from the low 20 bytes of a left-padded 32-byte word.
	pub fn from_bytes32(word: &[u8; 32]) -> Self {
		Address(word[12..].to_vec())
	}

	/// Left-pads the address into a 32-byte word.
	pub fn to_bytes32(&self) -> [u8; 32] {
		let mut word = [0u8; 32];
		let len = self.0.len().min(32);
		word[32 - len..].copy_from_slice(&self.0[self.0.len() - len..]);
		word
	}

	/// Converts into an alloy EVM address, if the byte length is 20.
	pub fn to_alloy(&self) -> Option<AlloyAddress> {
		(self.0.len() == 20).then(|| AlloyAddress::from_slice(&self.0))
	}
}

impl From<AlloyAddress> for Address {
	fn from(addr: AlloyAddress) -> Self {
		Address(addr.as_slice().to_vec())
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Error returned when parsing a hex address string fails.
#[derive(Debug, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
	type Err = AddressParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let stripped = s.strip_prefix("0x").unwrap_or(s);
		let bytes = hex::decode(stripped).map_err(|e| AddressParseError(format!("{s}: {e}")))?;
		if bytes.len() != 20 {
			return Err(AddressParseError(format!(
				"{s}: expected 20 bytes, got {}",
				bytes.len()
			)));
		}
		Ok(Address(bytes))
	}
}

impl Serialize for Address {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for Address {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		let stripped = s.strip_prefix("0x").unwrap_or(&s);
		hex::decode(stripped)
			.map(Address)
			.map_err(|e| de::Error::custom(format!("invalid address {s}: {e}")))
	}
}

/// Blockchain transaction representation.
///
/// Contains all fields necessary for constructing and submitting transactions
/// to various blockchain networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Recipient address (None for contract creation).
	pub to: Option<Address>,
	/// Transaction data/calldata.
	pub data: Vec<u8>,
	/// Value to transfer in native currency.
	pub value: U256,
	/// Chain ID for replay protection.
	pub chain_id: u64,
	/// Transaction nonce, assigned by the delivery service before submission.
	pub nonce: Option<u64>,
	/// Gas limit for transaction execution.
	pub gas_limit: Option<u64>,
	/// Legacy gas price (for non-EIP-1559 transactions).
	pub gas_price: Option<u128>,
	/// Maximum fee per gas (EIP-1559).
	pub max_fee_per_gas: Option<u128>,
	/// Maximum priority fee per gas (EIP-1559).
	pub max_priority_fee_per_gas: Option<u128>,
}

impl Transaction {
	/// Creates a plain contract call with no value and provider-filled gas.
	pub fn call(chain_id: u64, to: Address, data: Vec<u8>) -> Self {
		Self {
			to: Some(to),
			data,
			value: U256::ZERO,
			chain_id,
			nonce: None,
			gas_limit: None,
			gas_price: None,
			max_fee_per_gas: None,
			max_priority_fee_per_gas: None,
		}
	}

	pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
		self.gas_limit = gas_limit;
		self
	}

	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}
}

/// Conversion from our Transaction type to Alloy's TransactionRequest.
impl From<Transaction> for TransactionRequest {
	fn from(tx: Transaction) -> Self {
		let to = match tx.to.as_ref().and_then(Address::to_alloy) {
			Some(addr) => Some(TxKind::Call(addr)),
			None => Some(TxKind::Create),
		};

		TransactionRequest {
			chain_id: Some(tx.chain_id),
			value: Some(tx.value),
			to,
			nonce: tx.nonce,
			gas: tx.gas_limit,
			gas_price: tx.gas_price,
			max_fee_per_gas: tx.max_fee_per_gas,
			max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
			input: TransactionInput {
				input: Some(Bytes::from(tx.data)),
				data: None,
			},
			..Default::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_address_bytes32_padding() {
		let addr: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
		let word = addr.to_bytes32();
		assert_eq!(&word[..12], &[0u8; 12]);
		assert_eq!(Address::from_bytes32(&word), addr);
	}

	#[test]
	fn test_address_rejects_wrong_length() {
		assert!("0x1234".parse::<Address>().is_err());
		assert!("not-hex".parse::<Address>().is_err());
	}

	#[test]
	fn test_address_serde_as_hex() {
		let addr: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
		let json = serde_json::to_string(&addr).unwrap();
		assert_eq!(json, "\"0x1111111111111111111111111111111111111111\"");
		assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);
	}

	#[test]
	fn test_transaction_request_conversion() {
		let to: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
		let tx = Transaction::call(10, to.clone(), vec![1, 2, 3]).with_gas_limit(Some(21_000));
		let request: TransactionRequest = tx.into();
		assert_eq!(request.chain_id, Some(10));
		assert_eq!(request.gas, Some(21_000));
		assert_eq!(request.to, Some(TxKind::Call(to.to_alloy().unwrap())));
	}
}
