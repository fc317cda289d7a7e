//! Alloy-based chain reader for EVM chains.

use crate::{DiscoveryError, EventSourceInterface};
use alloy_primitives::{Address as AlloyAddress, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy_sol_types::{sol, SolCall};
use alloy_transport_http::Http;
use async_trait::async_trait;
use solver_types::{Address, EventFilter, RawEvent, TransactionHash};

sol! {
	interface IERC20 {
		function balanceOf(address account) external view returns (uint256 balance);
	}
}

pub struct AlloyEventSource {
	chain_id: u64,
	provider: RootProvider<Http<reqwest::Client>>,
	/// Largest block span requested in a single `eth_getLogs` call.
	max_block_range: u64,
}

impl AlloyEventSource {
	pub fn new(chain_id: u64, rpc_url: &str, max_block_range: u64) -> Result<Self, DiscoveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DiscoveryError::Configuration(format!("Invalid RPC URL: {}", e)))?;

		Ok(Self {
			chain_id,
			provider: RootProvider::new_http(url),
			max_block_range: max_block_range.max(1),
		})
	}

	fn to_alloy(address: &Address) -> Result<AlloyAddress, DiscoveryError> {
		address
			.to_alloy()
			.ok_or_else(|| DiscoveryError::Configuration(format!("Not an EVM address: {}", address)))
	}

	fn convert_log(&self, log: Log) -> Result<RawEvent, DiscoveryError> {
		// Pending logs carry no position and are never requested.
		let (Some(block_number), Some(log_index), Some(tx_hash)) =
			(log.block_number, log.log_index, log.transaction_hash)
		else {
			return Err(DiscoveryError::Rpc(
				"Node returned a log without block position".to_string(),
			));
		};

		Ok(RawEvent {
			chain_id: self.chain_id,
			address: log.address().into(),
			topics: log.topics().iter().map(|t| t.0).collect(),
			data: log.data().data.to_vec(),
			block_number,
			log_index,
			transaction_hash: TransactionHash(tx_hash.0.to_vec()),
		})
	}
}

#[async_trait]
impl EventSourceInterface for AlloyEventSource {
	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn get_block_height(&self) -> Result<u64, DiscoveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| DiscoveryError::Rpc(format!("Failed to get block number: {}", e)))
	}

	async fn query_events(
		&self,
		filter: &EventFilter,
		from: u64,
		to: u64,
	) -> Result<Vec<RawEvent>, DiscoveryError> {
		let addresses = filter
			.addresses
			.iter()
			.map(Self::to_alloy)
			.collect::<Result<Vec<_>, _>>()?;
		let topic0 = B256::from(filter.topic0);

		let mut events = Vec::new();
		let mut start = from;
		while start <= to {
			let end = start.saturating_add(self.max_block_range - 1).min(to);
			let query = Filter::new()
				.address(addresses.clone())
				.event_signature(topic0)
				.from_block(start)
				.to_block(end);

			tracing::debug!(chain_id = self.chain_id, from = start, to = end, "Fetching logs");
			let logs = self.provider.get_logs(&query).await.map_err(|e| {
				DiscoveryError::Rpc(format!("Failed to get logs {}..={}: {}", start, end, e))
			})?;
			for log in logs {
				events.push(self.convert_log(log)?);
			}

			if end == u64::MAX {
				break;
			}
			start = end + 1;
		}

		events.sort_by_key(RawEvent::position);
		Ok(events)
	}

	async fn get_balance(
		&self,
		owner: &Address,
		token: Option<&Address>,
	) -> Result<U256, DiscoveryError> {
		let owner = Self::to_alloy(owner)?;

		match token.filter(|t| !t.is_zero()) {
			None => self
				.provider
				.get_balance(owner)
				.await
				.map_err(|e| DiscoveryError::Rpc(format!("Failed to get balance: {}", e))),
			Some(token) => {
				let call = IERC20::balanceOfCall { account: owner };
				let request = TransactionRequest::default()
					.to(Self::to_alloy(token)?)
					.input(TransactionInput::new(call.abi_encode().into()));
				let output = self
					.provider
					.call(&request)
					.await
					.map_err(|e| DiscoveryError::Rpc(format!("balanceOf call failed: {}", e)))?;
				let decoded = IERC20::balanceOfCall::abi_decode_returns(&output, true)
					.map_err(|e| DiscoveryError::Rpc(format!("Bad balanceOf return: {}", e)))?;
				Ok(decoded.balance)
			}
		}
	}
}

/// Factory function to create a chain reader.
///
/// Parameters come from the chain's `[chains.<id>]` table:
/// - `rpc_url`: HTTP RPC endpoint
/// - `max_block_range`: largest `eth_getLogs` span (default 1000)
pub fn create_event_source(
	chain_id: u64,
	rpc_url: &str,
	max_block_range: u64,
) -> Result<Box<dyn EventSourceInterface>, DiscoveryError> {
	Ok(Box::new(AlloyEventSource::new(chain_id, rpc_url, max_block_range)?))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rejects_invalid_url() {
		assert!(matches!(
			AlloyEventSource::new(1, "not a url", 1000),
			Err(DiscoveryError::Configuration(_))
		));
	}

	#[test]
	fn test_balance_of_encoding() {
		let call = IERC20::balanceOfCall {
			account: AlloyAddress::repeat_byte(0x11),
		};
		let data = call.abi_encode();
		// selector of balanceOf(address)
		assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
		assert_eq!(data.len(), 36);
	}
}
