//! EIP-7683 fill and settlement transaction construction.
//!
//! Fills call `IDestinationSettler.fill` on the intent's destination settler,
//! preceded by one ERC-20 approval per output token. Settlement calls
//! `IOriginSettler.settle` on the settler that emitted the `Open` event.

use crate::{OrderError, OrderInterface};
use alloy_primitives::{Address as AlloyAddress, FixedBytes, U256};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use solver_types::{
	Address, ConfigSchema, Field, FieldType, Intent, Schema, Transaction, TransactionReceipt,
	ValidationError,
};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

sol! {
	interface IDestinationSettler {
		function fill(bytes32 orderId, bytes originData, bytes fillerData) external payable;
	}

	interface IOriginSettler {
		function settle(bytes32 orderId, bytes originData, bytes32 filler, bytes32 fillTxHash) external;
	}

	interface IERC20 {
		function approve(address spender, uint256 amount) external returns (bool);
	}
}

pub struct Eip7683Order {
	origin_settlers: HashMap<u64, Address>,
	fill_gas_limit: Option<u64>,
	settle_gas_limit: Option<u64>,
}

impl Eip7683Order {
	pub fn new(
		origin_settlers: HashMap<u64, Address>,
		fill_gas_limit: Option<u64>,
		settle_gas_limit: Option<u64>,
	) -> Self {
		Self {
			origin_settlers,
			fill_gas_limit,
			settle_gas_limit,
		}
	}

	fn order_id(intent: &Intent) -> Result<FixedBytes<32>, OrderError> {
		let bytes: [u8; 32] = intent.order_id.0.as_slice().try_into().map_err(|_| {
			OrderError::InvalidIntent(format!(
				"order id must be 32 bytes, got {}",
				intent.order_id.0.len()
			))
		})?;
		Ok(FixedBytes(bytes))
	}

	fn evm(address: &Address, what: &str) -> Result<AlloyAddress, OrderError> {
		address
			.to_alloy()
			.ok_or_else(|| OrderError::InvalidIntent(format!("{} {} is not an EVM address", what, address)))
	}
}

pub struct Eip7683OrderSchema;

fn gas_limit() -> FieldType {
	FieldType::Integer {
		min: Some(21_000),
		max: None,
	}
}

impl ConfigSchema for Eip7683OrderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"origin_settlers",
				FieldType::Table(Schema::new(vec![], vec![])),
			)
			.with_validator(|value| {
				let table = value.as_table().ok_or("origin_settlers must be a table")?;
				for (chain, addr) in table {
					chain
						.parse::<u64>()
						.map_err(|_| format!("origin_settlers key '{}' is not a chain id", chain))?;
					let addr = addr
						.as_str()
						.ok_or_else(|| format!("origin_settlers.{} must be a string", chain))?;
					Address::from_str(addr).map_err(|e| e.to_string())?;
				}
				Ok(())
			})],
			vec![
				Field::new("fill_gas_limit", gas_limit()),
				Field::new("settle_gas_limit", gas_limit()),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl OrderInterface for Eip7683Order {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(Eip7683OrderSchema)
	}

	async fn generate_fill_transactions(
		&self,
		intent: &Intent,
		solver: &Address,
	) -> Result<Vec<Transaction>, OrderError> {
		let order_id = Self::order_id(intent)?;
		let settler = Self::evm(&intent.destination_settler, "destination settler")?;
		let chain_id = intent.destination_chain_id;

		let mut approvals: BTreeMap<Address, U256> = BTreeMap::new();
		let mut native = U256::ZERO;
		for output in intent.outputs.iter().filter(|o| o.chain_id == chain_id) {
			let total = if output.token.is_zero() {
				&mut native
			} else {
				approvals.entry(output.token.clone()).or_default()
			};
			*total = total
				.checked_add(output.amount)
				.ok_or_else(|| OrderError::InvalidIntent("output amount overflow".into()))?;
		}

		let mut transactions = Vec::with_capacity(approvals.len() + 1);
		for (token, amount) in approvals {
			Self::evm(&token, "output token")?;
			let call = IERC20::approveCall {
				spender: settler,
				amount,
			};
			transactions.push(Transaction::call(chain_id, token, call.abi_encode()));
		}

		let filler_data = if intent.filler_data.is_empty() {
			solver.to_bytes32().to_vec()
		} else {
			intent.filler_data.clone()
		};
		let fill = IDestinationSettler::fillCall {
			orderId: order_id,
			originData: intent.raw_origin_data.clone().into(),
			fillerData: filler_data.into(),
		};
		transactions.push(
			Transaction::call(chain_id, intent.destination_settler.clone(), fill.abi_encode())
				.with_value(native)
				.with_gas_limit(self.fill_gas_limit),
		);

		Ok(transactions)
	}

	async fn generate_settle_transaction(
		&self,
		intent: &Intent,
		fill: &TransactionReceipt,
		solver: &Address,
	) -> Result<Transaction, OrderError> {
		let settler = self
			.origin_settlers
			.get(&intent.origin_chain_id)
			.ok_or_else(|| {
				OrderError::InvalidIntent(format!(
					"no origin settler configured for chain {}",
					intent.origin_chain_id
				))
			})?;
		let fill_hash: [u8; 32] = fill.hash.0.as_slice().try_into().map_err(|_| {
			OrderError::InvalidIntent(format!("fill hash {} is not 32 bytes", fill.hash))
		})?;

		let call = IOriginSettler::settleCall {
			orderId: Self::order_id(intent)?,
			originData: intent.raw_origin_data.clone().into(),
			filler: FixedBytes(solver.to_bytes32()),
			fillTxHash: FixedBytes(fill_hash),
		};
		Ok(
			Transaction::call(intent.origin_chain_id, settler.clone(), call.abi_encode())
				.with_gas_limit(self.settle_gas_limit),
		)
	}
}

/// Factory function to create an EIP-7683 order implementation from configuration.
///
/// Configuration parameters:
/// - `origin_settlers`: table of chain id to origin settler address
/// - `fill_gas_limit`: optional gas limit for the fill call
/// - `settle_gas_limit`: optional gas limit for the settle call
pub fn create_order(config: &toml::Value) -> Result<Box<dyn OrderInterface>, OrderError> {
	Eip7683OrderSchema
		.validate(config)
		.map_err(|e| OrderError::Configuration(e.to_string()))?;

	let mut origin_settlers = HashMap::new();
	if let Some(table) = config.get("origin_settlers").and_then(|v| v.as_table()) {
		for (chain, addr) in table {
			let chain_id = chain
				.parse::<u64>()
				.map_err(|e| OrderError::Configuration(format!("{}: {}", chain, e)))?;
			let address = addr
				.as_str()
				.ok_or_else(|| OrderError::Configuration(format!("origin_settlers.{}", chain)))
				.and_then(|s| {
					Address::from_str(s).map_err(|e| OrderError::Configuration(e.to_string()))
				})?;
			origin_settlers.insert(chain_id, address);
		}
	}

	let gas = |key: &str| {
		config
			.get(key)
			.and_then(|v| v.as_integer())
			.map(|n| n as u64)
	};

	Ok(Box::new(Eip7683Order::new(
		origin_settlers,
		gas("fill_gas_limit"),
		gas("settle_gas_limit"),
	)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use solver_types::{AssetAmount, OrderId, TransactionHash};

	fn addr(byte: u8) -> Address {
		Address(vec![byte; 20])
	}

	fn output(token: Address, amount: u64) -> AssetAmount {
		AssetAmount {
			chain_id: 20,
			token,
			amount: U256::from(amount),
			recipient: Some(addr(0x44)),
		}
	}

	fn intent(outputs: Vec<AssetAmount>) -> Intent {
		Intent {
			order_id: OrderId(vec![0xa1; 32]),
			protocol: "eip7683".into(),
			origin_chain_id: 10,
			destination_chain_id: 20,
			user: addr(0x01),
			inputs: vec![],
			outputs,
			fill_deadline: None,
			destination_settler: addr(0x33),
			raw_origin_data: vec![0xde, 0xad],
			filler_data: vec![],
			discovered_at_block: 100,
			log_index: 0,
			transaction_hash: TransactionHash(vec![0; 32]),
		}
	}

	fn order() -> Eip7683Order {
		Eip7683Order::new(HashMap::from([(10, addr(0xaa))]), Some(300_000), None)
	}

	#[tokio::test]
	async fn test_fill_approves_each_token_once() {
		let intent = intent(vec![
			output(addr(0x22), 40),
			output(addr(0x22), 60),
			output(Address::zero(), 5),
		]);
		let txs = order()
			.generate_fill_transactions(&intent, &addr(0x99))
			.await
			.unwrap();

		assert_eq!(txs.len(), 2);
		let approve = IERC20::approveCall::abi_decode(&txs[0].data, true).unwrap();
		assert_eq!(txs[0].to, Some(addr(0x22)));
		assert_eq!(approve.amount, U256::from(100u64));
		assert_eq!(Address::from(approve.spender), addr(0x33));

		let fill = &txs[1];
		assert_eq!(fill.to, Some(addr(0x33)));
		assert_eq!(fill.chain_id, 20);
		assert_eq!(fill.value, U256::from(5u64));
		assert_eq!(fill.gas_limit, Some(300_000));

		let call = IDestinationSettler::fillCall::abi_decode(&fill.data, true).unwrap();
		assert_eq!(call.orderId.0, [0xa1; 32]);
		assert_eq!(call.originData.to_vec(), vec![0xde, 0xad]);
		assert_eq!(call.fillerData.to_vec(), addr(0x99).to_bytes32().to_vec());
	}

	#[tokio::test]
	async fn test_settle_targets_origin_settler() {
		let intent = intent(vec![output(addr(0x22), 40)]);
		let receipt = TransactionReceipt {
			hash: TransactionHash(vec![0x0f; 32]),
			chain_id: 20,
			block_number: 7,
			success: true,
		};
		let tx = order()
			.generate_settle_transaction(&intent, &receipt, &addr(0x99))
			.await
			.unwrap();

		assert_eq!(tx.chain_id, 10);
		assert_eq!(tx.to, Some(addr(0xaa)));
		let call = IOriginSettler::settleCall::abi_decode(&tx.data, true).unwrap();
		assert_eq!(call.fillTxHash.0, [0x0f; 32]);
		assert_eq!(call.filler.0, addr(0x99).to_bytes32());
	}

	#[tokio::test]
	async fn test_settle_unknown_origin_chain() {
		let mut intent = intent(vec![output(addr(0x22), 40)]);
		intent.origin_chain_id = 99;
		let receipt = TransactionReceipt {
			hash: TransactionHash(vec![0x0f; 32]),
			chain_id: 20,
			block_number: 7,
			success: true,
		};
		let result = order()
			.generate_settle_transaction(&intent, &receipt, &addr(0x99))
			.await;
		assert!(matches!(result, Err(OrderError::InvalidIntent(_))));
	}

	#[tokio::test]
	async fn test_short_order_id_rejected() {
		let mut intent = intent(vec![output(addr(0x22), 40)]);
		intent.order_id = OrderId(vec![0xa1]);
		let result = order().generate_fill_transactions(&intent, &addr(0x99)).await;
		assert!(matches!(result, Err(OrderError::InvalidIntent(_))));
	}

	#[test]
	fn test_create_order_validates_gas_limits() {
		let config: toml::Value = toml::from_str(
			r#"
			fill_gas_limit = 100
			[origin_settlers]
			10 = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
			"#,
		)
		.unwrap();
		assert!(matches!(create_order(&config), Err(OrderError::Configuration(_))));

		let config: toml::Value = toml::from_str(
			r#"
			fill_gas_limit = 500000
			[origin_settlers]
			10 = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
			"#,
		)
		.unwrap();
		assert!(create_order(&config).is_ok());

		let config: toml::Value = toml::from_str(
			r#"
			fill_gas_limit = 500000
			settle_gas_limit = 20999
			[origin_settlers]
			10 = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
			"#,
		)
		.unwrap();
		assert!(matches!(create_order(&config), Err(OrderError::Configuration(_))));
	}
}
