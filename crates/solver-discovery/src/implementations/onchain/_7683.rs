//! ERC-7683 `Open` event decoding.
//!
//! The origin settler emits `Open(orderId, resolvedOrder)` when a user opens
//! an order. `minReceived` lists what the filler is paid on the origin chain
//! and `maxSpent` what the filler delivers on the destination chain.

use crate::{DiscoveryError, DiscoveryInterface};
use alloy_primitives::{Log as PrimLog, LogData, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use solver_types::{
	Address, AssetAmount, ConfigSchema, EventFilter, Field, FieldType, Intent, OrderId, RawEvent,
	Schema, ValidationError,
};
use std::collections::HashMap;
use std::str::FromStr;

sol! {
	struct Output {
		bytes32 token;
		uint256 amount;
		bytes32 recipient;
		uint256 chainId;
	}

	struct FillInstruction {
		uint64 destinationChainId;
		bytes32 destinationSettler;
		bytes originData;
	}

	struct ResolvedCrossChainOrder {
		address user;
		uint256 originChainId;
		uint32 openDeadline;
		uint32 fillDeadline;
		bytes32 orderId;
		Output[] maxSpent;
		Output[] minReceived;
		FillInstruction[] fillInstructions;
	}

	event Open(bytes32 indexed orderId, ResolvedCrossChainOrder order);
}

pub const PROTOCOL: &str = "eip7683";

pub struct Eip7683Discovery {
	/// Origin settler per chain id.
	origin_settlers: HashMap<u64, Address>,
}

impl Eip7683Discovery {
	pub fn new(origin_settlers: HashMap<u64, Address>) -> Self {
		Self { origin_settlers }
	}

	fn chain_id(value: U256, what: &str) -> Result<u64, DiscoveryError> {
		u64::try_from(value).map_err(|_| DiscoveryError::Parse(format!("{} out of range: {}", what, value)))
	}

	fn convert_outputs(outputs: &[Output]) -> Result<Vec<AssetAmount>, DiscoveryError> {
		outputs
			.iter()
			.map(|o| {
				Ok(AssetAmount {
					chain_id: Self::chain_id(o.chainId, "output chain id")?,
					token: Address::from_bytes32(&o.token.0),
					amount: o.amount,
					recipient: Some(Address::from_bytes32(&o.recipient.0)),
				})
			})
			.collect()
	}
}

/// Configuration schema for ERC-7683 discovery.
pub struct Eip7683DiscoverySchema;

impl ConfigSchema for Eip7683DiscoverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"origin_settlers",
				FieldType::Table(Schema::new(vec![], vec![])),
			)
			.with_validator(|value| {
				let table = value.as_table().ok_or("origin_settlers must be a table")?;
				if table.is_empty() {
					return Err("At least one origin settler is required".to_string());
				}
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
			vec![],
		);

		schema.validate(config)
	}
}

impl DiscoveryInterface for Eip7683Discovery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(Eip7683DiscoverySchema)
	}

	fn event_filter(&self, chain_id: u64) -> Option<EventFilter> {
		self.origin_settlers.get(&chain_id).map(|settler| EventFilter {
			addresses: vec![settler.clone()],
			topic0: Open::SIGNATURE_HASH.0,
		})
	}

	fn parse_event(&self, event: &RawEvent) -> Result<Intent, DiscoveryError> {
		let address = event
			.address
			.to_alloy()
			.ok_or_else(|| DiscoveryError::Parse("Log address is not 20 bytes".to_string()))?;
		let topics: Vec<B256> = event.topics.iter().map(|t| B256::from(*t)).collect();
		let data = LogData::new(topics, event.data.clone().into())
			.ok_or_else(|| DiscoveryError::Parse("Too many topics".to_string()))?;

		let open = Open::decode_log(&PrimLog { address, data }, true)
			.map_err(|e| DiscoveryError::Parse(format!("Failed to decode Open event: {}", e)))?;
		let order = &open.order;

		let origin_chain_id = Self::chain_id(order.originChainId, "origin chain id")?;
		if origin_chain_id != event.chain_id {
			return Err(DiscoveryError::Parse(format!(
				"Order claims origin chain {} but was emitted on chain {}",
				origin_chain_id, event.chain_id
			)));
		}

		let instruction = order
			.fillInstructions
			.first()
			.ok_or_else(|| DiscoveryError::Parse("Order has no fill instructions".to_string()))?;
		if order.maxSpent.is_empty() {
			return Err(DiscoveryError::Parse("Order has no outputs".to_string()));
		}

		Ok(Intent {
			order_id: OrderId::from(open.orderId.0),
			protocol: PROTOCOL.to_string(),
			origin_chain_id,
			destination_chain_id: instruction.destinationChainId,
			user: order.user.into(),
			inputs: Self::convert_outputs(&order.minReceived)?,
			outputs: Self::convert_outputs(&order.maxSpent)?,
			fill_deadline: (order.fillDeadline != 0).then_some(order.fillDeadline as u64),
			destination_settler: Address::from_bytes32(&instruction.destinationSettler.0),
			raw_origin_data: instruction.originData.to_vec(),
			filler_data: Vec::new(),
			discovered_at_block: event.block_number,
			log_index: event.log_index,
			transaction_hash: event.transaction_hash.clone(),
		})
	}
}

/// Factory function to create an ERC-7683 decoder from the protocol's `config` table.
///
/// Configuration parameters:
/// - `origin_settlers`: table of chain id to origin settler address
pub fn create_discovery(config: &toml::Value) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError> {
	Eip7683DiscoverySchema
		.validate(config)
		.map_err(|e| DiscoveryError::Configuration(e.to_string()))?;

	let mut origin_settlers = HashMap::new();
	if let Some(table) = config.get("origin_settlers").and_then(|v| v.as_table()) {
		for (chain, addr) in table {
			let chain_id = chain
				.parse::<u64>()
				.map_err(|e| DiscoveryError::Configuration(format!("{}: {}", chain, e)))?;
			let address = addr
				.as_str()
				.ok_or_else(|| DiscoveryError::Configuration(format!("{} is not a string", chain)))
				.and_then(|s| {
					Address::from_str(s).map_err(|e| DiscoveryError::Configuration(e.to_string()))
				})?;
			origin_settlers.insert(chain_id, address);
		}
	}

	Ok(Box::new(Eip7683Discovery::new(origin_settlers)))
}

/// Test helpers for building `Open` logs.
pub mod test_utils {
	use super::*;
	use alloy_primitives::{Address as AlloyAddress, FixedBytes};
	use solver_types::TransactionHash;

	/// Parameters of a single-output order.
	#[derive(Debug, Clone)]
	pub struct OpenOrder {
		pub order_id: [u8; 32],
		pub origin_chain_id: u64,
		pub destination_chain_id: u64,
		pub user: AlloyAddress,
		pub input_token: AlloyAddress,
		pub input_amount: U256,
		pub output_token: AlloyAddress,
		pub output_amount: U256,
		pub recipient: AlloyAddress,
		pub destination_settler: AlloyAddress,
		pub fill_deadline: u32,
	}

	fn word(address: AlloyAddress) -> FixedBytes<32> {
		Address::from(address).to_bytes32().into()
	}

	/// Encodes `order` as the `Open` log an origin settler would emit.
	pub fn open_event(
		order: &OpenOrder,
		settler: AlloyAddress,
		block_number: u64,
		log_index: u64,
	) -> RawEvent {
		let resolved = ResolvedCrossChainOrder {
			user: order.user,
			originChainId: U256::from(order.origin_chain_id),
			openDeadline: 0,
			fillDeadline: order.fill_deadline,
			orderId: order.order_id.into(),
			maxSpent: vec![Output {
				token: word(order.output_token),
				amount: order.output_amount,
				recipient: word(order.recipient),
				chainId: U256::from(order.destination_chain_id),
			}],
			minReceived: vec![Output {
				token: word(order.input_token),
				amount: order.input_amount,
				recipient: FixedBytes::ZERO,
				chainId: U256::from(order.origin_chain_id),
			}],
			fillInstructions: vec![FillInstruction {
				destinationChainId: order.destination_chain_id,
				destinationSettler: word(order.destination_settler),
				originData: vec![0xde, 0xad].into(),
			}],
		};

		let log = Open {
			orderId: order.order_id.into(),
			order: resolved,
		}
		.encode_log_data();

		RawEvent {
			chain_id: order.origin_chain_id,
			address: settler.into(),
			topics: log.topics().iter().map(|t| t.0).collect(),
			data: log.data.to_vec(),
			block_number,
			log_index,
			transaction_hash: TransactionHash(vec![log_index as u8; 32]),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::test_utils::*;
	use super::*;
	use alloy_primitives::Address as AlloyAddress;

	fn order() -> OpenOrder {
		let mut order_id = [0u8; 32];
		order_id[31] = 0xa1;
		OpenOrder {
			order_id,
			origin_chain_id: 10,
			destination_chain_id: 20,
			user: AlloyAddress::repeat_byte(0x01),
			input_token: AlloyAddress::repeat_byte(0x02),
			input_amount: U256::from(1_010u64),
			output_token: AlloyAddress::repeat_byte(0x03),
			output_amount: U256::from(1_000u64),
			recipient: AlloyAddress::repeat_byte(0x04),
			destination_settler: AlloyAddress::repeat_byte(0x05),
			fill_deadline: 4_000_000_000,
		}
	}

	fn discovery() -> Eip7683Discovery {
		let mut settlers = HashMap::new();
		settlers.insert(10, AlloyAddress::repeat_byte(0xaa).into());
		Eip7683Discovery::new(settlers)
	}

	#[test]
	fn test_parse_open_event() {
		let event = open_event(&order(), AlloyAddress::repeat_byte(0xaa), 42, 3);
		let intent = discovery().parse_event(&event).unwrap();

		assert_eq!(intent.order_id.0[31], 0xa1);
		assert_eq!(intent.origin_chain_id, 10);
		assert_eq!(intent.destination_chain_id, 20);
		assert_eq!(intent.inputs[0].amount, U256::from(1_010u64));
		assert_eq!(intent.outputs[0].chain_id, 20);
		assert_eq!(intent.outputs[0].token, AlloyAddress::repeat_byte(0x03).into());
		assert_eq!(intent.destination_settler, AlloyAddress::repeat_byte(0x05).into());
		assert_eq!(intent.raw_origin_data, vec![0xde, 0xad]);
		assert_eq!(intent.fill_deadline, Some(4_000_000_000));
		assert_eq!((intent.discovered_at_block, intent.log_index), (42, 3));
	}

	#[test]
	fn test_malformed_data_is_parse_error() {
		let mut event = open_event(&order(), AlloyAddress::repeat_byte(0xaa), 42, 3);
		event.data.truncate(40);
		assert!(matches!(
			discovery().parse_event(&event),
			Err(DiscoveryError::Parse(_))
		));
	}

	#[test]
	fn test_origin_chain_mismatch() {
		let mut event = open_event(&order(), AlloyAddress::repeat_byte(0xaa), 42, 3);
		event.chain_id = 11;
		assert!(matches!(
			discovery().parse_event(&event),
			Err(DiscoveryError::Parse(_))
		));
	}

	#[test]
	fn test_filter_only_for_configured_chains() {
		let discovery = discovery();
		let filter = discovery.event_filter(10).unwrap();
		assert_eq!(filter.topic0, Open::SIGNATURE_HASH.0);
		assert!(discovery.event_filter(20).is_none());
	}

	#[test]
	fn test_factory_validates_settlers() {
		let config: toml::Value = toml::from_str("[origin_settlers]").unwrap();
		assert!(create_discovery(&config).is_err());

		let config: toml::Value = toml::from_str(
			r#"
			[origin_settlers]
			10 = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
			"#,
		)
		.unwrap();
		let discovery = create_discovery(&config).unwrap();
		assert!(discovery.event_filter(10).is_some());
	}
}
