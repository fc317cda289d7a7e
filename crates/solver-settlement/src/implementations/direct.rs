//! Settlement against the origin settler once the fill is final on the
//! destination chain.

use crate::{SettlementError, SettlementInterface};
use async_trait::async_trait;
use solver_discovery::EventSourceService;
use solver_types::{ConfigSchema, Field, FieldType, Intent, Schema, TransactionReceipt, ValidationError};
use std::sync::Arc;

const DEFAULT_FINALITY_BLOCKS: u64 = 2;

pub struct DirectSettlement {
	chains: Arc<EventSourceService>,
	/// Blocks that must be built on top of the fill block.
	finality_blocks: u64,
}

impl DirectSettlement {
	pub fn new(chains: Arc<EventSourceService>, finality_blocks: u64) -> Self {
		Self {
			chains,
			finality_blocks,
		}
	}
}

pub struct DirectSettlementSchema;

impl ConfigSchema for DirectSettlementSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"finality_blocks",
				FieldType::Integer {
					min: Some(0),
					max: Some(10_000),
				},
			)],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl SettlementInterface for DirectSettlement {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(DirectSettlementSchema)
	}

	async fn validate_fill(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
	) -> Result<(), SettlementError> {
		if !receipt.success {
			return Err(SettlementError::ValidationFailed(format!(
				"fill {} reverted",
				receipt.hash
			)));
		}
		if receipt.chain_id != intent.destination_chain_id {
			return Err(SettlementError::ValidationFailed(format!(
				"fill {} on chain {}, expected {}",
				receipt.hash, receipt.chain_id, intent.destination_chain_id
			)));
		}
		Ok(())
	}

	async fn can_settle(
		&self,
		intent: &Intent,
		receipt: &TransactionReceipt,
	) -> Result<bool, SettlementError> {
		let head = self.chains.get_block_height(intent.destination_chain_id).await?;
		let ready = head >= receipt.block_number.saturating_add(self.finality_blocks);
		tracing::debug!(
			order_id = %intent.order_id,
			head,
			fill_block = receipt.block_number,
			ready,
			"Checked settlement readiness"
		);
		Ok(ready)
	}
}

/// Factory function to create a direct settlement implementation from configuration.
///
/// Configuration parameters:
/// - `finality_blocks`: blocks required on top of the fill block (default 2)
pub fn create_settlement(
	config: &toml::Value,
	chains: Arc<EventSourceService>,
) -> Result<Box<dyn SettlementInterface>, SettlementError> {
	DirectSettlementSchema
		.validate(config)
		.map_err(|e| SettlementError::Configuration(e.to_string()))?;

	let finality_blocks = config
		.get("finality_blocks")
		.and_then(|v| v.as_integer())
		.map(|n| n as u64)
		.unwrap_or(DEFAULT_FINALITY_BLOCKS);

	Ok(Box::new(DirectSettlement::new(chains, finality_blocks)))
}
