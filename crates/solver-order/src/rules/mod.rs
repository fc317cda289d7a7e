//! Ordered accept/reject pipeline over a parsed intent.

use alloy_primitives::U256;
use async_trait::async_trait;
use solver_discovery::{DiscoveryError, EventSourceService};
use solver_storage::CheckpointStore;
use solver_types::{Address, Intent, Rejection, RuleOutcome, RulesConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::OrderError;

mod canonical;
mod reservations;

pub use canonical::*;
pub use reservations::{Hold, Reservations};

/// A single predicate over an intent.
///
/// Rules only read chain and solver state, apart from [`Solvency`] holding
/// the outputs it approved in [`RuleContext::reservations`]. Running one twice
/// on the same intent and context yields the same outcome.
#[async_trait]
pub trait Rule: Send + Sync {
	fn name(&self) -> &str;

	async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> RuleOutcome;
}

/// Read-only inputs for one intent's evaluation.
pub struct RuleContext {
	pub protocol: String,
	pub config: Arc<RulesConfig>,
	pub chains: Arc<EventSourceService>,
	pub checkpoints: Arc<CheckpointStore>,
	pub reservations: Arc<Reservations>,
	pub solver: Address,
	/// Unix timestamp the evaluation is anchored to.
	pub now: u64,
	balances: Mutex<HashMap<(u64, Address), U256>>,
}

impl RuleContext {
	pub fn new(
		protocol: impl Into<String>,
		config: Arc<RulesConfig>,
		chains: Arc<EventSourceService>,
		checkpoints: Arc<CheckpointStore>,
		reservations: Arc<Reservations>,
		solver: Address,
		now: u64,
	) -> Self {
		Self {
			protocol: protocol.into(),
			config,
			chains,
			checkpoints,
			reservations,
			solver,
			now,
			balances: Mutex::new(HashMap::new()),
		}
	}

	/// Solver balance of `token` on `chain_id`, fetched once per evaluation.
	/// The zero address reads the native balance.
	pub async fn solver_balance(&self, chain_id: u64, token: &Address) -> Result<U256, DiscoveryError> {
		let key = (chain_id, token.clone());
		if let Some(balance) = self.balances.lock().await.get(&key) {
			return Ok(*balance);
		}

		let token_arg = (!token.is_zero()).then_some(token);
		let balance = self
			.chains
			.get_balance(chain_id, &self.solver, token_arg)
			.await?;
		self.balances.lock().await.insert(key, balance);
		Ok(balance)
	}
}

pub struct RuleEngine {
	rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
	pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
		Self { rules }
	}

	/// Builds the pipeline named by `config.order`.
	pub fn from_config(config: &RulesConfig) -> Result<Self, OrderError> {
		let rules = config
			.order
			.iter()
			.map(|name| canonical_rule(name).ok_or_else(|| OrderError::UnknownRule(name.clone())))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Self::new(rules))
	}

	pub fn rule_names(&self) -> Vec<&str> {
		self.rules.iter().map(|r| r.name()).collect()
	}

	/// Evaluates rules in order and stops at the first rejection.
	pub async fn evaluate(&self, intent: &Intent, ctx: &RuleContext) -> Result<(), Rejection> {
		for rule in &self.rules {
			match rule.evaluate(intent, ctx).await {
				RuleOutcome::Pass => {
					tracing::trace!(rule = rule.name(), "Rule passed");
				}
				RuleOutcome::Reject(reason) => {
					return Err(Rejection {
						rule: rule.name().to_string(),
						reason,
					});
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use solver_storage::implementations::memory::MemoryStorage;
	use solver_storage::StorageService;
	use solver_types::{OrderId, TransactionHash};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	struct Fixed {
		name: &'static str,
		outcome: RuleOutcome,
		calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl Rule for Fixed {
		fn name(&self) -> &str {
			self.name
		}

		async fn evaluate(&self, _intent: &Intent, _ctx: &RuleContext) -> RuleOutcome {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.outcome.clone()
		}
	}

	fn context() -> RuleContext {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		RuleContext::new(
			"eip7683",
			Arc::new(RulesConfig::default()),
			Arc::new(EventSourceService::new(vec![], Duration::from_secs(1))),
			Arc::new(CheckpointStore::new(storage)),
			Arc::new(Reservations::new()),
			Address::zero(),
			0,
		)
	}

	fn intent() -> Intent {
		Intent {
			order_id: OrderId(vec![0xa1]),
			protocol: "eip7683".into(),
			origin_chain_id: 10,
			destination_chain_id: 20,
			user: Address::zero(),
			inputs: vec![],
			outputs: vec![],
			fill_deadline: None,
			destination_settler: Address::zero(),
			raw_origin_data: vec![],
			filler_data: vec![],
			discovered_at_block: 0,
			log_index: 0,
			transaction_hash: TransactionHash(vec![]),
		}
	}

	#[tokio::test]
	async fn test_short_circuits_on_first_rejection() {
		let first = Arc::new(AtomicUsize::new(0));
		let second = Arc::new(AtomicUsize::new(0));
		let engine = RuleEngine::new(vec![
			Box::new(Fixed {
				name: "r1",
				outcome: RuleOutcome::reject("nope"),
				calls: first.clone(),
			}),
			Box::new(Fixed {
				name: "r2",
				outcome: RuleOutcome::Pass,
				calls: second.clone(),
			}),
		]);

		let rejection = engine.evaluate(&intent(), &context()).await.unwrap_err();
		assert_eq!(rejection.rule, "r1");
		assert_eq!(rejection.reason, "nope");
		assert_eq!(first.load(Ordering::SeqCst), 1);
		assert_eq!(second.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn test_unknown_rule_name() {
		let config = RulesConfig {
			order: vec!["token_allow_list".into(), "moon_phase".into()],
			..Default::default()
		};
		assert!(matches!(
			RuleEngine::from_config(&config),
			Err(OrderError::UnknownRule(name)) if name == "moon_phase"
		));
	}

	#[test]
	fn test_default_pipeline_order() {
		let engine = RuleEngine::from_config(&RulesConfig::default()).unwrap();
		assert_eq!(engine.rule_names(), solver_types::CANONICAL_RULES.to_vec());
	}
}
