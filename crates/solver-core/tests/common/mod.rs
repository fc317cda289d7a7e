//! In-memory chains and a solver wired against them.

#![allow(dead_code)]

use alloy_primitives::{Address as AlloyAddress, U256};
use async_trait::async_trait;
use solver_core::{SolverBuilder, SolverManager};
use solver_config::ConfigLoader;
use solver_delivery::{DeliveryError, DeliveryInterface};
use solver_discovery::implementations::onchain::_7683::test_utils::{open_event, OpenOrder};
use solver_discovery::implementations::onchain::_7683::Eip7683Discovery;
use solver_discovery::{DiscoveryError, DiscoveryInterface, EventSourceInterface};
use solver_storage::implementations::memory::create_storage;
use solver_types::{
	Address, ConfigSchema, EventFilter, Intent, RawEvent, Schema, Transaction, TransactionHash,
	TransactionReceipt, ValidationError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const ORIGIN: u64 = 10;
pub const DESTINATION: u64 = 20;
pub const HEIGHT: u64 = 100;

pub const CONFIG: &str = r#"
[solver]
id = "e2e-solver"
max_concurrent_fills = 4
shutdown_timeout_secs = 5

[storage]
backend = "memory"

[account]
provider = "local"
[account.config]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[chains.10]
rpc_url = "http://origin.test"

[chains.20]
rpc_url = "http://destination.test"

[delivery]
confirmations = 1
receipt_poll_ms = 5

[retry]
max_attempts = 3
initial_backoff_ms = 5
max_backoff_ms = 20
rpc_timeout_secs = 2
confirmation_timeout_secs = 2
settlement_timeout_secs = 5
settlement_poll_secs = 1

[protocols.eip7683]
enabled = true
chains = [10]
poll_interval_secs = 1
confirmation_depth = 0
start_blocks = { 10 = 1 }

[protocols.eip7683.rules]
min_profit_bps = 10
deadline_buffer_secs = 60

[[protocols.eip7683.rules.allowed_tokens]]
chain_id = 10
address = "0x0202020202020202020202020202020202020202"

[[protocols.eip7683.rules.allowed_tokens]]
chain_id = 20
address = "0x0303030303030303030303030303030303030303"

[protocols.eip7683.config]
finality_blocks = 0
origin_settlers = { 10 = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa" }
"#;

pub fn origin_settler() -> AlloyAddress {
	AlloyAddress::repeat_byte(0xaa)
}

#[derive(Default)]
pub struct ChainState {
	pub height: AtomicU64,
	pub events: Mutex<Vec<RawEvent>>,
	/// Number of upcoming log queries that fail.
	pub failing_queries: AtomicU32,
	/// Number of upcoming block height reads that fail.
	pub failing_heights: AtomicU32,
	pub queries: AtomicU32,
	pub submitted: Mutex<Vec<Transaction>>,
	pub receipts: Mutex<HashMap<Vec<u8>, TransactionReceipt>>,
	/// Receipt delay for the transaction that will use a given nonce.
	pub receipt_delays: Mutex<HashMap<u64, Duration>>,
	/// Earliest time a delayed receipt is visible.
	visible_at: Mutex<HashMap<Vec<u8>, Instant>>,
	/// Mine every later transaction as reverted.
	pub revert: AtomicBool,
	/// Solver balance of every token. Unlimited when unset.
	pub balance: Mutex<Option<U256>>,
	next_nonce: AtomicU64,
}

/// One chain serving both reads and submissions.
#[derive(Clone)]
pub struct FakeChain {
	pub chain_id: u64,
	pub state: Arc<ChainState>,
}

impl FakeChain {
	pub fn new(chain_id: u64) -> Self {
		let state = ChainState::default();
		state.height.store(HEIGHT, Ordering::SeqCst);
		Self {
			chain_id,
			state: Arc::new(state),
		}
	}

	pub fn push_event(&self, event: RawEvent) {
		self.state.events.lock().unwrap().push(event);
	}

	pub fn submitted(&self) -> Vec<Transaction> {
		self.state.submitted.lock().unwrap().clone()
	}

	pub fn nonces(&self) -> Vec<u64> {
		self.submitted().iter().filter_map(|tx| tx.nonce).collect()
	}

	/// Withholds the receipt of the transaction submitted with `nonce` for `delay`.
	pub fn delay_receipt(&self, nonce: u64, delay: Duration) {
		self.state.receipt_delays.lock().unwrap().insert(nonce, delay);
	}

	/// Transactions submitted to `to`.
	pub fn submitted_to(&self, to: &Address) -> usize {
		self.submitted().iter().filter(|tx| tx.to.as_ref() == Some(to)).count()
	}

	/// Registers a mined transaction the solver did not submit in this run.
	pub fn mine(&self, hash: TransactionHash, block_number: u64) {
		self.state.receipts.lock().unwrap().insert(
			hash.0.clone(),
			TransactionReceipt {
				hash,
				chain_id: self.chain_id,
				block_number,
				success: true,
			},
		);
	}
}

struct NoSchema;

impl ConfigSchema for NoSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl EventSourceInterface for FakeChain {
	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn get_block_height(&self) -> Result<u64, DiscoveryError> {
		let failing = self.state.failing_heights.load(Ordering::SeqCst);
		if failing > 0 {
			self.state.failing_heights.store(failing - 1, Ordering::SeqCst);
			return Err(DiscoveryError::Rpc("connection reset".into()));
		}
		Ok(self.state.height.load(Ordering::SeqCst))
	}

	async fn query_events(
		&self,
		filter: &EventFilter,
		from: u64,
		to: u64,
	) -> Result<Vec<RawEvent>, DiscoveryError> {
		self.state.queries.fetch_add(1, Ordering::SeqCst);
		let failing = self.state.failing_queries.load(Ordering::SeqCst);
		if failing > 0 {
			self.state.failing_queries.store(failing - 1, Ordering::SeqCst);
			return Err(DiscoveryError::Rpc("503 Service Unavailable".into()));
		}
		Ok(self
			.state
			.events
			.lock()
			.unwrap()
			.iter()
			.filter(|e| filter.addresses.contains(&e.address))
			.filter(|e| e.topics.first() == Some(&filter.topic0))
			.filter(|e| (from..=to).contains(&e.block_number))
			.cloned()
			.collect())
	}

	async fn get_balance(
		&self,
		_owner: &Address,
		_token: Option<&Address>,
	) -> Result<U256, DiscoveryError> {
		Ok(self
			.state
			.balance
			.lock()
			.unwrap()
			.unwrap_or(U256::from(u128::MAX)))
	}
}

#[async_trait]
impl DeliveryInterface for FakeChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		tokio::task::yield_now().await;
		let nonce = tx.nonce.unwrap_or_default();
		let mut hash = vec![0u8; 32];
		hash[0] = self.chain_id as u8;
		hash[24..].copy_from_slice(&nonce.to_be_bytes());
		let hash = TransactionHash(hash);

		self.state.next_nonce.fetch_max(nonce + 1, Ordering::SeqCst);
		self.state.submitted.lock().unwrap().push(tx);
		if let Some(delay) = self.state.receipt_delays.lock().unwrap().remove(&nonce) {
			self.state
				.visible_at
				.lock()
				.unwrap()
				.insert(hash.0.clone(), Instant::now() + delay);
		}
		self.state.receipts.lock().unwrap().insert(
			hash.0.clone(),
			TransactionReceipt {
				hash: hash.clone(),
				chain_id: self.chain_id,
				block_number: self.state.height.load(Ordering::SeqCst) - 1,
				success: !self.state.revert.load(Ordering::SeqCst),
			},
		);
		Ok(hash)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let visible_at = self.state.visible_at.lock().unwrap().get(&hash.0).copied();
		if visible_at.is_some_and(|at| Instant::now() < at) {
			return Ok(None);
		}
		Ok(self.state.receipts.lock().unwrap().get(&hash.0).cloned())
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		Ok(self.state.height.load(Ordering::SeqCst))
	}

	async fn pending_nonce(&self, _account: &Address) -> Result<u64, DeliveryError> {
		Ok(self.state.next_nonce.load(Ordering::SeqCst))
	}
}

#[derive(Clone)]
pub struct TestNetwork {
	pub origin: FakeChain,
	pub destination: FakeChain,
}

impl TestNetwork {
	pub fn new() -> Self {
		Self {
			origin: FakeChain::new(ORIGIN),
			destination: FakeChain::new(DESTINATION),
		}
	}

	fn chain(&self, chain_id: u64) -> Option<FakeChain> {
		match chain_id {
			ORIGIN => Some(self.origin.clone()),
			DESTINATION => Some(self.destination.clone()),
			_ => None,
		}
	}

	/// Builds a solver reading from and submitting to this network.
	pub async fn solver(&self) -> SolverManager {
		self.solver_with_config(CONFIG).await
	}

	pub async fn solver_with_config(&self, config: &str) -> SolverManager {
		let config = ConfigLoader::new().load_str(config).unwrap();
		let reads = self.clone();
		let writes = self.clone();

		SolverBuilder::new(config)
			.with_storage_factory("memory", create_storage)
			.with_storage_factory(
				"file",
				solver_storage::implementations::file::create_storage,
			)
			.with_account_factory(
				"local",
				solver_account::implementations::local::create_account,
			)
			.with_event_source_factory(move |chain_id, _| {
				reads
					.chain(chain_id)
					.map(|c| Box::new(c) as Box<dyn EventSourceInterface>)
					.ok_or(DiscoveryError::UnknownChain(chain_id))
			})
			.with_delivery_factory(move |chain_id, _, _| {
				writes
					.chain(chain_id)
					.map(|c| Box::new(c) as Box<dyn DeliveryInterface>)
					.ok_or(DeliveryError::UnknownChain(chain_id))
			})
			.build()
			.await
			.unwrap()
	}
}

pub fn order(id: u8) -> OpenOrder {
	let mut order_id = [0u8; 32];
	order_id[31] = id;
	OpenOrder {
		order_id,
		origin_chain_id: ORIGIN,
		destination_chain_id: DESTINATION,
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

pub fn event(order: &OpenOrder, block_number: u64, log_index: u64) -> RawEvent {
	open_event(order, origin_settler(), block_number, log_index)
}

/// The intent a Listener would hand off for `order`.
pub fn intent(order: &OpenOrder) -> Intent {
	let mut settlers = HashMap::new();
	settlers.insert(ORIGIN, Address::from(origin_settler()));
	let mut intent = Eip7683Discovery::new(settlers)
		.parse_event(&event(order, 5, 0))
		.unwrap();
	intent.protocol = "eip7683".to_string();
	intent
}
