//! Solver orchestration.
//!
//! [`SolverBuilder`] assembles the services named in configuration into a
//! [`SolverManager`], which runs one [`Filler`] per enabled protocol and one
//! [`Listener`] per (protocol, chain) pair until stopped.

use solver_account::{AccountError, AccountInterface, AccountService};
use solver_config::{ChainConfig, Config, ProtocolConfig};
use solver_delivery::{DeliveryConfig, DeliveryError, DeliveryInterface, DeliveryService};
use solver_discovery::{
	DiscoveryError, DiscoveryInterface, EventSourceInterface, EventSourceService, Listener,
	ListenerConfig,
};
use solver_order::rules::Reservations;
use solver_order::OrderInterface;
use solver_settlement::SettlementService;
use solver_storage::{CheckpointStore, IntentStore, StorageError, StorageInterface, StorageService};
use solver_types::{Address, EventBus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod error;
pub mod filler;
pub mod registry;

pub use error::{FillerError, SolverError};
pub use filler::{Filler, FillerConfig, ProcessOutcome};
pub use registry::{ProtocolFactories, ProtocolRegistry};

/// Services shared by every Listener and Filler.
#[derive(Clone)]
pub struct SolverContext {
	pub storage: Arc<StorageService>,
	pub checkpoints: Arc<CheckpointStore>,
	pub intents: Arc<IntentStore>,
	pub chains: Arc<EventSourceService>,
	pub delivery: Arc<DeliveryService>,
	/// Outputs held by accepted intents across all protocols.
	pub reservations: Arc<Reservations>,
	pub events: EventBus,
}

impl SolverContext {
	pub fn new(
		storage: Arc<StorageService>,
		chains: Arc<EventSourceService>,
		delivery: Arc<DeliveryService>,
		events: EventBus,
	) -> Self {
		Self {
			checkpoints: Arc::new(CheckpointStore::new(storage.clone())),
			intents: Arc::new(IntentStore::new(storage.clone())),
			storage,
			chains,
			delivery,
			reservations: Arc::new(Reservations::new()),
			events,
		}
	}
}

struct ProtocolRuntime {
	name: String,
	config: ProtocolConfig,
	discovery: Arc<dyn DiscoveryInterface>,
	filler: Arc<Filler>,
}

pub struct SolverManager {
	config: Arc<Config>,
	context: SolverContext,
	account: Arc<AccountService>,
	protocols: Vec<ProtocolRuntime>,
	cancel: CancellationToken,
	tasks: Mutex<JoinSet<()>>,
	started: AtomicBool,
}

impl SolverManager {
	/// Spawns every Filler and Listener.
	///
	/// Intents recorded but not finished by a previous run are handed to their
	/// Filler before the Listeners start polling.
	pub async fn start(&self) -> Result<(), SolverError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(SolverError::Service("Solver already started".to_string()));
		}

		let mut wiring = Vec::with_capacity(self.protocols.len());
		for protocol in &self.protocols {
			let (sender, receiver) = mpsc::channel(self.config.solver.channel_capacity);
			let mut listeners = Vec::with_capacity(protocol.config.chains.len());
			for &chain_id in &protocol.config.chains {
				let listener_config = ListenerConfig {
					poll_interval: protocol.config.poll_interval(),
					confirmation_depth: protocol.config.confirmation_depth,
					max_block_range: protocol.config.max_block_range,
					start_block: protocol.config.start_blocks.get(&chain_id).copied(),
				};
				listeners.push(Listener::new(
					protocol.name.clone(),
					chain_id,
					listener_config,
					self.context.chains.clone(),
					protocol.discovery.clone(),
					self.context.checkpoints.clone(),
					self.context.intents.clone(),
					self.context.events.clone(),
					sender.clone(),
				)?);
			}
			wiring.push((protocol, sender, receiver, listeners));
		}

		let mut tasks = self.tasks.lock().await;
		for (protocol, sender, receiver, listeners) in wiring {
			tasks.spawn(protocol.filler.clone().run(receiver, self.cancel.clone()));

			let pending = self.context.intents.pending(&protocol.name).await?;
			if !pending.is_empty() {
				tracing::info!(protocol = %protocol.name, count = pending.len(), "Re-delivering unfinished intents");
			}
			for record in pending {
				sender.send(record.intent).await.map_err(|_| {
					SolverError::Service(format!("Filler for {} stopped during startup", protocol.name))
				})?;
			}

			for listener in listeners {
				tasks.spawn(listener.run(self.cancel.clone()));
			}
		}

		tracing::info!(
			solver = %self.config.solver.id,
			protocols = self.protocols.len(),
			tasks = tasks.len(),
			"Solver started"
		);
		Ok(())
	}

	/// Cancels all tasks and waits for them to finish.
	///
	/// Listeners complete their current cycle; Fillers drain in-flight intents
	/// within `solver.shutdown_timeout_secs`.
	pub async fn stop(&self) {
		tracing::info!("Stopping solver");
		self.cancel.cancel();

		let mut tasks = self.tasks.lock().await;
		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				tracing::error!(error = %e, "Solver task failed");
			}
		}
		tracing::info!("Solver stopped");
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.context.events
	}

	pub fn context(&self) -> &SolverContext {
		&self.context
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn account(&self) -> &AccountService {
		&self.account
	}

	pub fn solver_address(&self) -> &Address {
		self.context.delivery.account()
	}

	/// Filler of `protocol`, if that protocol is enabled.
	pub fn filler(&self, protocol: &str) -> Option<Arc<Filler>> {
		self.protocols
			.iter()
			.find(|p| p.name == protocol)
			.map(|p| p.filler.clone())
	}
}

// Type aliases for factory functions
type StorageFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> + Send>;
type AccountFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send>;
type EventSourceFactory =
	Box<dyn Fn(u64, &ChainConfig) -> Result<Box<dyn EventSourceInterface>, DiscoveryError> + Send>;
type DeliveryFactory = Box<
	dyn Fn(u64, &ChainConfig, &AccountService) -> Result<Box<dyn DeliveryInterface>, DeliveryError>
		+ Send,
>;

// Factory pattern for creating services from config
pub struct SolverBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	account_factories: HashMap<String, AccountFactory>,
	event_source_factory: Option<EventSourceFactory>,
	delivery_factory: Option<DeliveryFactory>,
	registry: ProtocolRegistry,
}

impl SolverBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			account_factories: HashMap::new(),
			event_source_factory: None,
			delivery_factory: None,
			registry: ProtocolRegistry::with_defaults(),
		}
	}

	pub fn with_storage_factory<F>(mut self, backend: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> + Send + 'static,
	{
		self.storage_factories
			.insert(backend.to_string(), Box::new(factory));
		self
	}

	pub fn with_account_factory<F>(mut self, provider: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send + 'static,
	{
		self.account_factories
			.insert(provider.to_string(), Box::new(factory));
		self
	}

	pub fn with_event_source_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(u64, &ChainConfig) -> Result<Box<dyn EventSourceInterface>, DiscoveryError>
			+ Send
			+ 'static,
	{
		self.event_source_factory = Some(Box::new(factory));
		self
	}

	pub fn with_delivery_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(u64, &ChainConfig, &AccountService) -> Result<Box<dyn DeliveryInterface>, DeliveryError>
			+ Send
			+ 'static,
	{
		self.delivery_factory = Some(Box::new(factory));
		self
	}

	pub fn with_protocol_registry(mut self, registry: ProtocolRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub async fn build(self) -> Result<SolverManager, SolverError> {
		let config = self.config;

		let storage_factory = self
			.storage_factories
			.get(&config.storage.backend)
			.ok_or_else(|| {
				SolverError::Config(format!("Unknown storage backend '{}'", config.storage.backend))
			})?;
		let storage = Arc::new(StorageService::new(storage_factory(&config.storage.config)?));

		let account_factory = self
			.account_factories
			.get(&config.account.provider)
			.ok_or_else(|| {
				SolverError::Config(format!("Unknown account provider '{}'", config.account.provider))
			})?;
		let account = Arc::new(AccountService::new(account_factory(&config.account.config)?));
		let solver_address = account.get_address().await?;

		let event_source_factory = self
			.event_source_factory
			.ok_or_else(|| SolverError::Config("Event source factory not provided".into()))?;
		let delivery_factory = self
			.delivery_factory
			.ok_or_else(|| SolverError::Config("Delivery factory not provided".into()))?;

		let mut chain_ids: Vec<u64> = config.chains.keys().copied().collect();
		chain_ids.sort_unstable();
		let mut sources = Vec::with_capacity(chain_ids.len());
		let mut providers = Vec::with_capacity(chain_ids.len());
		for chain_id in chain_ids {
			let chain = &config.chains[&chain_id];
			sources.push(event_source_factory(chain_id, chain)?);
			providers.push(delivery_factory(chain_id, chain, &account)?);
		}

		let chains = Arc::new(EventSourceService::new(sources, config.retry.rpc_timeout()));
		let delivery = Arc::new(DeliveryService::new(
			providers,
			solver_address.clone(),
			DeliveryConfig {
				confirmations: config.delivery.confirmations,
				confirmation_timeout: config.retry.confirmation_timeout(),
				poll_interval: config.delivery.receipt_poll_interval(),
				rpc_timeout: config.retry.rpc_timeout(),
			},
		));
		let events = EventBus::new(config.solver.event_bus_capacity);
		let context = SolverContext::new(storage, chains, delivery, events);

		let filler_config = FillerConfig {
			max_attempts: config.retry.max_attempts,
			initial_backoff: config.retry.initial_backoff(),
			max_backoff: config.retry.max_backoff(),
			settlement_timeout: config.retry.settlement_timeout(),
			max_concurrent: config.solver.max_concurrent_fills,
			shutdown_timeout: config.solver.shutdown_timeout(),
		};

		let mut enabled: Vec<(&String, &ProtocolConfig)> = config.enabled_protocols().collect();
		enabled.sort_by(|a, b| a.0.cmp(b.0));

		let mut protocols = Vec::with_capacity(enabled.len());
		for (name, protocol) in enabled {
			let factories = self
				.registry
				.get(name)
				.ok_or_else(|| SolverError::Config(format!("Unknown protocol '{}'", name)))?;

			let discovery: Arc<dyn DiscoveryInterface> =
				Arc::from((factories.discovery)(&protocol.config)?);
			for &chain_id in &protocol.chains {
				if discovery.event_filter(chain_id).is_none() {
					return Err(SolverError::Config(format!(
						"protocols.{} is not deployed on chain {}",
						name, chain_id
					)));
				}
			}

			let order: Arc<dyn OrderInterface> = Arc::from((factories.order)(&protocol.config)?);
			let settlement = Arc::new(SettlementService::new(
				(factories.settlement)(&protocol.config, context.chains.clone())?,
				config.retry.settlement_poll_interval(),
			));
			let filler = Filler::new(
				name.clone(),
				protocol.rules.clone(),
				order,
				settlement,
				context.clone(),
				filler_config.clone(),
			)
			.map_err(|e| SolverError::Config(format!("protocols.{}: {}", name, e)))?;

			protocols.push(ProtocolRuntime {
				name: name.clone(),
				config: protocol.clone(),
				discovery,
				filler: Arc::new(filler),
			});
		}

		tracing::info!(
			solver = %config.solver.id,
			address = %solver_address,
			chains = config.chains.len(),
			protocols = protocols.len(),
			"Solver built"
		);

		Ok(SolverManager {
			config: Arc::new(config),
			context,
			account,
			protocols,
			cancel: CancellationToken::new(),
			tasks: Mutex::new(JoinSet::new()),
			started: AtomicBool::new(false),
		})
	}
}
