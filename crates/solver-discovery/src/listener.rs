//! Polling loop for one (protocol, chain) pair.

use crate::{DiscoveryError, DiscoveryInterface, EventSourceService};
use solver_storage::{CheckpointStore, IntentStore, StorageError};
use solver_types::{truncate_id, EventBus, EventFilter, Intent, SolverEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ListenerError {
	#[error(transparent)]
	Discovery(#[from] DiscoveryError),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("Protocol {protocol} has no intent filter for chain {chain_id}")]
	NotDeployed { protocol: String, chain_id: u64 },
	#[error("Filler channel closed")]
	ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
	pub poll_interval: Duration,
	/// Blocks to lag behind the chain head.
	pub confirmation_depth: u64,
	/// Largest block window scanned before a checkpoint write.
	pub max_block_range: u64,
	/// First block to scan when no checkpoint exists.
	pub start_block: Option<u64>,
}

impl Default for ListenerConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(10),
			confirmation_depth: 3,
			max_block_range: 1000,
			start_block: None,
		}
	}
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
	/// No new confirmed blocks.
	Idle { head: u64, next: u64 },
	Scanned {
		from: u64,
		to: u64,
		handed_off: usize,
		already_processed: usize,
		unparseable: usize,
	},
}

pub struct Listener {
	protocol: String,
	chain_id: u64,
	filter: EventFilter,
	config: ListenerConfig,
	source: Arc<EventSourceService>,
	discovery: Arc<dyn DiscoveryInterface>,
	checkpoints: Arc<CheckpointStore>,
	intents: Arc<IntentStore>,
	event_bus: EventBus,
	sink: mpsc::Sender<Intent>,
}

impl Listener {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		protocol: impl Into<String>,
		chain_id: u64,
		config: ListenerConfig,
		source: Arc<EventSourceService>,
		discovery: Arc<dyn DiscoveryInterface>,
		checkpoints: Arc<CheckpointStore>,
		intents: Arc<IntentStore>,
		event_bus: EventBus,
		sink: mpsc::Sender<Intent>,
	) -> Result<Self, ListenerError> {
		let protocol = protocol.into();
		let filter = discovery
			.event_filter(chain_id)
			.ok_or_else(|| ListenerError::NotDeployed {
				protocol: protocol.clone(),
				chain_id,
			})?;

		Ok(Self {
			protocol,
			chain_id,
			filter,
			config,
			source,
			discovery,
			checkpoints,
			intents,
			event_bus,
			sink,
		})
	}

	pub fn protocol(&self) -> &str {
		&self.protocol
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	/// Runs poll cycles until `cancel` fires. A running cycle is never interrupted.
	pub async fn run(self, cancel: CancellationToken) {
		tracing::info!(protocol = %self.protocol, chain_id = self.chain_id, "Listener started");

		let mut interval = tokio::time::interval(self.config.poll_interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				_ = interval.tick() => {}
			}

			match self.poll_once().await {
				Ok(PollOutcome::Idle { head, next }) => {
					tracing::trace!(protocol = %self.protocol, chain_id = self.chain_id, head, next, "No new blocks");
				}
				Ok(PollOutcome::Scanned { from, to, handed_off, .. }) => {
					tracing::debug!(
						protocol = %self.protocol,
						chain_id = self.chain_id,
						from,
						to,
						handed_off,
						"Scanned block range"
					);
				}
				Err(ListenerError::ChannelClosed) => {
					tracing::warn!(protocol = %self.protocol, chain_id = self.chain_id, "Filler gone, stopping listener");
					break;
				}
				Err(e) => {
					tracing::warn!(
						protocol = %self.protocol,
						chain_id = self.chain_id,
						error = %e,
						"Poll cycle aborted, retrying next interval"
					);
				}
			}
		}

		tracing::info!(protocol = %self.protocol, chain_id = self.chain_id, "Listener stopped");
	}

	/// Runs one poll cycle.
	///
	/// The checkpoint only advances past a window once every event in it has
	/// been recorded and handed off. Any error leaves the checkpoint where the
	/// last completed window put it.
	pub async fn poll_once(&self) -> Result<PollOutcome, ListenerError> {
		let checkpoint = self
			.checkpoints
			.get_last_scanned_block(&self.protocol, self.chain_id)
			.await?;
		let height = self.source.get_block_height(self.chain_id).await?;
		let head = height.saturating_sub(self.config.confirmation_depth);

		let from = match (checkpoint, self.config.start_block) {
			(Some(last), _) => last.saturating_add(1),
			(None, Some(start)) => start,
			(None, None) => head,
		};
		if head < from {
			return Ok(PollOutcome::Idle { head, next: from });
		}

		let mut outcome = (0usize, 0usize, 0usize);
		let window = self.config.max_block_range.max(1);
		let mut start = from;
		loop {
			let end = start.saturating_add(window - 1).min(head);
			let (handed_off, processed, unparseable) = self.scan_window(start, end).await?;
			outcome.0 += handed_off;
			outcome.1 += processed;
			outcome.2 += unparseable;

			self.checkpoints
				.set_last_scanned_block(&self.protocol, self.chain_id, end)
				.await?;

			if end >= head {
				break;
			}
			start = end + 1;
		}

		Ok(PollOutcome::Scanned {
			from,
			to: head,
			handed_off: outcome.0,
			already_processed: outcome.1,
			unparseable: outcome.2,
		})
	}

	async fn scan_window(&self, from: u64, to: u64) -> Result<(usize, usize, usize), ListenerError> {
		let events = self
			.source
			.query_events(self.chain_id, &self.filter, from, to)
			.await?;

		let (mut handed_off, mut processed, mut unparseable) = (0, 0, 0);
		for event in &events {
			let mut intent = match self.discovery.parse_event(event) {
				Ok(intent) => intent,
				Err(e) => {
					tracing::warn!(
						protocol = %self.protocol,
						chain_id = self.chain_id,
						block = event.block_number,
						log_index = event.log_index,
						tx_hash = %event.transaction_hash,
						error = %e,
						"Skipping unparseable event"
					);
					unparseable += 1;
					continue;
				}
			};
			intent.protocol = self.protocol.clone();

			if self
				.checkpoints
				.is_processed(&self.protocol, &intent.order_id)
				.await?
			{
				processed += 1;
				continue;
			}

			if self.intents.record_seen(&intent).await? {
				tracing::info!(
					order_id = %truncate_id(&intent.order_id.to_hex()),
					protocol = %self.protocol,
					chain_id = self.chain_id,
					block = event.block_number,
					"Intent seen"
				);
				self.event_bus.publish(SolverEvent::Seen {
					key: intent.key(),
					block_number: event.block_number,
				});
			}

			self.sink
				.send(intent)
				.await
				.map_err(|_| ListenerError::ChannelClosed)?;
			handed_off += 1;
		}

		Ok((handed_off, processed, unparseable))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::EventSourceInterface;
	use alloy_primitives::U256;
	use async_trait::async_trait;
	use solver_storage::implementations::memory::MemoryStorage;
	use solver_storage::StorageService;
	use solver_types::{Address, ConfigSchema, OrderId, RawEvent, Schema, TransactionHash, ValidationError};
	use std::sync::atomic::{AtomicU64, Ordering};
	use std::sync::Mutex;

	/// Chain with a fixed set of logs, one per listed block.
	struct FakeChain {
		height: AtomicU64,
		blocks_with_events: Vec<u64>,
		queries: Mutex<Vec<(u64, u64)>>,
	}

	#[async_trait]
	impl EventSourceInterface for FakeChain {
		fn chain_id(&self) -> u64 {
			10
		}

		async fn get_block_height(&self) -> Result<u64, DiscoveryError> {
			Ok(self.height.load(Ordering::SeqCst))
		}

		async fn query_events(
			&self,
			_filter: &EventFilter,
			from: u64,
			to: u64,
		) -> Result<Vec<RawEvent>, DiscoveryError> {
			self.queries.lock().unwrap().push((from, to));
			Ok(self
				.blocks_with_events
				.iter()
				.filter(|b| (from..=to).contains(*b))
				.map(|b| RawEvent {
					chain_id: 10,
					address: Address::zero(),
					topics: vec![],
					data: vec![*b as u8],
					block_number: *b,
					log_index: 0,
					transaction_hash: TransactionHash(vec![0; 32]),
				})
				.collect())
		}

		async fn get_balance(&self, _: &Address, _: Option<&Address>) -> Result<U256, DiscoveryError> {
			Ok(U256::ZERO)
		}
	}

	struct ByteDecoder;

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	impl DiscoveryInterface for ByteDecoder {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		fn event_filter(&self, chain_id: u64) -> Option<EventFilter> {
			(chain_id == 10).then(|| EventFilter {
				addresses: vec![Address::zero()],
				topic0: [0; 32],
			})
		}

		fn parse_event(&self, event: &RawEvent) -> Result<Intent, DiscoveryError> {
			Ok(Intent {
				order_id: OrderId(event.data.clone()),
				protocol: "decoder".to_string(),
				origin_chain_id: 10,
				destination_chain_id: 20,
				user: Address::zero(),
				inputs: vec![],
				outputs: vec![],
				fill_deadline: None,
				destination_settler: Address::zero(),
				raw_origin_data: vec![],
				filler_data: vec![],
				discovered_at_block: event.block_number,
				log_index: event.log_index,
				transaction_hash: event.transaction_hash.clone(),
			})
		}
	}

	struct Harness {
		chain: Arc<FakeChain>,
		checkpoints: Arc<CheckpointStore>,
		listener: Listener,
		rx: mpsc::Receiver<Intent>,
	}

	fn harness(height: u64, blocks: Vec<u64>, config: ListenerConfig) -> Harness {
		let chain = Arc::new(FakeChain {
			height: AtomicU64::new(height),
			blocks_with_events: blocks,
			queries: Mutex::new(Vec::new()),
		});
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let checkpoints = Arc::new(CheckpointStore::new(storage.clone()));
		let intents = Arc::new(IntentStore::new(storage));
		let source = Arc::new(EventSourceService::new(
			vec![Box::new(chain.clone())],
			Duration::from_secs(1),
		));
		let (tx, rx) = mpsc::channel(64);
		let listener = Listener::new(
			"decoder",
			10,
			config,
			source,
			Arc::new(ByteDecoder),
			checkpoints.clone(),
			intents,
			EventBus::new(16),
			tx,
		)
		.unwrap();

		Harness {
			chain,
			checkpoints,
			listener,
			rx,
		}
	}

	#[tokio::test]
	async fn test_windows_advance_checkpoint_per_window() {
		let config = ListenerConfig {
			confirmation_depth: 2,
			max_block_range: 10,
			start_block: Some(1),
			..Default::default()
		};
		let mut h = harness(27, vec![3, 15, 25], config);

		let outcome = h.listener.poll_once().await.unwrap();
		assert_eq!(
			outcome,
			PollOutcome::Scanned {
				from: 1,
				to: 25,
				handed_off: 3,
				already_processed: 0,
				unparseable: 0,
			}
		);
		assert_eq!(
			*h.chain.queries.lock().unwrap(),
			vec![(1, 10), (11, 20), (21, 25)]
		);
		assert_eq!(
			h.checkpoints.get_last_scanned_block("decoder", 10).await.unwrap(),
			Some(25)
		);

		let first = h.rx.recv().await.unwrap();
		assert_eq!(first.protocol, "decoder");
		assert_eq!(first.discovered_at_block, 3);
	}

	#[tokio::test]
	async fn test_idle_when_no_confirmed_blocks() {
		let mut h = harness(27, vec![], ListenerConfig::default());
		h.checkpoints
			.set_last_scanned_block("decoder", 10, 24)
			.await
			.unwrap();

		assert_eq!(
			h.listener.poll_once().await.unwrap(),
			PollOutcome::Idle { head: 24, next: 25 }
		);
		assert!(h.chain.queries.lock().unwrap().is_empty());
		assert!(h.rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_processed_orders_are_not_handed_off() {
		let config = ListenerConfig {
			confirmation_depth: 0,
			start_block: Some(0),
			..Default::default()
		};
		let mut h = harness(5, vec![2, 4], config);
		h.checkpoints
			.mark_processed("decoder", &OrderId(vec![2]))
			.await
			.unwrap();

		let outcome = h.listener.poll_once().await.unwrap();
		assert!(matches!(
			outcome,
			PollOutcome::Scanned {
				handed_off: 1,
				already_processed: 1,
				..
			}
		));
		assert_eq!(h.rx.recv().await.unwrap().order_id, OrderId(vec![4]));
	}

	#[tokio::test]
	async fn test_closed_channel_keeps_checkpoint() {
		let config = ListenerConfig {
			confirmation_depth: 0,
			start_block: Some(0),
			..Default::default()
		};
		let h = harness(5, vec![2], config);
		drop(h.rx);

		assert!(matches!(
			h.listener.poll_once().await,
			Err(ListenerError::ChannelClosed)
		));
		assert_eq!(
			h.checkpoints.get_last_scanned_block("decoder", 10).await.unwrap(),
			None
		);
	}

	#[tokio::test]
	async fn test_unknown_chain_not_deployed() {
		let h = harness(5, vec![], ListenerConfig::default());
		let result = Listener::new(
			"decoder",
			99,
			ListenerConfig::default(),
			Arc::new(EventSourceService::new(vec![], Duration::from_secs(1))),
			Arc::new(ByteDecoder),
			h.checkpoints.clone(),
			Arc::new(IntentStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))),
			EventBus::new(1),
			mpsc::channel(1).0,
		);
		assert!(matches!(result, Err(ListenerError::NotDeployed { chain_id: 99, .. })));
	}
}
