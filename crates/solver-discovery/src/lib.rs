//! Intent discovery for the solver system.
//!
//! Discovery is split in three layers:
//! - [`EventSourceInterface`] reads blocks, logs and balances from one chain,
//!   and [`EventSourceService`] routes calls to the right chain under a timeout.
//! - [`DiscoveryInterface`] is implemented once per protocol and turns a raw
//!   log into a canonical [`Intent`].
//! - [`Listener`] drives both for one (protocol, chain) pair, deduplicates
//!   against the checkpoint store and hands intents to the Filler.

use alloy_primitives::U256;
use async_trait::async_trait;
use solver_types::{Address, ConfigSchema, EventFilter, Intent, RawEvent};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	pub mod onchain {
		pub mod _7683;
	}
}

mod listener;

pub use listener::{Listener, ListenerConfig, ListenerError, PollOutcome};

#[derive(Debug, Error)]
pub enum DiscoveryError {
	/// Network or node failure, including timeouts. Transient.
	#[error("RPC error: {0}")]
	Rpc(String),
	/// A single log could not be decoded into an intent.
	#[error("Parse error: {0}")]
	Parse(String),
	#[error("No event source for chain {0}")]
	UnknownChain(u64),
	#[error("Invalid block range: {from} > {to}")]
	InvalidRange { from: u64, to: u64 },
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Read access to a single chain.
#[async_trait]
pub trait EventSourceInterface: Send + Sync {
	fn chain_id(&self) -> u64;

	async fn get_block_height(&self) -> Result<u64, DiscoveryError>;

	/// Returns every log matching `filter` in `[from, to]`, ordered by
	/// (block, log index). Either the result is complete or the call fails.
	async fn query_events(
		&self,
		filter: &EventFilter,
		from: u64,
		to: u64,
	) -> Result<Vec<RawEvent>, DiscoveryError>;

	/// Native balance when `token` is `None`, ERC-20 balance otherwise.
	async fn get_balance(
		&self,
		owner: &Address,
		token: Option<&Address>,
	) -> Result<U256, DiscoveryError>;
}

#[async_trait]
impl<T: EventSourceInterface + ?Sized> EventSourceInterface for std::sync::Arc<T> {
	fn chain_id(&self) -> u64 {
		(**self).chain_id()
	}

	async fn get_block_height(&self) -> Result<u64, DiscoveryError> {
		(**self).get_block_height().await
	}

	async fn query_events(
		&self,
		filter: &EventFilter,
		from: u64,
		to: u64,
	) -> Result<Vec<RawEvent>, DiscoveryError> {
		(**self).query_events(filter, from, to).await
	}

	async fn get_balance(
		&self,
		owner: &Address,
		token: Option<&Address>,
	) -> Result<U256, DiscoveryError> {
		(**self).get_balance(owner, token).await
	}
}

/// Routes chain reads by chain id and bounds every call by a timeout.
pub struct EventSourceService {
	sources: HashMap<u64, Box<dyn EventSourceInterface>>,
	timeout: Duration,
}

impl EventSourceService {
	pub fn new(sources: Vec<Box<dyn EventSourceInterface>>, timeout: Duration) -> Self {
		Self {
			sources: sources.into_iter().map(|s| (s.chain_id(), s)).collect(),
			timeout,
		}
	}

	pub fn chains(&self) -> impl Iterator<Item = u64> + '_ {
		self.sources.keys().copied()
	}

	fn source(&self, chain_id: u64) -> Result<&dyn EventSourceInterface, DiscoveryError> {
		self.sources
			.get(&chain_id)
			.map(|s| s.as_ref())
			.ok_or(DiscoveryError::UnknownChain(chain_id))
	}

	async fn bounded<T>(
		&self,
		chain_id: u64,
		what: &str,
		fut: impl Future<Output = Result<T, DiscoveryError>>,
	) -> Result<T, DiscoveryError> {
		tokio::time::timeout(self.timeout, fut)
			.await
			.map_err(|_| {
				DiscoveryError::Rpc(format!(
					"{} on chain {} timed out after {:?}",
					what, chain_id, self.timeout
				))
			})?
	}

	pub async fn get_block_height(&self, chain_id: u64) -> Result<u64, DiscoveryError> {
		let source = self.source(chain_id)?;
		self.bounded(chain_id, "get_block_height", source.get_block_height())
			.await
	}

	pub async fn query_events(
		&self,
		chain_id: u64,
		filter: &EventFilter,
		from: u64,
		to: u64,
	) -> Result<Vec<RawEvent>, DiscoveryError> {
		if from > to {
			return Err(DiscoveryError::InvalidRange { from, to });
		}
		let source = self.source(chain_id)?;
		let mut events = self
			.bounded(chain_id, "query_events", source.query_events(filter, from, to))
			.await?;
		events.sort_by_key(RawEvent::position);
		Ok(events)
	}

	pub async fn get_balance(
		&self,
		chain_id: u64,
		owner: &Address,
		token: Option<&Address>,
	) -> Result<U256, DiscoveryError> {
		let source = self.source(chain_id)?;
		self.bounded(chain_id, "get_balance", source.get_balance(owner, token))
			.await
	}
}

/// Protocol-specific intent decoding.
pub trait DiscoveryInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Intent-creation filter for `chain_id`, if the protocol is deployed there.
	fn event_filter(&self, chain_id: u64) -> Option<EventFilter>;

	/// Decodes one log. A failure only affects this log.
	fn parse_event(&self, event: &RawEvent) -> Result<Intent, DiscoveryError>;
}
