//! Configuration types for the solver.

use crate::serde_helpers::{deserialize_chain_id_map, serialize_chain_id_map};
use serde::{Deserialize, Serialize};
use solver_types::RulesConfig;
use std::collections::HashMap;
use std::time::Duration;

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

/// Complete solver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub solver: SolverSettings,
	#[serde(default)]
	pub storage: StorageConfig,
	pub account: AccountConfig,
	/// Chain RPC endpoints, keyed by chain id.
	#[serde(
		deserialize_with = "deserialize_chain_id_map",
		serialize_with = "serialize_chain_id_map"
	)]
	pub chains: HashMap<u64, ChainConfig>,
	#[serde(default)]
	pub delivery: DeliverySettings,
	#[serde(default)]
	pub retry: RetryConfig,
	/// Protocol integrations, keyed by protocol name.
	#[serde(default)]
	pub protocols: HashMap<String, ProtocolConfig>,
}

impl Config {
	pub fn enabled_protocols(&self) -> impl Iterator<Item = (&String, &ProtocolConfig)> {
		self.protocols.iter().filter(|(_, p)| p.enabled)
	}
}

/// Solver identity and process-wide limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverSettings {
	/// Solver identifier, used in logs
	pub id: String,
	/// Default log filter, overridden by `--log-level`
	#[serde(default = "default_log_level")]
	pub log_level: String,
	/// Intents processed concurrently per protocol
	#[serde(default = "default_max_concurrent_fills")]
	pub max_concurrent_fills: usize,
	/// Time the Fillers are given to drain on shutdown
	#[serde(default = "default_shutdown_timeout_secs")]
	pub shutdown_timeout_secs: u64,
	#[serde(default = "default_event_bus_capacity")]
	pub event_bus_capacity: usize,
	/// Capacity of each Listener-to-Filler channel
	#[serde(default = "default_channel_capacity")]
	pub channel_capacity: usize,
}

impl SolverSettings {
	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_secs(self.shutdown_timeout_secs)
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_max_concurrent_fills() -> usize {
	8
}

fn default_shutdown_timeout_secs() -> u64 {
	30
}

fn default_event_bus_capacity() -> usize {
	1000
}

fn default_channel_capacity() -> usize {
	256
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// `file` or `memory`
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	/// Backend-specific settings
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			config: empty_table(),
		}
	}
}

fn default_storage_backend() -> String {
	"file".to_string()
}

/// Operating key selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	#[serde(default = "default_account_provider")]
	pub provider: String,
	/// Provider-specific settings
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

fn default_account_provider() -> String {
	"local".to_string()
}

/// Chain-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// HTTP RPC endpoint URL
	pub rpc_url: String,
	/// Largest block range requested from the node in one log query
	#[serde(default = "default_max_block_range")]
	pub max_block_range: u64,
}

fn default_max_block_range() -> u64 {
	1000
}

/// Transaction submission settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliverySettings {
	/// Blocks on top of a submitted transaction before it counts as confirmed
	#[serde(default = "default_confirmations")]
	pub confirmations: u64,
	/// Interval between receipt polls
	#[serde(default = "default_receipt_poll_ms")]
	pub receipt_poll_ms: u64,
}

impl Default for DeliverySettings {
	fn default() -> Self {
		Self {
			confirmations: default_confirmations(),
			receipt_poll_ms: default_receipt_poll_ms(),
		}
	}
}

impl DeliverySettings {
	pub fn receipt_poll_interval(&self) -> Duration {
		Duration::from_millis(self.receipt_poll_ms)
	}
}

fn default_confirmations() -> u64 {
	1
}

fn default_receipt_poll_ms() -> u64 {
	2000
}

/// Retry, backoff and timeout policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	#[serde(default = "default_rpc_timeout_secs")]
	pub rpc_timeout_secs: u64,
	#[serde(default = "default_confirmation_timeout_secs")]
	pub confirmation_timeout_secs: u64,
	#[serde(default = "default_settlement_timeout_secs")]
	pub settlement_timeout_secs: u64,
	/// Interval between settlement readiness checks
	#[serde(default = "default_settlement_poll_secs")]
	pub settlement_poll_secs: u64,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
			rpc_timeout_secs: default_rpc_timeout_secs(),
			confirmation_timeout_secs: default_confirmation_timeout_secs(),
			settlement_timeout_secs: default_settlement_timeout_secs(),
			settlement_poll_secs: default_settlement_poll_secs(),
		}
	}
}

impl RetryConfig {
	pub fn initial_backoff(&self) -> Duration {
		Duration::from_millis(self.initial_backoff_ms)
	}

	pub fn max_backoff(&self) -> Duration {
		Duration::from_millis(self.max_backoff_ms)
	}

	pub fn rpc_timeout(&self) -> Duration {
		Duration::from_secs(self.rpc_timeout_secs)
	}

	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_secs(self.confirmation_timeout_secs)
	}

	pub fn settlement_timeout(&self) -> Duration {
		Duration::from_secs(self.settlement_timeout_secs)
	}

	pub fn settlement_poll_interval(&self) -> Duration {
		Duration::from_secs(self.settlement_poll_secs)
	}
}

fn default_max_attempts() -> u32 {
	3
}

fn default_initial_backoff_ms() -> u64 {
	500
}

fn default_max_backoff_ms() -> u64 {
	30_000
}

fn default_rpc_timeout_secs() -> u64 {
	15
}

fn default_confirmation_timeout_secs() -> u64 {
	300
}

fn default_settlement_timeout_secs() -> u64 {
	1800
}

fn default_settlement_poll_secs() -> u64 {
	5
}

/// One protocol integration (`[protocols.<name>]`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
	#[serde(default)]
	pub enabled: bool,
	/// Origin chains to listen on
	#[serde(default)]
	pub chains: Vec<u64>,
	#[serde(default = "default_poll_interval_secs")]
	pub poll_interval_secs: u64,
	#[serde(default = "default_confirmation_depth")]
	pub confirmation_depth: u64,
	#[serde(default = "default_max_block_range")]
	pub max_block_range: u64,
	/// First block to scan per chain when no checkpoint exists
	#[serde(
		default,
		deserialize_with = "deserialize_chain_id_map",
		serialize_with = "serialize_chain_id_map"
	)]
	pub start_blocks: HashMap<u64, u64>,
	#[serde(default)]
	pub rules: RulesConfig,
	/// Settings shared by the protocol's discovery, order and settlement implementations
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

impl ProtocolConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}
}

fn default_poll_interval_secs() -> u64 {
	10
}

fn default_confirmation_depth() -> u64 {
	3
}
