//! Configuration loading and validation for the solver.
//!
//! Configuration is read once from a TOML file, with `${VAR}` references
//! substituted from the environment, and shared immutably afterwards.

use regex::Regex;
use solver_types::CANONICAL_RULES;
use std::env;
use std::path::Path;
use thiserror::Error;

mod serde_helpers;
mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "SOLVER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let file_path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;

		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.clone())
			} else {
				ConfigError::IoError(e)
			}
		})?;

		self.load_str(&content)
	}

	/// Substitutes, parses and validates configuration text.
	pub fn load_str(&self, content: &str) -> Result<Config, ConfigError> {
		let substituted = substitute_env_vars(content)?;

		let mut config: Config =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		self.apply_env_overrides(&mut config);
		validate_config(&config)?;

		tracing::debug!(
			solver = %config.solver.id,
			chains = config.chains.len(),
			protocols = config.enabled_protocols().count(),
			"Loaded configuration"
		);
		Ok(config)
	}

	fn apply_env_overrides(&self, config: &mut Config) {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.solver.log_level = log_level;
		}
	}
}

/// Replaces every `${VAR_NAME}` with the value of the environment variable.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
		.map_err(|e| ConfigError::ParseError(e.to_string()))?;

	let mut result = String::with_capacity(content.len());
	let mut last = 0;
	for cap in re.captures_iter(content) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = env::var(var_name.as_str())
			.map_err(|_| ConfigError::EnvVarNotFound(var_name.as_str().to_string()))?;
		result.push_str(&content[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&content[last..]);

	Ok(result)
}

fn invalid(message: impl Into<String>) -> ConfigError {
	ConfigError::ValidationError(message.into())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
	if config.solver.max_concurrent_fills == 0 {
		return Err(invalid("solver.max_concurrent_fills must be at least 1"));
	}
	if config.solver.channel_capacity == 0 || config.solver.event_bus_capacity == 0 {
		return Err(invalid("solver channel capacities must be at least 1"));
	}

	for (chain_id, chain) in &config.chains {
		if chain.rpc_url.is_empty() {
			return Err(invalid(format!("chains.{}.rpc_url is empty", chain_id)));
		}
		if chain.max_block_range == 0 {
			return Err(invalid(format!("chains.{}.max_block_range must be at least 1", chain_id)));
		}
	}

	if config.delivery.receipt_poll_ms == 0 {
		return Err(invalid("delivery.receipt_poll_ms must be positive"));
	}

	let retry = &config.retry;
	if retry.max_attempts == 0 {
		return Err(invalid("retry.max_attempts must be at least 1"));
	}
	if retry.initial_backoff_ms == 0 || retry.initial_backoff_ms > retry.max_backoff_ms {
		return Err(invalid(
			"retry.initial_backoff_ms must be positive and not exceed retry.max_backoff_ms",
		));
	}
	for (name, secs) in [
		("rpc_timeout_secs", retry.rpc_timeout_secs),
		("confirmation_timeout_secs", retry.confirmation_timeout_secs),
		("settlement_timeout_secs", retry.settlement_timeout_secs),
		("settlement_poll_secs", retry.settlement_poll_secs),
	] {
		if secs == 0 {
			return Err(invalid(format!("retry.{} must be positive", name)));
		}
	}

	if config.enabled_protocols().next().is_none() {
		return Err(invalid("At least one protocol must be enabled"));
	}

	for (name, protocol) in config.enabled_protocols() {
		if protocol.chains.is_empty() {
			return Err(invalid(format!("protocols.{} has no chains", name)));
		}
		for chain_id in protocol.chains.iter().chain(protocol.start_blocks.keys()) {
			if !config.chains.contains_key(chain_id) {
				return Err(invalid(format!(
					"protocols.{} references chain {} with no [chains.{}] entry",
					name, chain_id, chain_id
				)));
			}
		}
		if protocol.poll_interval_secs == 0 || protocol.max_block_range == 0 {
			return Err(invalid(format!(
				"protocols.{} poll_interval_secs and max_block_range must be positive",
				name
			)));
		}
		if let Some(unknown) = protocol
			.rules
			.order
			.iter()
			.find(|rule| !CANONICAL_RULES.contains(&rule.as_str()))
		{
			return Err(invalid(format!("protocols.{} uses unknown rule '{}'", name, unknown)));
		}
	}

	Ok(())
}
