//! Protocol registry mapping protocol names to their implementations.

use solver_discovery::{DiscoveryError, DiscoveryInterface, EventSourceService};
use solver_order::{OrderError, OrderInterface};
use solver_settlement::{SettlementError, SettlementInterface};
use std::collections::HashMap;
use std::sync::Arc;

pub type DiscoveryFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError> + Send + Sync>;
pub type OrderFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn OrderInterface>, OrderError> + Send + Sync>;
pub type SettlementFactory = Box<
	dyn Fn(&toml::Value, Arc<EventSourceService>) -> Result<Box<dyn SettlementInterface>, SettlementError>
		+ Send
		+ Sync,
>;

/// Factories building one protocol's implementations from its `config` table.
pub struct ProtocolFactories {
	pub discovery: DiscoveryFactory,
	pub order: OrderFactory,
	pub settlement: SettlementFactory,
}

/// Registry for protocol integrations, keyed by protocol name
#[derive(Default)]
pub struct ProtocolRegistry {
	protocols: HashMap<String, ProtocolFactories>,
}

impl ProtocolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry with every built-in protocol.
	pub fn with_defaults() -> Self {
		let mut registry = Self::new();
		registry.register(
			solver_discovery::implementations::onchain::_7683::PROTOCOL,
			ProtocolFactories {
				discovery: Box::new(solver_discovery::implementations::onchain::_7683::create_discovery),
				order: Box::new(solver_order::implementations::standards::_7683::create_order),
				settlement: Box::new(solver_settlement::implementations::direct::create_settlement),
			},
		);
		registry
	}

	/// Registers `factories` under `name`, replacing any previous entry.
	pub fn register(&mut self, name: impl Into<String>, factories: ProtocolFactories) {
		self.protocols.insert(name.into(), factories);
	}

	pub fn get(&self, name: &str) -> Option<&ProtocolFactories> {
		self.protocols.get(name)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.protocols.keys().map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_include_eip7683() {
		let registry = ProtocolRegistry::with_defaults();
		assert!(registry.get("eip7683").is_some());
		assert!(registry.get("unknown").is_none());
		assert_eq!(registry.names().count(), 1);
	}

	#[test]
	fn test_default_factories_validate_config() {
		let registry = ProtocolRegistry::with_defaults();
		let factories = registry.get("eip7683").unwrap();
		let empty = toml::Value::Table(Default::default());
		assert!((factories.discovery)(&empty).is_err());
		assert!((factories.order)(&empty).is_err());

		let config: toml::Value = toml::from_str(
			r#"
			[origin_settlers]
			10 = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
			"#,
		)
		.unwrap();
		assert!((factories.discovery)(&config).is_ok());
		assert!((factories.order)(&config).is_ok());
	}
}
