use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solver_config::{ChainConfig, Config, ConfigLoader};
use solver_core::{SolverBuilder, SolverManager};
use solver_delivery::{DeliveryError, DeliveryInterface};
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "oif-solver")]
#[command(about = "OIF cross-chain intent solver", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/example.toml")]
	config: PathBuf,

	#[arg(long, env = "SOLVER_LOG_LEVEL")]
	log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the solver
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

	let log_level = cli.log_level.as_deref().unwrap_or(&config.solver.log_level);
	setup_tracing(log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_solver(config).await,
		Some(Commands::Validate) => validate_config(&config),
	}
}

async fn start_solver(config: Config) -> Result<()> {
	info!(solver = %config.solver.id, "Starting OIF solver");

	let solver = build_solver(config)
		.await
		.context("Failed to build solver")?;
	info!(address = %solver.solver_address(), "Solver account loaded");

	solver.start().await.context("Failed to start solver")?;

	shutdown_signal().await;
	info!("Shutdown signal received, stopping solver...");

	solver.stop().await;
	info!("OIF solver stopped");
	Ok(())
}

async fn build_solver(config: Config) -> Result<SolverManager> {
	let solver = SolverBuilder::new(config)
		.with_storage_factory(
			"file",
			solver_storage::implementations::file::create_storage,
		)
		.with_storage_factory(
			"memory",
			solver_storage::implementations::memory::create_storage,
		)
		.with_account_factory(
			"local",
			solver_account::implementations::local::create_account,
		)
		.with_event_source_factory(|chain_id, chain: &ChainConfig| {
			solver_discovery::implementations::evm::alloy::create_event_source(
				chain_id,
				&chain.rpc_url,
				chain.max_block_range,
			)
		})
		.with_delivery_factory(
			|chain_id, chain: &ChainConfig, account| -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
				let wallet = account
					.wallet(chain_id)
					.map_err(|e| DeliveryError::Configuration(e.to_string()))?;
				let mut table = toml::map::Map::new();
				table.insert("rpc_url".to_string(), toml::Value::String(chain.rpc_url.clone()));
				solver_delivery::implementations::evm::alloy::create_http_delivery(
					chain_id,
					&toml::Value::Table(table),
					wallet,
				)
			},
		)
		.build()
		.await?;

	Ok(solver)
}

fn validate_config(config: &Config) -> Result<()> {
	info!("Configuration is valid");
	info!("Solver: {}", config.solver.id);
	info!("Storage backend: {}", config.storage.backend);

	let mut chains: Vec<_> = config.chains.keys().collect();
	chains.sort();
	for chain_id in chains {
		info!("  Chain {}: {}", chain_id, config.chains[chain_id].rpc_url);
	}
	for (name, protocol) in config.enabled_protocols() {
		info!(
			"  Protocol {}: chains {:?}, rules {:?}",
			name, protocol.chains, protocol.rules.order
		);
	}

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
		.with_context(|| format!("Invalid log level '{}'", log_level))?;

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.context("Failed to initialize tracing")?;

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to install Ctrl+C handler");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
