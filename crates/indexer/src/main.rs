//! Civitas Indexer - WelfareBenefit event ingestion
//!
//! This binary provides:
//! - Event listening from Ethereum (BenefitIssued, BenefitRedeemed,
//!   VendorRegistered, VendorRemoved)
//! - Benefit and vendor projections in SQLite
//! - Periodic reconciliation against on-chain benefit records
//!
//! Note: The HTTP API is provided by the separate `civitas-api` service

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use civitas_indexer::config::{Config, LoggingConfig};
use civitas_indexer::listener::{IndexerSupervisor, RpcLedger};
use civitas_indexer::reconcile::Reconciler;
use civitas_indexer::storage::Storage;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "civitas-indexer")]
#[command(version, about = "Civitas indexer for WelfareBenefit contract events", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (supervisor + reconciler)
    Run,

    /// Show indexer status and sync progress
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://civitas.db")]
        database_url: String,
    },

    /// Run one reconciliation pass and exit
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable
    let logging = Config::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.debug, &logging);

    info!("Civitas Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
        Commands::Reconcile => reconcile_once(&cli.config).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("civitas_indexer=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("civitas_indexer={}", logging.level)))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// Connect, migrate and return the storage configured in `config`.
async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

/// Main indexer service - runs the supervisor and the reconciler
async fn run_indexer(config_path: &str) -> Result<()> {
    info!("Starting indexer service with config: {}", config_path);

    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.rpc_url);
    info!("  Contract: {}", config.contracts.welfare_benefit);
    info!("  Database: {}", config.database.url);
    info!("  Start block: {}", config.sync.start_block);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let sync_state = storage.get_sync_state().await?;
    if sync_state.last_block_number == 0 && sync_state.chain_id == 0 {
        // The supervisor fetches from (last + 1), so start one block earlier
        let initial_block = config.sync.start_block.saturating_sub(1);
        info!(
            "Fresh database detected, initializing sync state with chain_id={} initial_block={}",
            config.network.chain_id, initial_block
        );
        storage
            .initialize_sync_state(
                config.network.chain_id,
                initial_block,
                alloy::primitives::B256::ZERO,
            )
            .await
            .context("Failed to initialize sync state")?;
    } else if sync_state.chain_id != config.network.chain_id {
        bail!(
            "Database was indexed for chain {} but config targets chain {}",
            sync_state.chain_id,
            config.network.chain_id
        );
    } else {
        info!(
            "Existing sync state found: chain_id={} last_block={}",
            sync_state.chain_id, sync_state.last_block_number
        );
    }

    let ledger = Arc::new(
        RpcLedger::new(&config.network.rpc_url, config.contracts.welfare_benefit)
            .await
            .context("Failed to create RPC ledger")?,
    );

    match ledger.chain_id().await {
        Ok(chain_id) if chain_id != config.network.chain_id => {
            bail!(
                "RPC endpoint serves chain {} but config targets chain {}",
                chain_id,
                config.network.chain_id
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Could not verify chain id, continuing: {:#}", e),
    }

    info!("RPC ledger initialized");

    let mut supervisor = IndexerSupervisor::new(
        Arc::clone(&ledger),
        storage.clone(),
        config.sync.clone(),
        config.network.chain_id,
    )
    .start();

    info!("Indexer supervisor started");

    let reconcile_handle = if config.reconcile.enabled {
        let reconciler = Reconciler::new(
            Arc::clone(&ledger),
            storage.clone(),
            Duration::from_secs(config.reconcile.interval_secs),
        );
        info!(
            "Reconciler started (interval: {}s)",
            config.reconcile.interval_secs
        );
        Some(tokio::spawn(async move { reconciler.run().await }))
    } else {
        info!("Reconciliation disabled");
        None
    };

    info!("Indexer is running. Press Ctrl+C to stop.");

    let reconcile_exit = async {
        match reconcile_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    let (outcome, supervisor_alive) = tokio::select! {
        result = supervisor.join() => (result, false),
        result = reconcile_exit => {
            let outcome = match result {
                Ok(Ok(())) => {
                    warn!("Reconciler exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Reconciler failed"),
                Err(e) => Err(anyhow::anyhow!("Reconciler task panicked: {}", e)),
            };
            (outcome, true)
        }
        result = tokio::signal::ctrl_c() => {
            let outcome = result.context("Failed to listen for Ctrl+C");
            info!("Received shutdown signal, gracefully shutting down...");
            (outcome, true)
        }
    };

    if supervisor_alive {
        supervisor.stop().await?;
    }
    storage.close().await;

    outcome
}

/// Show indexer status and sync progress
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database only if the config file doesn't exist
    let (database_url, max_conn, min_conn) = match Config::from_file(config_path) {
        Ok(config) => {
            info!("Using database from config: {}", config.database.url);
            (
                config.database.url,
                Some(config.database.max_connections),
                Some(config.database.min_connections),
            )
        }
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            if is_not_found {
                info!("Config file not found, using default database: sqlite://civitas.db");
                ("sqlite://civitas.db".to_string(), None, None)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let sync_state = storage.get_sync_state().await?;
    let stats = storage.stats().await?;

    println!("\n=== Civitas Indexer Status ===\n");
    println!("Sync Progress:");
    println!("  Chain ID: {}", sync_state.chain_id);
    println!("  Last Block: {}", sync_state.last_block_number);
    println!(
        "  Last Block Hash: 0x{}",
        hex::encode(sync_state.last_block_hash)
    );
    println!(
        "  Last Updated: {}",
        chrono::DateTime::from_timestamp(sync_state.updated_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );

    println!("\nProjection:");
    println!("  Benefits: {}", stats.benefit_count);
    println!("  Redeemed: {}", stats.redeemed_count);
    println!("  Verified Vendors: {}", stats.verified_vendor_count);
    println!("  Journaled Events: {}", stats.event_count);
    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Benefits: {}", stats.benefit_count);
    info!("  Verified vendors: {}", stats.verified_vendor_count);
    info!("  Last block: {}", stats.last_block_number);

    storage.close().await;

    Ok(())
}

/// Run a single reconciliation pass
async fn reconcile_once(config_path: &str) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    let storage = open_storage(&config).await?;

    let ledger = Arc::new(
        RpcLedger::new(&config.network.rpc_url, config.contracts.welfare_benefit)
            .await
            .context("Failed to create RPC ledger")?,
    );

    let reconciler = Reconciler::new(
        ledger,
        storage.clone(),
        Duration::from_secs(config.reconcile.interval_secs),
    );
    let result = reconciler.run_once().await;
    storage.close().await;

    let report = result?;
    println!("\n=== Reconciliation ===\n");
    println!("  Checked: {}", report.checked);
    println!("  Expired: {}", report.expired);
    println!("  Redeemed: {}", report.redeemed);
    println!("  Diverged: {}", report.diverged);
    println!("  Failed: {}", report.failed);
    println!("  Replayed: {}", report.replayed);
    println!("  Unresolved: {}", report.unresolved);
    println!();

    Ok(())
}
