//! IssueTracker indexer - mirrors contract events into SQLite
//!
//! This binary provides:
//! - Live listening to the five IssueTracker events over WebSocket
//! - Full resync from block 0 to the chain tip
//! - Database initialization and status reporting

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issuetrack_indexer::config::{Config, LoggingConfig};
use issuetrack_indexer::lifecycle::{Indexer, Tallies};
use issuetrack_indexer::listener::provider::redact;
use issuetrack_indexer::listener::{ChainSource, RpcProvider};
use issuetrack_indexer::storage::Storage;
use issuetrack_indexer::EventKind;
use tracing::{error, info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://issuetrack.db";

#[derive(Parser)]
#[command(name = "issuetrack-indexer")]
#[command(version, about = "Mirrors IssueTracker contract events into SQLite", long_about = None)]
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
    /// Listen for contract events until Ctrl+C
    Run,

    /// Replay every contract event from block 0 to the chain tip
    Resync,

    /// Show database statistics
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = DEFAULT_DATABASE_URL)]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging preferences come from the config file when it loads; the
    // commands below report any load error themselves.
    let logging = Config::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.debug, &logging)?;

    info!("IssueTracker indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::Resync => resync_once(&cli.config).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("issuetrack_indexer=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("issuetrack_indexer={}", logging.level)))
    };

    let fmt_layer = fmt::layer().with_target(true).with_line_number(true);
    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.format == "json" {
        registry.with(fmt_layer.json()).try_init()?;
    } else {
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}

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

async fn connect_provider(config: &Config) -> Result<Arc<RpcProvider>> {
    let provider = RpcProvider::connect(&config.network.ws_url, config.contracts.issue_tracker)
        .await
        .context("Failed to create WebSocket provider")?;

    let chain_id = provider
        .chain_id()
        .await
        .context("Failed to query chain ID")?;
    if chain_id != config.network.chain_id {
        provider.release().await;
        anyhow::bail!(
            "Connected to chain {} but configuration expects chain {}",
            chain_id,
            config.network.chain_id
        );
    }

    Ok(Arc::new(provider))
}

/// Main indexer service - optional resync, then live listening
async fn run_indexer(config_path: &str) -> Result<()> {
    info!("Starting indexer service with config: {}", config_path);

    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  WebSocket URL: {}", redact(&config.network.ws_url));
    info!("  IssueTracker: {}", config.contracts.issue_tracker);
    info!("  Database: {}", config.database.url);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let provider = connect_provider(&config).await?;
    let indexer = Indexer::from_config(provider, storage.clone(), &config);

    if config.listener.resync_on_start {
        info!("Resyncing before listening");
        match indexer.resync_if_empty().await {
            Ok(Some(report)) => print_tallies("Startup resync", &report.tallies),
            Ok(None) => {}
            Err(e) => {
                error!("Startup resync failed: {}", e);
                indexer.shutdown().await;
                storage.close().await;
                return Err(e).context("Startup resync failed");
            }
        }
    }

    if let Err(e) = indexer.start().await {
        indexer.shutdown().await;
        storage.close().await;
        return Err(e);
    }

    info!("Indexer is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Received Ctrl+C, shutting down...");

    let report = indexer.shutdown().await;
    let total = report.tallies.total();
    if total.failed > 0 || total.dropped > 0 {
        warn!(
            failed = total.failed,
            dropped = total.dropped,
            "Some events were not applied and will not be retried; see the error log for their details"
        );
    }

    storage.close().await;
    info!("Shutdown complete");

    Ok(())
}

/// One-shot full resync
async fn resync_once(config_path: &str) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    let storage = open_storage(&config).await?;
    let provider = connect_provider(&config).await?;
    let indexer = Indexer::from_config(provider, storage.clone(), &config);

    let result = indexer.resync().await;

    indexer.shutdown().await;

    match result {
        Ok(report) => {
            println!("\n=== Resync Report (tip: block {}) ===\n", report.tip);
            print_tallies("Resync", &report.tallies);
            let stats = storage.stats().await?;
            println!("\nDatabase now holds {} issues", stats.issue_count);
            storage.close().await;
            Ok(())
        }
        Err(e) => {
            error!("Resync aborted: {}", e);
            storage.close().await;
            Err(e).context("Resync aborted; replay into an empty database to mirror fully")
        }
    }
}

fn print_tallies(label: &str, tallies: &Tallies) {
    println!(
        "{:<24} {:>8} {:>8} {:>8} {:>8}",
        label, "applied", "present", "dropped", "skipped"
    );
    for kind in EventKind::RESYNC_ORDER {
        let tally = tallies.get(kind);
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8}",
            kind.as_str(),
            tally.applied,
            tally.already_applied,
            tally.dropped,
            tally.skipped
        );
    }
}

/// Show database statistics
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database ONLY if the config file doesn't exist
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
            // Config::from_file wraps errors with context, so walk the chain
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            if is_not_found {
                info!(
                    "Config file not found, using default database: {}",
                    DEFAULT_DATABASE_URL
                );
                (DEFAULT_DATABASE_URL.to_string(), None, None)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;

    // Run migrations to ensure schema exists (handles fresh database)
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let stats = storage.stats().await?;

    println!("\n=== IssueTracker Indexer Status ===\n");
    println!("Database: {}", database_url);
    println!("\nDatabase Statistics:");
    println!("  Organizations: {}", stats.organization_count);
    println!("  Projects: {}", stats.project_count);
    println!("  Issues: {}", stats.issue_count);
    println!("  Transactions: {}", stats.transaction_count);
    println!("  Stacks: {}", stats.stack_count);
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
    info!("  Organizations: {}", stats.organization_count);
    info!("  Issues: {}", stats.issue_count);

    storage.close().await;

    Ok(())
}
