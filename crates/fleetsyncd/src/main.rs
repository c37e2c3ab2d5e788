//! fleetsyncd - cron-scheduled git fleet synchronization daemon.
//!
//! Without a subcommand the daemon arms the scheduler and runs until
//! interrupted. `add-all <path>` scans a directory for working copies,
//! registers the missing ones in the fleet configuration, and exits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetsync_core::{init_tracing, EventLog, Scheduler, SettingsStore, SyncService, SyncSettings};
use tokio::sync::watch;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "fleetsyncd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keep a fleet of git working copies in sync", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: <config home>/config.toml)
    #[arg(long, env = "FLEETSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory and register every working copy found in its
    /// immediate subdirectories
    AddAll {
        /// Directory to scan
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let config_path = cli.config.unwrap_or_else(SyncSettings::default_path);
    let (settings, created) = SettingsStore::open(config_path.clone())
        .with_context(|| format!("loading {}", config_path.display()))?;
    if created {
        info!("wrote default configuration to {}", config_path.display());
    }

    let log = EventLog::disabled();
    let service = SyncService::new(settings.clone(), log.clone());

    if let Some(Commands::AddAll { path }) = cli.command {
        let added = service.add_all(&path).await?;
        info!("registered {added} new repositories");
        return Ok(());
    }

    let snapshot = settings.get().await;
    info!(
        "settings: {}",
        serde_json::to_string_pretty(&snapshot).unwrap_or_default()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    Scheduler::new(settings, service, log).run(shutdown_rx).await?;
    Ok(())
}
