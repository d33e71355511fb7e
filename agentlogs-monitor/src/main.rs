//! agentlogs-monitor - incremental transcript monitor
//!
//! Watches recently active agent sessions and stores their new entries in
//! the message store until interrupted.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/agentlogs/messages.db (~/.local/share/agentlogs/messages.db)
//! - Logs: $XDG_STATE_HOME/agentlogs/agentlogs.<date>.log (~/.local/state/agentlogs/)
//! - Config: $XDG_CONFIG_HOME/agentlogs/config.toml (~/.config/agentlogs/config.toml)

use agentlogs_core::{Config, Monitor, OffsetTracker, RecentlyActive, SqliteStore};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agentlogs-monitor")]
#[command(about = "Store new entries from active agent sessions")]
#[command(version)]
struct Args {
    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Seconds between passes (overrides config)
    #[arg(long)]
    interval: Option<u64>,

    /// Message store path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(interval) = args.interval {
        config.monitor.interval_secs = interval;
    }
    if let Some(db) = args.db {
        config.monitor.database_path = Some(db);
    }
    match args.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    config.validate().context("invalid configuration")?;

    let _log_guard =
        agentlogs_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("agentlogs-monitor starting");

    let db_path = config.database_path();
    tracing::info!(path = %db_path.display(), "Opening message store");

    let store = SqliteStore::open(&db_path).context("failed to open message store")?;
    store.migrate().context("failed to run message store migrations")?;
    let offsets = OffsetTracker::from_map(
        store
            .load_offsets()
            .context("failed to load extraction offsets")?,
    );

    println!("Database: {}", db_path.display());

    let mut monitor = Monitor::new(
        RecentlyActive::from_config(&config),
        Arc::new(store),
        offsets,
        Duration::from_secs(config.monitor.interval_secs),
    );

    if args.once {
        let report = tokio::task::spawn_blocking(move || {
            let mut report = monitor.tick();
            let flushed = monitor.flush_all();
            report.entries += flushed.entries;
            report.failed += flushed.failed;
            report
        })
        .await
        .context("monitor pass failed")?;
        println!(
            "Checked {} session(s): {} entries stored, {} records skipped, {} failed",
            report.sessions, report.entries, report.skipped_records, report.failed
        );
        return Ok(());
    }

    println!(
        "Monitoring active sessions every {}s. Press Ctrl+C to stop.",
        config.monitor.interval_secs
    );
    let handle = monitor.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    eprintln!("\nShutting down...");

    handle.stop().await;

    println!("Monitor stopped.");
    tracing::info!("agentlogs-monitor stopped");
    Ok(())
}
