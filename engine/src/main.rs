//! TMC compensation engine service
//!
//! Runs the daily accrual and monthly reward batches against a snapshot-backed ledger.
//! `tmc-engine init-config [path]` writes the default configuration and exits.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tmc_engine::{Config, Engine, EngineError, MemoryLedger, RunSummary};
use tokio::sync::watch;
use tokio::time;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("init-config") {
        let path = args.get(2).map(String::as_str).unwrap_or("engine-config.toml");
        return Config::write_default(path);
    }

    log::info!("Starting TMC compensation engine");

    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({:#}), using defaults", e);
        Config::default_params()
    });

    let snapshot = config.snapshot_path();
    let ledger = Arc::new(
        MemoryLedger::open(&snapshot)
            .await
            .context(format!("Failed to open ledger at {}", snapshot.display()))?,
    );
    log::info!("Ledger snapshot: {}", snapshot.display());

    let poll = Duration::from_secs(config.poll_interval_secs);
    let engine = Engine::new(config, ledger.clone());

    // Ctrl-C stops the run in progress and ends the loop once the snapshot is saved
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let abort = engine.abort_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::warn!("Shutdown requested");
                abort.abort();
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                log::error!("Failed to listen for ctrl-c: {}", e);
                // Dropping the sender would end the loop
                std::future::pending::<()>().await;
            }
        }
    });

    let mut interval = time::interval(poll);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        let now = unix_now()?;
        report(engine.run_daily_accrual(now).await);
        if !*shutdown_rx.borrow() {
            report(engine.run_monthly_rewards(now).await);
        }

        if let Err(e) = ledger.save_snapshot(&snapshot).await {
            log::error!("Failed to save ledger snapshot: {}", e);
        }

        let deferred = engine.deferred_bonuses();
        if !deferred.is_empty() {
            log::debug!("Deferred bonus walks: {}", deferred.len());
        }

        if *shutdown_rx.borrow() {
            break;
        }
    }

    ledger
        .save_snapshot(&snapshot)
        .await
        .context("Failed to save ledger snapshot on shutdown")?;
    log::info!("Engine stopped");
    Ok(())
}

fn report(result: Result<RunSummary, EngineError>) {
    match result {
        Ok(summary) if !summary.is_clean() => {
            log::warn!(
                "{} run for period {} finished with {} failures",
                summary.kind,
                summary.period,
                summary.failures.len()
            );
        }
        Ok(_) => {}
        Err(EngineError::AlreadyRan { kind, period }) => {
            log::debug!("{} already ran for period {}", kind, period);
        }
        Err(e @ EngineError::RunLocked(_)) => log::warn!("{}", e),
        Err(e) => log::error!("Batch run failed: {}", e),
    }
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock before Unix epoch")?
        .as_secs())
}
