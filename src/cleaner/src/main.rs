use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleaner::{Reclaimer, run_schedule};
use common::SystemClock;
use common::cli::{CommonArgs, utils};
use common::index::SqlIndex;
use common::storage::ObjectStoreBackend;

#[derive(Parser, Debug)]
#[command(name = "rollingbackup-cleaner")]
#[command(about = "Reclaim disowned backup copies after their grace period")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging(&args.common);

    let config = utils::load_config(args.common.config.as_ref())?;

    if !config.cleaner.enabled && !args.once {
        log::info!("Reclaimer is disabled in configuration (cleaner.enabled = false)");
        log::info!("Set ROLLINGBACKUP__CLEANER__ENABLED=true or pass --once to run a single pass");
        return Ok(());
    }

    let index = SqlIndex::connect(&config.index)
        .await
        .context("Failed to open metadata index")?;
    let storage =
        ObjectStoreBackend::from_config(&config.storage).context("Failed to open object stores")?;

    let reclaimer = Arc::new(Reclaimer::new(
        config.cleaner.clone(),
        Arc::new(index),
        Arc::new(storage),
        Arc::new(SystemClock),
    ));

    if args.once {
        let result = tokio::time::timeout(config.cleaner.invocation_timeout, reclaimer.run())
            .await
            .context("Reclaimer pass timed out")?
            .context("Reclaimer pass failed")?;
        log::info!(
            "Reclaimed {} copies ({} failed, {} skipped)",
            result.reclaimed_count,
            result.failed.len(),
            result.skipped
        );
        if !result.failed.is_empty() {
            anyhow::bail!("{} copies could not be reclaimed", result.failed.len());
        }
        return Ok(());
    }

    log::info!(
        "Starting rolling backup reclaimer, grace period {:?}, interval {:?}",
        config.cleaner.grace_period,
        config.cleaner.interval
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let schedule = tokio::spawn(run_schedule(reclaimer.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    log::info!("Reclaimer running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Received shutdown signal, stopping reclaimer");
    let _ = shutdown_tx.send(());
    schedule.await.context("Reclaimer schedule task panicked")?;

    reclaimer.metrics().summary().log();
    log::info!("Reclaimer stopped");
    Ok(())
}
