use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleaner::{Reclaimer, run_schedule};
use common::cli::{CommonArgs, utils};
use common::index::SqlIndex;
use common::storage::ObjectStoreBackend;
use common::{CopyIndex, ObjectStorage, SystemClock};
use replicator::ReplicationCoordinator;
use replicator::feed::process_lines;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(name = "rollingbackup")]
#[command(about = "Rolling backup replicator and reclaimer in one process")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

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

    log::info!("Starting rolling backup service");

    let index: Arc<dyn CopyIndex> = Arc::new(
        SqlIndex::connect(&config.index)
            .await
            .context("Failed to open metadata index")?,
    );
    let storage: Arc<dyn ObjectStorage> = Arc::new(
        ObjectStoreBackend::from_config(&config.storage)
            .context("Failed to open object stores")?,
    );
    let clock = Arc::new(SystemClock);

    let coordinator = ReplicationCoordinator::new(index.clone(), storage.clone(), clock.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let reclaimer = config.cleaner.enabled.then(|| {
        Arc::new(Reclaimer::new(
            config.cleaner.clone(),
            index.clone(),
            storage.clone(),
            clock.clone(),
        ))
    });
    let schedule = match &reclaimer {
        Some(reclaimer) => Some(tokio::spawn(run_schedule(reclaimer.clone(), async move {
            let _ = shutdown_rx.await;
        }))),
        None => {
            log::info!("Reclaimer is disabled in configuration (cleaner.enabled = false)");
            None
        }
    };

    log::info!("Reading notification batches from stdin");
    let feed = process_lines(
        BufReader::new(tokio::io::stdin()),
        &coordinator,
        config.replicator.invocation_timeout,
    );

    tokio::select! {
        summary = feed => {
            let summary = summary.context("Failed to read notifications from stdin")?;
            log::info!(
                "Notification feed closed after {} batches, {} failed",
                summary.succeeded + summary.failed,
                summary.failed
            );
            if schedule.is_some() {
                log::info!("Reclaimer still running, waiting for shutdown signal");
                wait_for_shutdown_signal().await?;
            }
        }
        signal = wait_for_shutdown_signal() => signal?,
    }

    log::info!("Shutting down rolling backup service");
    let _ = shutdown_tx.send(());
    if let Some(schedule) = schedule {
        schedule.await.context("Reclaimer schedule task panicked")?;
    }

    coordinator.metrics().summary().log();
    if let Some(reclaimer) = reclaimer {
        reclaimer.metrics().summary().log();
    }
    Ok(())
}
