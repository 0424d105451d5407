use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::SystemClock;
use common::cli::{CommonArgs, utils};
use common::index::SqlIndex;
use common::storage::ObjectStoreBackend;
use replicator::ReplicationCoordinator;
use replicator::feed::{FeedSummary, process_file, process_lines};
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(name = "rollingbackup-replicator")]
#[command(about = "Apply object notifications to the rolling backup store")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Notification files, one batch each. Reads one batch per line from stdin when empty.
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging(&args.common);

    let config = utils::load_config(args.common.config.as_ref())?;

    let index = SqlIndex::connect(&config.index)
        .await
        .context("Failed to open metadata index")?;
    let storage =
        ObjectStoreBackend::from_config(&config.storage).context("Failed to open object stores")?;

    let coordinator = ReplicationCoordinator::new(
        Arc::new(index),
        Arc::new(storage),
        Arc::new(SystemClock),
    );
    let timeout = config.replicator.invocation_timeout;

    log::info!("Starting rolling backup replicator");

    let summary = if args.files.is_empty() {
        log::info!("Reading notification batches from stdin");
        process_lines(BufReader::new(tokio::io::stdin()), &coordinator, timeout)
            .await
            .context("Failed to read notifications from stdin")?
    } else {
        let mut summary = FeedSummary::default();
        for path in &args.files {
            let ok = process_file(path, &coordinator, timeout)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if ok {
                summary.succeeded += 1;
            } else {
                log::warn!("Batch from {} failed", path.display());
                summary.failed += 1;
            }
        }
        summary
    };

    coordinator.metrics().summary().log();
    log::info!(
        "Processed {} batches, {} failed",
        summary.succeeded + summary.failed,
        summary.failed
    );

    if !summary.all_succeeded() {
        anyhow::bail!("{} notification batches failed", summary.failed);
    }
    Ok(())
}
