//! Line-oriented notification feed: one JSON notification batch per line.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::coordinator::ReplicationCoordinator;
use crate::notification::parse_notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl FeedSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Apply one raw notification payload under `timeout`. Returns whether it succeeded.
pub async fn process_payload(
    payload: &[u8],
    coordinator: &ReplicationCoordinator,
    timeout: Duration,
) -> bool {
    let events = match parse_notification(payload) {
        Ok(events) => events,
        Err(e) => {
            tracing::error!(error = %e, "Rejecting notification batch");
            return false;
        }
    };

    match tokio::time::timeout(timeout, coordinator.handle_notifications(&events)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!(key = %e.key(), error = %e, "Notification batch failed, leaving it for redelivery");
            false
        }
        Err(_) => {
            tracing::error!(
                events = events.len(),
                timeout_secs = timeout.as_secs_f64(),
                "Notification batch exceeded its invocation timeout"
            );
            false
        }
    }
}

/// Read batches from `reader` until EOF. Blank lines are ignored.
pub async fn process_lines<R>(
    reader: R,
    coordinator: &ReplicationCoordinator,
    timeout: Duration,
) -> std::io::Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = FeedSummary::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if process_payload(line.as_bytes(), coordinator, timeout).await {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
    }

    Ok(summary)
}

/// Apply a file holding a single notification batch.
pub async fn process_file(
    path: &Path,
    coordinator: &ReplicationCoordinator,
    timeout: Duration,
) -> std::io::Result<bool> {
    let payload = tokio::fs::read(path).await?;
    tracing::debug!(path = %path.display(), bytes = payload.len(), "Processing notification file");
    Ok(process_payload(&payload, coordinator, timeout).await)
}
