//! Replication metrics tracking
//!
//! Thread-safe counters for coordinator activity.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread-safe metrics for tracking replication operations
#[derive(Debug, Clone)]
pub struct ReplicationMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    events_processed: AtomicUsize,
    copies_created: AtomicUsize,
    copies_retired: AtomicUsize,
    copies_disowned: AtomicUsize,
    sources_missing: AtomicUsize,
    failures: AtomicUsize,
}

impl Default for ReplicationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_event(&self) {
        self.inner.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy_created(&self) {
        self.inner.copies_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copies_retired(&self, count: usize) {
        self.inner
            .copies_retired
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_copies_disowned(&self, count: usize) {
        self.inner
            .copies_disowned
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_source_missing(&self) {
        self.inner.sources_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            events_processed: self.inner.events_processed.load(Ordering::Relaxed),
            copies_created: self.inner.copies_created.load(Ordering::Relaxed),
            copies_retired: self.inner.copies_retired.load(Ordering::Relaxed),
            copies_disowned: self.inner.copies_disowned.load(Ordering::Relaxed),
            sources_missing: self.inner.sources_missing.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the replication counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSummary {
    pub events_processed: usize,
    pub copies_created: usize,
    pub copies_retired: usize,
    pub copies_disowned: usize,
    pub sources_missing: usize,
    pub failures: usize,
}

impl MetricsSummary {
    /// Log the metrics summary
    pub fn log(&self) {
        log::info!("=== Replication Metrics Summary ===");
        log::info!(
            "Events: {} processed, {} failed",
            self.events_processed,
            self.failures
        );
        log::info!(
            "Copies: {} created, {} retired, {} disowned",
            self.copies_created,
            self.copies_retired,
            self.copies_disowned
        );
        log::info!("Skipped (source missing): {}", self.sources_missing);
    }
}
