//! Reclamation metrics
//!
//! Thread-safe counters for reclaimer passes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReclaimMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Passes that completed, including ones with per-record failures
    runs: AtomicUsize,
    /// Passes that could not read the disowned view or timed out
    runs_failed: AtomicUsize,
    reclaimed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    last_run_duration_ms: AtomicU64,
}

impl Default for ReclaimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReclaimMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record a finished pass
    pub fn record_run(&self, reclaimed: usize, failed: usize, skipped: usize, duration: Duration) {
        self.inner.runs.fetch_add(1, Ordering::Relaxed);
        self.inner.reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
        self.inner.failed.fetch_add(failed, Ordering::Relaxed);
        self.inner.skipped.fetch_add(skipped, Ordering::Relaxed);
        self.inner.last_run_duration_ms.store(
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    pub fn record_run_failed(&self) {
        self.inner.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> ReclaimSummary {
        ReclaimSummary {
            runs: self.inner.runs.load(Ordering::Relaxed),
            runs_failed: self.inner.runs_failed.load(Ordering::Relaxed),
            reclaimed: self.inner.reclaimed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            skipped: self.inner.skipped.load(Ordering::Relaxed),
            last_run_duration: Duration::from_millis(
                self.inner.last_run_duration_ms.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Point-in-time copy of the reclamation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReclaimSummary {
    pub runs: usize,
    pub runs_failed: usize,
    pub reclaimed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub last_run_duration: Duration,
}

impl ReclaimSummary {
    pub fn log(&self) {
        log::info!("=== Reclaimer Metrics Summary ===");
        log::info!("Runs: {} completed, {} failed", self.runs, self.runs_failed);
        log::info!(
            "Copies: {} reclaimed, {} failed, {} skipped",
            self.reclaimed,
            self.failed,
            self.skipped
        );
        log::info!("Last run took {:?}", self.last_run_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_totals_accumulate() {
        let metrics = ReclaimMetrics::new();
        metrics.record_run(3, 1, 0, Duration::from_millis(40));
        metrics.record_run(2, 0, 4, Duration::from_millis(15));
        metrics.record_run_failed();

        let summary = metrics.clone().summary();
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.runs_failed, 1);
        assert_eq!(summary.reclaimed, 5);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.last_run_duration, Duration::from_millis(15));
    }
}
