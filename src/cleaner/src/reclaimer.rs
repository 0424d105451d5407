//! Deletion of disowned copies that have outlived the grace period.
//!
//! Each copy is removed object first, record second, so an interrupted pass
//! can leave an unreferenced backup object but never a record pointing at a
//! missing one. Both deletions tolerate the target already being gone, which
//! makes overlapping passes and a concurrent rotation safe.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::config::CleanerConfig;
use common::{
    Clock, CopyIndex, CopyRecord, DisownedCursor, IndexError, ObjectStorage, RecordId, SortOrder,
};

use crate::metrics::ReclaimMetrics;

/// Outcome of one reclaimer pass.
#[derive(Debug, Clone)]
pub struct ReclaimResult {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Copies whose object and record were deleted. In dry-run mode, copies
    /// that would have been.
    pub reclaimed_count: usize,
    /// Copies that could not be reclaimed, with the reason.
    pub failed: Vec<(RecordId, String)>,
    /// Candidates dropped by revalidation.
    pub skipped: usize,
    pub dry_run: bool,
}

enum Verdict {
    Reclaim,
    Skip(&'static str),
}

pub struct Reclaimer {
    config: CleanerConfig,
    index: Arc<dyn CopyIndex>,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
    metrics: ReclaimMetrics,
    runs: AtomicU64,
}

impl Reclaimer {
    pub fn new(
        config: CleanerConfig,
        index: Arc<dyn CopyIndex>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            index,
            storage,
            clock,
            metrics: ReclaimMetrics::new(),
            runs: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> &ReclaimMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// Run one pass and return what it did.
    ///
    /// # Errors
    ///
    /// Fails only when the disowned view cannot be read. Failures on
    /// individual copies are reported in [`ReclaimResult::failed`] and do not
    /// stop the pass.
    pub async fn run(&self) -> Result<ReclaimResult, IndexError> {
        let run_id = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let started_at = Utc::now();
        let timer = Instant::now();
        let threshold = self
            .clock
            .now_ms()
            .saturating_sub(self.config.grace_period_ms());

        tracing::info!(
            run_id,
            threshold,
            batch_size = self.config.batch_size,
            dry_run = self.config.dry_run,
            "Starting reclaimer pass"
        );

        let mut cursor: Option<DisownedCursor> = None;
        let mut reclaimed_count = 0;
        let mut skipped = 0;
        let mut failed = Vec::new();

        for page_no in 1..=self.config.max_batches_per_run {
            let page = match self
                .index
                .query_disowned_before(threshold, cursor.as_ref(), self.config.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.metrics.record_run_failed();
                    tracing::error!(run_id, error = %e, "Failed to read disowned copies");
                    return Err(e);
                }
            };

            tracing::debug!(
                run_id,
                page = page_no,
                fetched = page.len(),
                "Fetched page of disowned copies"
            );

            // The next page starts after this one even if some of its copies fail
            let Some(last) = page.last() else {
                break;
            };
            cursor = DisownedCursor::at(last);

            for record in &page {
                if self.config.revalidate_before_delete {
                    match self.revalidate(record, threshold).await {
                        Ok(Verdict::Reclaim) => {}
                        Ok(Verdict::Skip(reason)) => {
                            tracing::warn!(
                                run_id,
                                record = %record.id(),
                                reason,
                                "Skipping copy after revalidation"
                            );
                            skipped += 1;
                            continue;
                        }
                        Err(e) => {
                            tracing::error!(
                                run_id,
                                record = %record.id(),
                                error = %e,
                                "Revalidation failed, leaving copy for a later pass"
                            );
                            failed.push((record.id(), e.to_string()));
                            continue;
                        }
                    }
                }

                if self.config.dry_run {
                    tracing::info!(
                        run_id,
                        record = %record.id(),
                        copy_key = %record.copy_key,
                        disown_timestamp = record.disown_timestamp,
                        "[DRY-RUN] Would reclaim disowned copy"
                    );
                    reclaimed_count += 1;
                    continue;
                }

                match self.reclaim(record).await {
                    Ok(()) => {
                        tracing::info!(
                            run_id,
                            record = %record.id(),
                            copy_key = %record.copy_key,
                            "Reclaimed disowned copy"
                        );
                        reclaimed_count += 1;
                    }
                    Err(reason) => {
                        tracing::error!(
                            run_id,
                            record = %record.id(),
                            error = %reason,
                            "Failed to reclaim disowned copy"
                        );
                        failed.push((record.id(), reason));
                    }
                }
            }

            if page.len() < self.config.batch_size {
                break;
            }
        }

        let result = ReclaimResult {
            run_id,
            started_at,
            completed_at: Utc::now(),
            reclaimed_count,
            failed,
            skipped,
            dry_run: self.config.dry_run,
        };

        let elapsed = timer.elapsed();
        self.metrics
            .record_run(result.reclaimed_count, result.failed.len(), result.skipped, elapsed);
        tracing::info!(
            run_id,
            reclaimed = result.reclaimed_count,
            failed = result.failed.len(),
            skipped = result.skipped,
            dry_run = result.dry_run,
            duration_ms = elapsed.as_millis() as u64,
            "Reclaimer pass complete"
        );

        Ok(result)
    }

    /// Re-read the candidate through the primary path.
    async fn revalidate(&self, record: &CopyRecord, threshold: i64) -> Result<Verdict, IndexError> {
        let current = self
            .index
            .query_by_original(&record.original_key, SortOrder::Ascending)
            .await?
            .into_iter()
            .find(|r| r.copy_timestamp == record.copy_timestamp);

        Ok(match current {
            None => Verdict::Skip("record no longer exists"),
            Some(r) if !r.is_disowned() => Verdict::Skip("record is not disowned"),
            Some(r) if !r.disowned_before(threshold) => Verdict::Skip("grace period not elapsed"),
            Some(_) => Verdict::Reclaim,
        })
    }

    async fn reclaim(&self, record: &CopyRecord) -> Result<(), String> {
        self.storage
            .delete_backup(&record.copy_key)
            .await
            .map_err(|e| format!("object delete failed: {e}"))?;
        self.index
            .delete(&record.id())
            .await
            .map_err(|e| format!("record delete failed: {e}"))
    }
}
