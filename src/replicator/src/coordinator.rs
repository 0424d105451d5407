//! Copy-and-rotate on create, disown on remove.
//!
//! There is no lock around a key. Two creates for the same key racing each
//! other can both insert a live copy; the next create retires every copy older
//! than itself, so the extra live copy does not survive it. A remove racing a
//! create may miss the copy the create is about to insert; that copy stays
//! live until the next create or remove for the key.

use std::sync::Arc;

use common::{
    Clock, CopyIndex, CopyRecord, CopyTimestamps, EventKind, ObjectEvent, ObjectStorage,
    SortOrder, StoreError,
};

use crate::error::ReplicationError;
use crate::metrics::ReplicationMetrics;

/// Result of handling a create notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new live copy was recorded and `retired` older copies were removed.
    Replicated { record: CopyRecord, retired: usize },
    /// The source object was gone by the time it was copied; nothing was written.
    SourceMissing,
}

/// Result of handling a remove notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Copies that moved from live to disowned
    pub disowned: usize,
}

/// Totals for one notification batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub replicated: usize,
    pub retired: usize,
    pub skipped: usize,
    pub disowned: usize,
}

pub struct ReplicationCoordinator {
    index: Arc<dyn CopyIndex>,
    storage: Arc<dyn ObjectStorage>,
    timestamps: CopyTimestamps,
    metrics: ReplicationMetrics,
}

impl ReplicationCoordinator {
    pub fn new(
        index: Arc<dyn CopyIndex>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            storage,
            timestamps: CopyTimestamps::new(clock),
            metrics: ReplicationMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &ReplicationMetrics {
        &self.metrics
    }

    /// Apply a batch of notifications in order.
    ///
    /// Stops at the first failure and returns it. Events before it have been
    /// applied; the failed event and everything after it are left for
    /// redelivery of the batch.
    pub async fn handle_notifications(
        &self,
        batch: &[ObjectEvent],
    ) -> Result<BatchSummary, ReplicationError> {
        let mut summary = BatchSummary::default();

        for event in batch {
            self.metrics.record_event();
            let result = match event.kind {
                EventKind::Created => self.handle_put_event(event).await.map(|outcome| {
                    match outcome {
                        PutOutcome::Replicated { retired, .. } => {
                            summary.replicated += 1;
                            summary.retired += retired;
                        }
                        PutOutcome::SourceMissing => summary.skipped += 1,
                    }
                }),
                EventKind::Removed => self
                    .handle_delete_event(event)
                    .await
                    .map(|outcome| summary.disowned += outcome.disowned),
            };

            if let Err(e) = result {
                self.metrics.record_failure();
                tracing::error!(
                    kind = %event.kind,
                    key = %event.original_key,
                    bucket = %event.source_bucket_name,
                    error = %e,
                    "Failed to handle object event"
                );
                return Err(e);
            }
        }

        tracing::info!(
            events = batch.len(),
            replicated = summary.replicated,
            retired = summary.retired,
            skipped = summary.skipped,
            disowned = summary.disowned,
            "Notification batch processed"
        );
        Ok(summary)
    }

    /// Copy the object into the backup store and make that copy the only one kept.
    pub async fn handle_put_event(
        &self,
        event: &ObjectEvent,
    ) -> Result<PutOutcome, ReplicationError> {
        let key = event.original_key.as_str();
        let record = CopyRecord::new(key, self.timestamps.next());

        match self
            .storage
            .copy_to_backup(&event.source_bucket_name, key, &record.copy_key)
            .await
        {
            Ok(()) => {}
            Err(StoreError::SourceMissing { bucket, key }) => {
                self.metrics.record_source_missing();
                tracing::warn!(
                    bucket = %bucket,
                    key = %key,
                    "Source object vanished before it could be copied, skipping event"
                );
                return Ok(PutOutcome::SourceMissing);
            }
            Err(e) => return Err(ReplicationError::store(key, e)),
        }
        tracing::info!(key, copy_key = %record.copy_key, "Copied object to backup store");

        let existing = self
            .index
            .query_by_original(key, SortOrder::Ascending)
            .await
            .map_err(|e| ReplicationError::index(key, e))?;

        // Oldest first: the previous live copy goes before any stragglers.
        let mut retired = 0;
        for old in existing
            .iter()
            .filter(|r| r.copy_timestamp < record.copy_timestamp)
        {
            self.storage
                .delete_backup(&old.copy_key)
                .await
                .map_err(|e| ReplicationError::store(key, e))?;
            self.index
                .delete(&old.id())
                .await
                .map_err(|e| ReplicationError::index(key, e))?;
            retired += 1;
            tracing::info!(
                key,
                copy_key = %old.copy_key,
                disowned = old.is_disowned(),
                "Retired previous copy"
            );
        }

        self.index
            .put(&record)
            .await
            .map_err(|e| ReplicationError::index(key, e))?;

        self.metrics.record_copy_created();
        self.metrics.record_copies_retired(retired);
        tracing::debug!(key, copy_timestamp = record.copy_timestamp, "Recorded live copy");

        Ok(PutOutcome::Replicated { record, retired })
    }

    /// Disown every live copy of the removed object. Backup objects are left
    /// in place for the reclaimer.
    pub async fn handle_delete_event(
        &self,
        event: &ObjectEvent,
    ) -> Result<DeleteOutcome, ReplicationError> {
        let key = event.original_key.as_str();
        let records = self
            .index
            .query_by_original(key, SortOrder::Ascending)
            .await
            .map_err(|e| ReplicationError::index(key, e))?;

        let live: Vec<_> = records
            .iter()
            .filter(|r| !r.is_disowned())
            .map(CopyRecord::id)
            .collect();

        if live.is_empty() {
            tracing::info!(
                key,
                copies = records.len(),
                "No live copies to disown"
            );
            return Ok(DeleteOutcome { disowned: 0 });
        }

        let now = self.timestamps.clock().now_ms();
        let disowned = self
            .index
            .batch_mark_disowned(&live, now)
            .await
            .map_err(|e| ReplicationError::index(key, e))?;

        self.metrics.record_copies_disowned(disowned);
        tracing::info!(key, disowned, disown_timestamp = now, "Marked copies as disowned");
        Ok(DeleteOutcome { disowned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::index::InMemoryIndex;
    use common::testing::{FaultyIndex, ManualClock, MockObjectStorage};
    use common::{IndexError, RecordId};
    use mockall::predicate::eq;

    fn coordinator(
        index: Arc<dyn CopyIndex>,
        storage: MockObjectStorage,
        clock: Arc<ManualClock>,
    ) -> ReplicationCoordinator {
        ReplicationCoordinator::new(index, Arc::new(storage), clock)
    }

    fn accepting_storage() -> MockObjectStorage {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_copy_to_backup()
            .returning(|_, _, _| Ok(()));
        storage.expect_delete_backup().returning(|_| Ok(()));
        storage
    }

    #[tokio::test]
    async fn test_put_records_live_copy() {
        let index = Arc::new(InMemoryIndex::new());
        let clock = Arc::new(ManualClock::new(0));
        let mut storage = MockObjectStorage::new();
        storage
            .expect_copy_to_backup()
            .with(eq("src"), eq("a.txt"), eq("a.txt-0"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let coordinator = coordinator(index.clone(), storage, clock);
        let outcome = coordinator
            .handle_put_event(&ObjectEvent::created("src", "a.txt"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PutOutcome::Replicated {
                record: CopyRecord::new("a.txt", 0),
                retired: 0
            }
        );
        assert_eq!(index.snapshot().await, vec![CopyRecord::new("a.txt", 0)]);
    }

    #[tokio::test]
    async fn test_second_put_retires_previous_copy() {
        let index = Arc::new(InMemoryIndex::new());
        let clock = Arc::new(ManualClock::new(0));
        let mut storage = MockObjectStorage::new();
        storage
            .expect_copy_to_backup()
            .times(2)
            .returning(|_, _, _| Ok(()));
        storage
            .expect_delete_backup()
            .with(eq("a.txt-0"))
            .times(1)
            .returning(|_| Ok(()));

        let coordinator = coordinator(index.clone(), storage, clock.clone());
        let event = ObjectEvent::created("src", "a.txt");
        coordinator.handle_put_event(&event).await.unwrap();
        clock.set(100);
        let outcome = coordinator.handle_put_event(&event).await.unwrap();

        assert!(matches!(outcome, PutOutcome::Replicated { retired: 1, .. }));
        assert_eq!(index.snapshot().await, vec![CopyRecord::new("a.txt", 100)]);
    }

    #[tokio::test]
    async fn test_missing_source_writes_nothing() {
        let index = Arc::new(InMemoryIndex::new());
        let mut storage = MockObjectStorage::new();
        storage.expect_copy_to_backup().returning(|bucket, key, _| {
            Err(StoreError::SourceMissing {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        });
        storage.expect_delete_backup().never();

        let coordinator = coordinator(index.clone(), storage, Arc::new(ManualClock::new(5)));
        let outcome = coordinator
            .handle_put_event(&ObjectEvent::created("src", "gone.txt"))
            .await
            .unwrap();

        assert_eq!(outcome, PutOutcome::SourceMissing);
        assert!(index.is_empty().await);
        assert_eq!(coordinator.metrics().summary().sources_missing, 1);
    }

    #[tokio::test]
    async fn test_copy_failure_is_surfaced() {
        let index = Arc::new(InMemoryIndex::new());
        let mut storage = MockObjectStorage::new();
        storage
            .expect_copy_to_backup()
            .returning(|bucket, _, _| Err(StoreError::UnknownBucket(bucket.to_string())));

        let coordinator = coordinator(index.clone(), storage, Arc::new(ManualClock::new(5)));
        let err = coordinator
            .handle_put_event(&ObjectEvent::created("nowhere", "a.txt"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicationError::StoreOperationFailure { .. }));
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_retire_failure_keeps_old_record() {
        let index = Arc::new(InMemoryIndex::new());
        index.put(&CopyRecord::new("a.txt", 0)).await.unwrap();

        let mut storage = MockObjectStorage::new();
        storage
            .expect_copy_to_backup()
            .returning(|_, _, _| Ok(()));
        storage.expect_delete_backup().returning(|key| {
            Err(StoreError::UnknownBucket(format!("cannot delete {key}")))
        });

        let coordinator = coordinator(index.clone(), storage, Arc::new(ManualClock::new(100)));
        let err = coordinator
            .handle_put_event(&ObjectEvent::created("src", "a.txt"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicationError::StoreOperationFailure { .. }));
        // Object deletion failed first, so the record is still there and no new one was added
        assert_eq!(index.snapshot().await, vec![CopyRecord::new("a.txt", 0)]);
    }

    #[tokio::test]
    async fn test_record_write_failure_after_retire_leaves_no_record() {
        let inner = Arc::new(InMemoryIndex::new());
        inner.put(&CopyRecord::new("a.txt", 0)).await.unwrap();
        let index = Arc::new(FaultyIndex::new(inner.clone()));
        index.fail_puts(true);

        let mut storage = MockObjectStorage::new();
        storage
            .expect_copy_to_backup()
            .with(eq("src"), eq("a.txt"), eq("a.txt-100"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        storage
            .expect_delete_backup()
            .with(eq("a.txt-0"))
            .times(1)
            .returning(|_| Ok(()));

        let coordinator = coordinator(index, storage, Arc::new(ManualClock::new(100)));
        let err = coordinator
            .handle_put_event(&ObjectEvent::created("src", "a.txt"))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ReplicationError::IndexWriteFailure { key, .. } if key == "a.txt"
        ));
        assert!(inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_converges_duplicate_live_copies() {
        let index = Arc::new(InMemoryIndex::new());
        index.put(&CopyRecord::new("a.txt", 10)).await.unwrap();
        index.put(&CopyRecord::new("a.txt", 11)).await.unwrap();

        let coordinator = coordinator(
            index.clone(),
            accepting_storage(),
            Arc::new(ManualClock::new(50)),
        );
        let outcome = coordinator
            .handle_put_event(&ObjectEvent::created("src", "a.txt"))
            .await
            .unwrap();

        assert!(matches!(outcome, PutOutcome::Replicated { retired: 2, .. }));
        assert_eq!(index.snapshot().await, vec![CopyRecord::new("a.txt", 50)]);
    }

    #[tokio::test]
    async fn test_put_leaves_newer_records_alone() {
        let index = Arc::new(InMemoryIndex::new());
        // A concurrent create with a later timestamp already landed
        index.put(&CopyRecord::new("a.txt", 900)).await.unwrap();

        let coordinator = coordinator(
            index.clone(),
            accepting_storage(),
            Arc::new(ManualClock::new(50)),
        );
        coordinator
            .handle_put_event(&ObjectEvent::created("src", "a.txt"))
            .await
            .unwrap();

        assert_eq!(
            index.snapshot().await,
            vec![CopyRecord::new("a.txt", 50), CopyRecord::new("a.txt", 900)]
        );
    }

    #[tokio::test]
    async fn test_delete_disowns_and_is_idempotent() {
        let index = Arc::new(InMemoryIndex::new());
        index.put(&CopyRecord::new("a.txt", 100)).await.unwrap();
        let clock = Arc::new(ManualClock::new(150));

        let mut storage = MockObjectStorage::new();
        storage.expect_delete_backup().never();
        storage.expect_copy_to_backup().never();

        let coordinator = coordinator(index.clone(), storage, clock.clone());
        let event = ObjectEvent::removed("src", "a.txt");

        let first = coordinator.handle_delete_event(&event).await.unwrap();
        assert_eq!(first.disowned, 1);

        clock.set(400);
        let second = coordinator.handle_delete_event(&event).await.unwrap();
        assert_eq!(second.disowned, 0);

        assert_eq!(
            index.snapshot().await,
            vec![CopyRecord::new("a.txt", 100).disowned_at(150)]
        );
    }

    #[tokio::test]
    async fn test_delete_without_copies_is_noop() {
        let index = Arc::new(InMemoryIndex::new());
        let coordinator = coordinator(
            index.clone(),
            MockObjectStorage::new(),
            Arc::new(ManualClock::new(1)),
        );

        let outcome = coordinator
            .handle_delete_event(&ObjectEvent::removed("src", "never-copied"))
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome { disowned: 0 });
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_partial_disown_reports_failed_records() {
        let inner = Arc::new(InMemoryIndex::new());
        inner.put(&CopyRecord::new("a.txt", 1)).await.unwrap();
        inner.put(&CopyRecord::new("a.txt", 2)).await.unwrap();
        let index = Arc::new(FaultyIndex::new(inner.clone()));
        index.fail_disown_for(RecordId::new("a.txt", 2));

        let coordinator = coordinator(
            index.clone(),
            MockObjectStorage::new(),
            Arc::new(ManualClock::new(10)),
        );
        let event = ObjectEvent::removed("src", "a.txt");
        let err = coordinator.handle_delete_event(&event).await.unwrap_err();

        match err {
            ReplicationError::PartialBatchDisownFailure { updated, failed, .. } => {
                assert_eq!(updated, 1);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, RecordId::new("a.txt", 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Retrying after recovery only touches the record that failed
        index.heal();
        let retry = coordinator.handle_delete_event(&event).await.unwrap();
        assert_eq!(retry.disowned, 1);
        assert!(inner.snapshot().await.iter().all(|r| r.disown_timestamp == Some(10)));
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let inner = Arc::new(InMemoryIndex::new());
        let index = Arc::new(FaultyIndex::new(inner.clone()));
        let coordinator = coordinator(
            index.clone(),
            accepting_storage(),
            Arc::new(ManualClock::new(0)),
        );

        coordinator
            .handle_notifications(&[ObjectEvent::created("src", "a.txt")])
            .await
            .unwrap();

        index.fail_queries(true);
        let batch = [
            ObjectEvent::removed("src", "a.txt"),
            ObjectEvent::created("src", "b.txt"),
        ];
        let err = coordinator.handle_notifications(&batch).await.unwrap_err();

        assert!(matches!(
            err,
            ReplicationError::IndexWriteFailure {
                source: IndexError::Unavailable(_),
                ..
            }
        ));
        assert_eq!(err.key(), "a.txt");
        // b.txt was never reached
        let keys: Vec<_> = inner
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.original_key)
            .collect();
        assert_eq!(keys, vec!["a.txt"]);
        assert_eq!(coordinator.metrics().summary().failures, 1);
    }

    #[tokio::test]
    async fn test_batch_summary_totals() {
        let index = Arc::new(InMemoryIndex::new());
        let clock = Arc::new(ManualClock::new(0));
        let coordinator = coordinator(index.clone(), accepting_storage(), clock);

        let batch = [
            ObjectEvent::created("src", "a.txt"),
            ObjectEvent::created("src", "a.txt"),
            ObjectEvent::created("src", "b.txt"),
            ObjectEvent::removed("src", "b.txt"),
            ObjectEvent::removed("src", "c.txt"),
        ];
        let summary = coordinator.handle_notifications(&batch).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                replicated: 3,
                retired: 1,
                skipped: 0,
                disowned: 1,
            }
        );
        // Same millisecond, still distinct identities
        let records = index.snapshot().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], CopyRecord::new("a.txt", 1));
        assert!(records[1].is_disowned());
    }
}
