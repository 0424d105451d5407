use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{IndexError, IndexResult};
use crate::index::{CopyIndex, DisownedCursor, InMemoryIndex, SortOrder};
use crate::model::{CopyRecord, RecordId};

/// [`InMemoryIndex`] wrapper that fails selected operations on demand.
#[derive(Debug, Default)]
pub struct FaultyIndex {
    inner: Arc<InMemoryIndex>,
    fail_puts: AtomicBool,
    fail_queries: AtomicBool,
    fail_disown_for: Mutex<HashSet<RecordId>>,
    fail_delete_for: Mutex<HashSet<RecordId>>,
}

impl FaultyIndex {
    pub fn new(inner: Arc<InMemoryIndex>) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryIndex> {
        &self.inner
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disown_for(&self, id: RecordId) {
        self.fail_disown_for.lock().unwrap().insert(id);
    }

    pub fn fail_delete_for(&self, id: RecordId) {
        self.fail_delete_for.lock().unwrap().insert(id);
    }

    pub fn heal(&self) {
        self.fail_puts(false);
        self.fail_queries(false);
        self.fail_disown_for.lock().unwrap().clear();
        self.fail_delete_for.lock().unwrap().clear();
    }

    fn check_queries(&self) -> IndexResult<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("injected query failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CopyIndex for FaultyIndex {
    async fn put(&self, record: &CopyRecord) -> IndexResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("injected put failure".into()));
        }
        self.inner.put(record).await
    }

    async fn query_by_original(
        &self,
        original_key: &str,
        order: SortOrder,
    ) -> IndexResult<Vec<CopyRecord>> {
        self.check_queries()?;
        self.inner.query_by_original(original_key, order).await
    }

    async fn query_disowned_before(
        &self,
        threshold: i64,
        after: Option<&DisownedCursor>,
        limit: usize,
    ) -> IndexResult<Vec<CopyRecord>> {
        self.check_queries()?;
        self.inner.query_disowned_before(threshold, after, limit).await
    }

    async fn delete(&self, id: &RecordId) -> IndexResult<()> {
        if self.fail_delete_for.lock().unwrap().contains(id) {
            return Err(IndexError::Unavailable(format!("injected delete failure for {id}")));
        }
        self.inner.delete(id).await
    }

    async fn batch_mark_disowned(
        &self,
        ids: &[RecordId],
        disown_timestamp: i64,
    ) -> IndexResult<usize> {
        let blocked = self.fail_disown_for.lock().unwrap().clone();
        let (failing, passing): (Vec<RecordId>, Vec<RecordId>) =
            ids.iter().cloned().partition(|id| blocked.contains(id));

        let updated = self
            .inner
            .batch_mark_disowned(&passing, disown_timestamp)
            .await?;

        if failing.is_empty() {
            Ok(updated)
        } else {
            Err(IndexError::PartialDisown {
                updated,
                failed: failing
                    .into_iter()
                    .map(|id| (id, "injected disown failure".to_string()))
                    .collect(),
            })
        }
    }
}
