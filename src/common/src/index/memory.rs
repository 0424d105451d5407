use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{CopyIndex, DisownedCursor, SortOrder};
use crate::error::IndexResult;
use crate::model::{CopyRecord, RecordId};

/// In-process index keyed by record identity.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    records: RwLock<BTreeMap<RecordId, CopyRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, in identity order.
    pub async fn snapshot(&self) -> Vec<CopyRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CopyIndex for InMemoryIndex {
    async fn put(&self, record: &CopyRecord) -> IndexResult<()> {
        self.records
            .write()
            .await
            .insert(record.id(), record.clone());
        Ok(())
    }

    async fn query_by_original(
        &self,
        original_key: &str,
        order: SortOrder,
    ) -> IndexResult<Vec<CopyRecord>> {
        let records = self.records.read().await;
        let range = RecordId::new(original_key, i64::MIN)..=RecordId::new(original_key, i64::MAX);
        let mut matching: Vec<CopyRecord> = records.range(range).map(|(_, r)| r.clone()).collect();
        if order == SortOrder::Descending {
            matching.reverse();
        }
        Ok(matching)
    }

    async fn query_disowned_before(
        &self,
        threshold: i64,
        after: Option<&DisownedCursor>,
        limit: usize,
    ) -> IndexResult<Vec<CopyRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<CopyRecord> = records
            .values()
            .filter(|r| r.disowned_before(threshold))
            .filter(|r| after.is_none_or(|cursor| cursor.precedes(r)))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.disown_timestamp, r.id()));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn delete(&self, id: &RecordId) -> IndexResult<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn batch_mark_disowned(
        &self,
        ids: &[RecordId],
        disown_timestamp: i64,
    ) -> IndexResult<usize> {
        let mut records = self.records.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                if !record.is_disowned() {
                    *record = record.disowned_at(disown_timestamp);
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }
}
