//! Metadata index of copy records.
//!
//! The index has two access paths:
//!
//! - the primary key `(original_key, copy_timestamp)`, range-queryable per original key
//! - a secondary view over `(disowned, disown_timestamp)` used by the reclaimer
//!
//! Writes to a single record identity are atomic. Nothing spans records: a
//! batch disown applies item by item, and the secondary view may trail the
//! primary path.

use async_trait::async_trait;

use crate::error::IndexResult;
use crate::model::{CopyRecord, RecordId};

pub mod memory;
pub mod sql;

pub use memory::InMemoryIndex;
pub use sql::SqlIndex;

/// Ordering of records returned for one original key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest copy first
    #[default]
    Ascending,
    /// Newest copy first
    Descending,
}

/// Position in the disowned view.
///
/// Orders the same way the view does: by disown timestamp, then record identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DisownedCursor {
    pub disown_timestamp: i64,
    pub id: RecordId,
}

impl DisownedCursor {
    /// Cursor at `record`, or `None` if the record is live.
    pub fn at(record: &CopyRecord) -> Option<Self> {
        record.disown_timestamp.map(|disown_timestamp| Self {
            disown_timestamp,
            id: record.id(),
        })
    }

    /// Whether `record` sits strictly after this cursor in the disowned view.
    pub fn precedes(&self, record: &CopyRecord) -> bool {
        Self::at(record).is_some_and(|position| position > *self)
    }
}

/// Storage contract for copy records.
#[async_trait]
pub trait CopyIndex: std::fmt::Debug + Send + Sync {
    /// Insert or overwrite the record with the same identity.
    async fn put(&self, record: &CopyRecord) -> IndexResult<()>;

    /// All records for `original_key`, ordered by copy timestamp.
    async fn query_by_original(
        &self,
        original_key: &str,
        order: SortOrder,
    ) -> IndexResult<Vec<CopyRecord>>;

    /// Up to `limit` disowned records with `disown_timestamp <= threshold`,
    /// oldest disown first.
    ///
    /// With `after` set, only records strictly past that cursor are returned,
    /// so a caller pages by passing the cursor of the last record it received.
    async fn query_disowned_before(
        &self,
        threshold: i64,
        after: Option<&DisownedCursor>,
        limit: usize,
    ) -> IndexResult<Vec<CopyRecord>>;

    /// Remove one record. Removing an absent record is not an error.
    async fn delete(&self, id: &RecordId) -> IndexResult<()>;

    /// Disown each listed record at `disown_timestamp`, item by item.
    ///
    /// Records that are already disowned keep their timestamp and records that
    /// no longer exist are skipped. Returns how many records changed state.
    /// If any item fails, [`crate::IndexError::PartialDisown`] reports the
    /// failed identities; the others stay applied.
    async fn batch_mark_disowned(
        &self,
        ids: &[RecordId],
        disown_timestamp: i64,
    ) -> IndexResult<usize>;
}
