//! Copy records and the upstream object events that create and disown them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Derive the backup-store key for a copy of `original_key` taken at `copy_timestamp`.
pub fn copy_key(original_key: &str, copy_timestamp: i64) -> String {
    format!("{original_key}-{copy_timestamp}")
}

/// Identity of a copy record within the index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub original_key: String,
    pub copy_timestamp: i64,
}

impl RecordId {
    pub fn new(original_key: impl Into<String>, copy_timestamp: i64) -> Self {
        Self {
            original_key: original_key.into(),
            copy_timestamp,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.original_key, self.copy_timestamp)
    }
}

/// One backup copy of an original object.
///
/// A record is disowned exactly when `disown_timestamp` is set. Everything
/// except the disown transition is written once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRecord {
    pub original_key: String,
    pub copy_timestamp: i64,
    pub copy_key: String,
    pub disown_timestamp: Option<i64>,
}

impl CopyRecord {
    /// Create a live record, deriving its copy key.
    pub fn new(original_key: impl Into<String>, copy_timestamp: i64) -> Self {
        let original_key = original_key.into();
        let copy_key = copy_key(&original_key, copy_timestamp);
        Self {
            original_key,
            copy_timestamp,
            copy_key,
            disown_timestamp: None,
        }
    }

    pub fn id(&self) -> RecordId {
        RecordId::new(self.original_key.clone(), self.copy_timestamp)
    }

    pub fn is_disowned(&self) -> bool {
        self.disown_timestamp.is_some()
    }

    /// Return this record disowned at `timestamp`.
    ///
    /// An already disowned record is returned unchanged so the first disown
    /// timestamp is never overwritten.
    pub fn disowned_at(&self, timestamp: i64) -> Self {
        let mut record = self.clone();
        if record.disown_timestamp.is_none() {
            record.disown_timestamp = Some(timestamp);
        }
        record
    }

    /// Whether the record is disowned and its disown timestamp is at or before `threshold`.
    pub fn disowned_before(&self, threshold: i64) -> bool {
        matches!(self.disown_timestamp, Some(ts) if ts <= threshold)
    }
}

/// Kind of change reported by the source store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Removed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// A single object notification from the source store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEvent {
    pub kind: EventKind,
    pub original_key: String,
    pub source_bucket_name: String,
}

impl ObjectEvent {
    pub fn created(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Created,
            original_key: key.into(),
            source_bucket_name: bucket.into(),
        }
    }

    pub fn removed(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Removed,
            original_key: key.into(),
            source_bucket_name: bucket.into(),
        }
    }
}
