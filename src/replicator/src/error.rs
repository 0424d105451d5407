use common::{IndexError, RecordId, StoreError};

/// Failures surfaced to the caller so the notification can be redelivered.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("index operation failed for {key}: {source}")]
    IndexWriteFailure {
        key: String,
        #[source]
        source: IndexError,
    },

    #[error("object store operation failed for {key}: {source}")]
    StoreOperationFailure {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("disowned {updated} copies of {key} but {} failed", .failed.len())]
    PartialBatchDisownFailure {
        key: String,
        updated: usize,
        failed: Vec<(RecordId, String)>,
    },
}

impl ReplicationError {
    pub(crate) fn index(key: &str, source: IndexError) -> Self {
        match source {
            IndexError::PartialDisown { updated, failed } => Self::PartialBatchDisownFailure {
                key: key.to_string(),
                updated,
                failed,
            },
            source => Self::IndexWriteFailure {
                key: key.to_string(),
                source,
            },
        }
    }

    pub(crate) fn store(key: &str, source: StoreError) -> Self {
        Self::StoreOperationFailure {
            key: key.to_string(),
            source,
        }
    }

    /// Original key of the event that failed.
    pub fn key(&self) -> &str {
        match self {
            Self::IndexWriteFailure { key, .. }
            | Self::StoreOperationFailure { key, .. }
            | Self::PartialBatchDisownFailure { key, .. } => key,
        }
    }
}
