use crate::model::RecordId;

/// Errors raised by the backup and source object stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("source object {bucket}/{key} does not exist")]
    SourceMissing { bucket: String, key: String },

    #[error("no object store configured for source bucket: {0}")]
    UnknownBucket(String),

    #[error("object store operation on {key} failed: {source}")]
    Operation {
        key: String,
        #[source]
        source: object_store::Error,
    },
}

/// Errors raised by the metadata index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid index row: {0}")]
    InvalidRow(String),

    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("failed to disown {} copy records ({updated} updated)", .failed.len())]
    PartialDisown {
        updated: usize,
        failed: Vec<(RecordId, String)>,
    },
}

pub type IndexResult<T> = Result<T, IndexError>;
pub type StoreResult<T> = Result<T, StoreError>;
