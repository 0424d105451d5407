//! Replication coordinator.
//!
//! Reacts to object notifications from the source store: a created object is
//! copied into the backup store and replaces the previous copy; a removed
//! object has its copies disowned so the reclaimer can collect them after the
//! grace period.

pub mod coordinator;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod notification;

pub use coordinator::{BatchSummary, DeleteOutcome, PutOutcome, ReplicationCoordinator};
pub use error::ReplicationError;
pub use metrics::{MetricsSummary, ReplicationMetrics};
pub use notification::{NotificationError, parse_notification};
