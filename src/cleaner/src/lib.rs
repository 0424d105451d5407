//! Reclaimer for disowned backup copies.
//!
//! A disowned copy is kept for the configured grace period after its source
//! object was removed, then its backup object and index record are deleted.

pub mod metrics;
pub mod reclaimer;
pub mod schedule;

pub use metrics::{ReclaimMetrics, ReclaimSummary};
pub use reclaimer::{ReclaimResult, Reclaimer};
pub use schedule::run_schedule;
