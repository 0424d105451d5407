//! Test utilities for rollingbackup.
//!
//! Fixtures for driving the coordinator and reclaimer deterministically:
//! a settable clock, an index wrapper that injects failures, and a
//! configuration builder.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```

mod clock;
mod config_builder;
mod faulty_index;

pub use crate::storage::MockObjectStorage;
pub use clock::ManualClock;
pub use config_builder::TestConfigBuilder;
pub use faulty_index::FaultyIndex;
