//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{Configuration, IndexConfig, ObjectStorageConfig};

/// Builder for creating test configurations.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .with_grace_period(Duration::from_secs(10))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// In-memory object stores and an in-memory SQLite index.
    pub fn in_memory(mut self) -> Self {
        self.config.storage.backup = ObjectStorageConfig::new("memory://");
        self.config.storage.default_source = Some(ObjectStorageConfig::new("memory://"));
        self.config.index = IndexConfig::in_memory();
        self
    }

    pub fn with_backup(mut self, dsn: &str) -> Self {
        self.config.storage.backup = ObjectStorageConfig::new(dsn);
        self
    }

    pub fn with_source(mut self, bucket: &str, dsn: &str) -> Self {
        self.config
            .storage
            .sources
            .insert(bucket.to_string(), ObjectStorageConfig::new(dsn));
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.config.cleaner.grace_period = grace_period;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.cleaner.batch_size = batch_size;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
