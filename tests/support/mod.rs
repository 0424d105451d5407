//! Shared harness for workspace integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cleaner::Reclaimer;
use common::config::CleanerConfig;
use common::storage::ObjectStoreBackend;
use common::testing::ManualClock;
use common::{CopyIndex, CopyRecord, SortOrder};
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use replicator::ReplicationCoordinator;

pub const SOURCE_BUCKET: &str = "source-bucket";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rollingbackup=debug,replicator=debug,cleaner=debug,common=debug")
        .with_test_writer()
        .try_init();
}

/// Coordinator and reclaimer over in-memory object stores, a shared index and a manual clock.
pub struct Harness {
    pub source: Arc<InMemory>,
    pub backup: Arc<InMemory>,
    pub index: Arc<dyn CopyIndex>,
    pub clock: Arc<ManualClock>,
    pub coordinator: ReplicationCoordinator,
    pub reclaimer: Reclaimer,
}

impl Harness {
    pub fn new(index: Arc<dyn CopyIndex>) -> Self {
        Self::with_cleaner(
            index,
            CleanerConfig {
                grace_period: Duration::from_secs(10),
                ..CleanerConfig::default()
            },
        )
    }

    pub fn with_cleaner(index: Arc<dyn CopyIndex>, cleaner: CleanerConfig) -> Self {
        init_tracing();

        let source = Arc::new(InMemory::new());
        let backup = Arc::new(InMemory::new());
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(
            ObjectStoreBackend::new(backup.clone()).with_source(SOURCE_BUCKET, source.clone()),
        );

        let coordinator = ReplicationCoordinator::new(index.clone(), storage.clone(), clock.clone());
        let reclaimer = Reclaimer::new(cleaner, index.clone(), storage, clock.clone());

        Self {
            source,
            backup,
            index,
            clock,
            coordinator,
            reclaimer,
        }
    }

    pub async fn upload(&self, key: &str, body: &'static str) {
        self.source
            .put(&ObjectPath::from(key), Bytes::from_static(body.as_bytes()).into())
            .await
            .unwrap();
    }

    pub async fn remove_source(&self, key: &str) {
        self.source.delete(&ObjectPath::from(key)).await.unwrap();
    }

    pub async fn backup_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .backup
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    pub async fn backup_body(&self, key: &str) -> Option<Bytes> {
        match self.backup.get(&ObjectPath::from(key)).await {
            Ok(result) => Some(result.bytes().await.unwrap()),
            Err(object_store::Error::NotFound { .. }) => None,
            Err(e) => panic!("unexpected error reading {key}: {e}"),
        }
    }

    pub async fn records(&self, key: &str) -> Vec<CopyRecord> {
        self.index
            .query_by_original(key, SortOrder::Ascending)
            .await
            .unwrap()
    }

    pub async fn live_records(&self, key: &str) -> Vec<CopyRecord> {
        self.records(key)
            .await
            .into_iter()
            .filter(|r| !r.is_disowned())
            .collect()
    }
}
