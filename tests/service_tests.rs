//! Components wired from configuration against filesystem stores and a SQLite file.

mod support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cleaner::Reclaimer;
use common::config::{Configuration, IndexConfig};
use common::index::SqlIndex;
use common::storage::ObjectStoreBackend;
use common::testing::{ManualClock, TestConfigBuilder};
use common::{CopyIndex, CopyRecord, SortOrder};
use replicator::ReplicationCoordinator;
use replicator::feed::{FeedSummary, process_lines};

fn file_config(root: &Path) -> Configuration {
    let mut config = TestConfigBuilder::new()
        .with_backup(&format!("file://{}", root.join("backup").display()))
        .with_source("photos", &format!("file://{}", root.join("photos").display()))
        .with_grace_period(Duration::from_secs(10))
        .build();
    config.storage.default_source = None;
    config.index = IndexConfig {
        dsn: format!("sqlite://{}", root.join("index").join("copies.db").display()),
        ..IndexConfig::default()
    };
    config
}

fn notification(event_name: &str, key: &str) -> String {
    format!(
        r#"{{"Records":[{{"eventName":"{event_name}","s3":{{"bucket":{{"name":"photos"}},"object":{{"key":"{key}"}}}}}}]}}"#
    )
}

#[tokio::test]
async fn test_feed_and_reclaim_against_filesystem() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    config.validate().unwrap();

    std::fs::create_dir_all(dir.path().join("photos/2024")).unwrap();
    std::fs::write(dir.path().join("photos/2024/beach-day.jpg"), b"jpeg").unwrap();

    let clock = Arc::new(ManualClock::new(1_000));
    let index: Arc<dyn CopyIndex> = Arc::new(SqlIndex::connect(&config.index).await.unwrap());
    let storage = Arc::new(ObjectStoreBackend::from_config(&config.storage).unwrap());
    let coordinator = ReplicationCoordinator::new(index.clone(), storage.clone(), clock.clone());

    let input = [
        notification("ObjectCreated:Put", "2024/beach%2Dday.jpg"),
        notification("ObjectCreated:Put", "2024/missing.jpg"),
        notification("ObjectRemoved:Delete", "2024/beach%2Dday.jpg"),
    ]
    .join("\n");
    let summary = process_lines(input.as_bytes(), &coordinator, config.replicator.invocation_timeout)
        .await
        .unwrap();
    assert_eq!(summary, FeedSummary { succeeded: 3, failed: 0 });

    let backup_copy = dir.path().join("backup/2024/beach-day.jpg-1000");
    assert_eq!(std::fs::read(&backup_copy).unwrap(), b"jpeg");

    let records = index
        .query_by_original("2024/beach-day.jpg", SortOrder::Ascending)
        .await
        .unwrap();
    assert_eq!(
        records,
        vec![CopyRecord::new("2024/beach-day.jpg", 1_000).disowned_at(1_000)]
    );
    assert!(
        index
            .query_by_original("2024/missing.jpg", SortOrder::Ascending)
            .await
            .unwrap()
            .is_empty()
    );

    clock.set(11_000);
    let reclaimer = Reclaimer::new(config.cleaner.clone(), index.clone(), storage, clock.clone());
    let result = reclaimer.run().await.unwrap();
    assert_eq!(result.reclaimed_count, 1);
    assert!(!backup_copy.exists());
    assert!(
        index
            .query_by_original("2024/beach-day.jpg", SortOrder::Ascending)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_index_survives_reconnect() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    {
        let index = SqlIndex::connect(&config.index).await.unwrap();
        index.put(&CopyRecord::new("a.txt", 5)).await.unwrap();
        index
            .batch_mark_disowned(&[CopyRecord::new("a.txt", 5).id()], 9)
            .await
            .unwrap();
    }

    let index = SqlIndex::connect(&config.index).await.unwrap();
    assert_eq!(
        index.query_disowned_before(9, None, 10).await.unwrap(),
        vec![CopyRecord::new("a.txt", 5).disowned_at(9)]
    );
}

#[tokio::test]
async fn test_unknown_bucket_fails_the_batch() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    let index: Arc<dyn CopyIndex> = Arc::new(SqlIndex::connect(&config.index).await.unwrap());
    let storage = Arc::new(ObjectStoreBackend::from_config(&config.storage).unwrap());
    let coordinator =
        ReplicationCoordinator::new(index, storage, Arc::new(ManualClock::new(0)));

    let line = r#"{"Records":[{"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"elsewhere"},"object":{"key":"x"}}}]}"#;
    let summary = process_lines(line.as_bytes(), &coordinator, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(summary, FeedSummary { succeeded: 0, failed: 1 });
    assert_eq!(coordinator.metrics().summary().failures, 1);
}
