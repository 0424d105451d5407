//! Decoding of S3-style event notifications into [`ObjectEvent`]s.
//!
//! ```json
//! {"Records": [{"eventName": "ObjectCreated:Put",
//!               "s3": {"bucket": {"name": "src"}, "object": {"key": "a+b.txt"}}}]}
//! ```
//!
//! Object keys arrive form-encoded (`+` for space, `%XX` escapes).

use common::{EventKind, ObjectEvent};
use percent_encoding::percent_decode_str;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("object key is not valid UTF-8 after decoding: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Deserialize)]
struct EventNotification {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Map an upstream event name onto the kinds the coordinator handles.
pub fn event_kind(event_name: &str) -> Option<EventKind> {
    if event_name.starts_with("ObjectCreated:") {
        Some(EventKind::Created)
    } else if event_name.starts_with("ObjectRemoved:") {
        Some(EventKind::Removed)
    } else {
        None
    }
}

/// Decode a form-encoded object key.
pub fn decode_key(raw: &str) -> Result<String, NotificationError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| NotificationError::InvalidKey(raw.to_string()))
}

/// Parse one notification batch, preserving record order.
pub fn parse_notification(payload: &[u8]) -> Result<Vec<ObjectEvent>, NotificationError> {
    let notification: EventNotification = serde_json::from_slice(payload)?;
    let mut events = Vec::with_capacity(notification.records.len());

    for record in notification.records {
        let Some(kind) = event_kind(&record.event_name) else {
            tracing::debug!(
                event_name = %record.event_name,
                key = %record.s3.object.key,
                "Ignoring unsupported event"
            );
            continue;
        };

        events.push(ObjectEvent {
            kind,
            original_key: decode_key(&record.s3.object.key)?,
            source_bucket_name: record.s3.bucket.name,
        });
    }

    Ok(events)
}
