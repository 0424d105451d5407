use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::{
    ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory,
    path::Path as ObjectPath,
};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::config::{ObjectStorageConfig, StorageConfig};
use crate::error::{StoreError, StoreResult};

/// Object store operations the coordinator and reclaimer depend on.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Copy `source_key` from the named source bucket into the backup store under `copy_key`.
    ///
    /// Returns [`StoreError::SourceMissing`] when the source object is gone.
    async fn copy_to_backup(
        &self,
        source_bucket: &str,
        source_key: &str,
        copy_key: &str,
    ) -> StoreResult<()>;

    /// Delete a backup copy. Deleting an object that does not exist succeeds.
    async fn delete_backup(&self, copy_key: &str) -> StoreResult<()>;
}

/// [`ObjectStorage`] over `object_store` backends.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    backup: Arc<dyn ObjectStore>,
    default_source: Option<Arc<dyn ObjectStore>>,
    sources: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreBackend {
    pub fn new(backup: Arc<dyn ObjectStore>) -> Self {
        Self {
            backup,
            default_source: None,
            sources: HashMap::new(),
        }
    }

    pub fn with_source(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.sources.insert(bucket.into(), store);
        self
    }

    pub fn with_default_source(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.default_source = Some(store);
        self
    }

    /// Build every configured store.
    ///
    /// Entries with the same persistent DSN share one store, so a source that
    /// lives in the backup bucket is copied server-side.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let mut opened = HashMap::new();
        let backup =
            open_shared(&mut opened, &config.backup).context("Failed to open backup store")?;
        let mut backend = Self::new(backup);

        if let Some(default_source) = &config.default_source {
            let store = open_shared(&mut opened, default_source)
                .context("Failed to open default source store")?;
            backend = backend.with_default_source(store);
        }

        for (bucket, source) in &config.sources {
            let store = open_shared(&mut opened, source)
                .with_context(|| format!("Failed to open source store for bucket {bucket}"))?;
            backend = backend.with_source(bucket.clone(), store);
        }

        Ok(backend)
    }

    fn source(&self, bucket: &str) -> StoreResult<&Arc<dyn ObjectStore>> {
        self.sources
            .get(bucket)
            .or(self.default_source.as_ref())
            .ok_or_else(|| StoreError::UnknownBucket(bucket.to_string()))
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn copy_to_backup(
        &self,
        source_bucket: &str,
        source_key: &str,
        copy_key: &str,
    ) -> StoreResult<()> {
        let source = self.source(source_bucket)?;
        let missing = || StoreError::SourceMissing {
            bucket: source_bucket.to_string(),
            key: source_key.to_string(),
        };
        let operation = |key: &str, source: object_store::Error| StoreError::Operation {
            key: key.to_string(),
            source,
        };

        if Arc::ptr_eq(source, &self.backup) {
            tracing::debug!(source_bucket, source_key, copy_key, "Copying within backup store");
            return match self
                .backup
                .copy(&ObjectPath::from(source_key), &ObjectPath::from(copy_key))
                .await
            {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => Err(missing()),
                Err(e) => Err(operation(source_key, e)),
            };
        }

        let payload = match source.get(&ObjectPath::from(source_key)).await {
            Ok(result) => result.bytes().await,
            Err(e) => Err(e),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(object_store::Error::NotFound { .. }) => return Err(missing()),
            Err(e) => return Err(operation(source_key, e)),
        };

        tracing::debug!(
            source_bucket,
            source_key,
            copy_key,
            size_bytes = payload.len(),
            "Writing backup copy"
        );

        self.backup
            .put(&ObjectPath::from(copy_key), payload.into())
            .await
            .map_err(|e| operation(copy_key, e))?;
        Ok(())
    }

    async fn delete_backup(&self, copy_key: &str) -> StoreResult<()> {
        match self.backup.delete(&ObjectPath::from(copy_key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(copy_key, "Backup copy already absent");
                Ok(())
            }
            Err(e) => Err(StoreError::Operation {
                key: copy_key.to_string(),
                source: e,
            }),
        }
    }
}

/// Open `config`, reusing a store already opened for the same DSN.
///
/// In-memory DSNs always get a fresh store.
fn open_shared(
    opened: &mut HashMap<String, Arc<dyn ObjectStore>>,
    config: &ObjectStorageConfig,
) -> Result<Arc<dyn ObjectStore>> {
    if config.dsn.starts_with("memory:") {
        return create_object_store(config);
    }
    if let Some(store) = opened.get(&config.dsn) {
        return Ok(store.clone());
    }
    let store = create_object_store(config)?;
    opened.insert(config.dsn.clone(), store.clone());
    Ok(store)
}

/// Create an object store from storage configuration
pub fn create_object_store(config: &ObjectStorageConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&config.dsn)
}

/// Extract the filesystem path from a storage DSN
/// Returns the path component without the URL scheme for file:// URLs,
/// or the original DSN for other schemes
///
/// # Examples
/// ```
/// use common::storage::storage_dsn_to_path;
///
/// assert_eq!(storage_dsn_to_path("file:///.data/backup").unwrap(), ".data/backup");
/// assert_eq!(storage_dsn_to_path("file:///tmp/data").unwrap(), "/tmp/data");
/// assert_eq!(storage_dsn_to_path("memory://").unwrap(), "memory://");
/// ```
pub fn storage_dsn_to_path(dsn: &str) -> Result<String> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            // /.data/backup -> .data/backup, /tmp/data stays absolute
            let path = if path.starts_with("/.") {
                &path[1..]
            } else {
                path
            };
            Ok(path.to_string())
        }
        "memory" => Ok("memory://".to_string()),
        "s3" => Ok(dsn.to_string()),
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = storage_dsn_to_path(dsn)?;
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create storage directory {path}"))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(&path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Anything that is not AWS proper is treated as an S3-compatible endpoint
    let endpoint = if host.contains("amazonaws.com") {
        None
    } else {
        let scheme = if port == Some(443) { "https" } else { "http" };
        Some(match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        })
    };

    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok(builder)
}
