use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Name of the configuration file picked up from the working directory.
pub const CONFIG_FILE: &str = "rollingbackup.toml";

/// Prefix for environment overrides, e.g. `ROLLINGBACKUP__CLEANER__GRACE_PERIOD=30s`.
pub const ENV_PREFIX: &str = "ROLLINGBACKUP__";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectStorageConfig {
    pub dsn: String,
}

impl ObjectStorageConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store that receives the backup copies
    pub backup: ObjectStorageConfig,
    /// Source store used for buckets without an entry in `sources`
    #[serde(default)]
    pub default_source: Option<ObjectStorageConfig>,
    /// Source stores keyed by the bucket name carried in notifications
    #[serde(default)]
    pub sources: HashMap<String, ObjectStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup: ObjectStorageConfig::new("file:///.data/backup"),
            default_source: Some(ObjectStorageConfig::new("file:///.data/source")),
            sources: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// PostgreSQL or SQLite DSN of the metadata index
    pub dsn: String,
    /// Table holding one row per copy record
    pub table: String,
    /// Secondary index over (disowned, disown_timestamp)
    pub disowned_index: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/rollingbackup.db"),
            table: String::from("copy_records"),
            disowned_index: String::from("disowned_index"),
        }
    }
}

impl IndexConfig {
    /// Index configuration backed by an in-memory SQLite database
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Wall-clock budget for processing one notification batch
    #[serde(with = "humantime_serde")]
    pub invocation_timeout: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: Duration::from_secs(30),
        }
    }
}

/// Reclaimer settings.
///
/// Env: ROLLINGBACKUP__CLEANER__<FIELD>
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Run the periodic reclaimer at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum time a copy stays disowned before it is reclaimed
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,

    /// Period between reclaimer passes
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Records fetched from the disowned view per page
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on pages processed by a single pass
    #[serde(default = "default_max_batches_per_run")]
    pub max_batches_per_run: usize,

    /// Wall-clock budget for one pass
    #[serde(with = "humantime_serde", default = "default_invocation_timeout")]
    pub invocation_timeout: Duration,

    /// Re-read each candidate through the primary key before deleting it.
    /// The disowned view may lag behind writes to the primary path.
    #[serde(default = "default_revalidate_before_delete")]
    pub revalidate_before_delete: bool,

    /// Log what would be reclaimed without deleting anything
    #[serde(default)]
    pub dry_run: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_batches_per_run() -> usize {
    10
}

fn default_invocation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_revalidate_before_delete() -> bool {
    true
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            grace_period: default_grace_period(),
            interval: default_interval(),
            batch_size: default_batch_size(),
            max_batches_per_run: default_max_batches_per_run(),
            invocation_timeout: default_invocation_timeout(),
            revalidate_before_delete: default_revalidate_before_delete(),
            dry_run: false,
        }
    }
}

impl CleanerConfig {
    /// Grace period in whole milliseconds, as compared against disown timestamps.
    pub fn grace_period_ms(&self) -> i64 {
        i64::try_from(self.grace_period.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            anyhow::bail!("cleaner.interval must be positive");
        }

        if self.invocation_timeout.is_zero() {
            anyhow::bail!("cleaner.invocation_timeout must be positive");
        }

        if self.batch_size == 0 {
            anyhow::bail!("cleaner.batch_size must be positive, got {}", self.batch_size);
        }

        if self.max_batches_per_run == 0 {
            anyhow::bail!(
                "cleaner.max_batches_per_run must be positive, got {}",
                self.max_batches_per_run
            );
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Source and backup object stores
    pub storage: StorageConfig,
    /// Metadata index of copy records
    pub index: IndexConfig,
    /// Replication coordinator settings
    pub replicator: ReplicatorConfig,
    /// Reclaimer settings
    pub cleaner: CleanerConfig,
}

impl Configuration {
    /// Load defaults, then `rollingbackup.toml`, then environment overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Same as [`Configuration::load`] with an explicit configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.backup.dsn.is_empty() {
            anyhow::bail!("storage.backup.dsn must not be empty");
        }

        if self.index.dsn.is_empty() {
            anyhow::bail!("index.dsn must not be empty");
        }

        validate_identifier("index.table", &self.index.table)?;
        validate_identifier("index.disowned_index", &self.index.disowned_index)?;

        if self.replicator.invocation_timeout.is_zero() {
            anyhow::bail!("replicator.invocation_timeout must be positive");
        }

        self.cleaner.validate()
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, the identifiers that are safe to splice into SQL.
pub fn validate_identifier(field: &str, value: &str) -> anyhow::Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid {
        anyhow::bail!("{field} is not a valid SQL identifier: {value:?}");
    }
    Ok(())
}
