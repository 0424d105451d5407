use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool, query, query_as};
use std::path::Path;
use std::str::FromStr;

use super::{CopyIndex, DisownedCursor, SortOrder};
use crate::config::{IndexConfig, validate_identifier};
use crate::error::{IndexError, IndexResult};
use crate::model::{CopyRecord, RecordId};

type RecordRow = (String, i64, String, bool, Option<i64>);

const RECORD_COLUMNS: &str = "original_key, copy_timestamp, copy_key, disowned, disown_timestamp";

#[derive(Debug, Clone)]
enum Pool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Copy index stored in PostgreSQL or SQLite.
///
/// The table is keyed on `(original_key, copy_timestamp)`; a secondary index on
/// `(disowned, disown_timestamp)` backs the reclaimer's disowned view.
#[derive(Debug, Clone)]
pub struct SqlIndex {
    pool: Pool,
    table: String,
    disowned_index: String,
}

impl SqlIndex {
    /// Connect to the configured database and create the schema if needed.
    pub async fn connect(config: &IndexConfig) -> IndexResult<Self> {
        validate_identifier("index.table", &config.table)
            .and_then(|_| validate_identifier("index.disowned_index", &config.disowned_index))
            .map_err(|e| IndexError::InvalidConfig(e.to_string()))?;

        let dsn = config.dsn.as_str();
        tracing::info!(dsn, table = %config.table, "Connecting to copy index");

        let pool = if dsn.starts_with("sqlite:") {
            Pool::Sqlite(connect_sqlite(dsn).await?)
        } else {
            let pool = PgPoolOptions::new().connect(dsn).await.map_err(|e| {
                tracing::error!(dsn, error = %e, "Failed to connect to PostgreSQL copy index");
                e
            })?;
            Pool::Postgres(pool)
        };

        let index = Self {
            pool,
            table: config.table.clone(),
            disowned_index: config.disowned_index.clone(),
        };
        index.init().await?;
        tracing::info!(table = %index.table, "Copy index schema ready");
        Ok(index)
    }

    async fn init(&self) -> IndexResult<()> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                original_key TEXT NOT NULL,
                copy_timestamp BIGINT NOT NULL,
                copy_key TEXT NOT NULL,
                disowned BOOLEAN NOT NULL DEFAULT FALSE,
                disown_timestamp BIGINT,
                PRIMARY KEY (original_key, copy_timestamp)
            )"#,
            self.table
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (disowned, disown_timestamp)",
            self.disowned_index, self.table
        );

        match &self.pool {
            Pool::Sqlite(pool) => {
                query(&create_table).execute(pool).await?;
                query(&create_index).execute(pool).await?;
            }
            Pool::Postgres(pool) => {
                query(&create_table).execute(pool).await?;
                query(&create_index).execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn mark_one_disowned(&self, id: &RecordId, disown_timestamp: i64) -> IndexResult<u64> {
        let sql = format!(
            "UPDATE {} SET disowned = ?, disown_timestamp = ? \
             WHERE original_key = ? AND copy_timestamp = ? AND disowned = ?",
            self.table
        );
        let result = match &self.pool {
            Pool::Sqlite(pool) => query(&sql)
                .bind(true)
                .bind(disown_timestamp)
                .bind(&id.original_key)
                .bind(id.copy_timestamp)
                .bind(false)
                .execute(pool)
                .await?
                .rows_affected(),
            Pool::Postgres(pool) => query(&numbered(&sql))
                .bind(true)
                .bind(disown_timestamp)
                .bind(&id.original_key)
                .bind(id.copy_timestamp)
                .bind(false)
                .execute(pool)
                .await?
                .rows_affected(),
        };
        Ok(result)
    }
}

#[async_trait]
impl CopyIndex for SqlIndex {
    async fn put(&self, record: &CopyRecord) -> IndexResult<()> {
        let sql = format!(
            "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (original_key, copy_timestamp) DO UPDATE SET \
             copy_key = excluded.copy_key, \
             disowned = excluded.disowned, \
             disown_timestamp = excluded.disown_timestamp",
            self.table
        );
        match &self.pool {
            Pool::Sqlite(pool) => {
                query(&sql)
                    .bind(&record.original_key)
                    .bind(record.copy_timestamp)
                    .bind(&record.copy_key)
                    .bind(record.is_disowned())
                    .bind(record.disown_timestamp)
                    .execute(pool)
                    .await?;
            }
            Pool::Postgres(pool) => {
                query(&numbered(&sql))
                    .bind(&record.original_key)
                    .bind(record.copy_timestamp)
                    .bind(&record.copy_key)
                    .bind(record.is_disowned())
                    .bind(record.disown_timestamp)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn query_by_original(
        &self,
        original_key: &str,
        order: SortOrder,
    ) -> IndexResult<Vec<CopyRecord>> {
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE original_key = ? ORDER BY copy_timestamp {direction}",
            self.table
        );
        let rows: Vec<RecordRow> = match &self.pool {
            Pool::Sqlite(pool) => query_as(&sql).bind(original_key).fetch_all(pool).await?,
            Pool::Postgres(pool) => {
                query_as(&numbered(&sql))
                    .bind(original_key)
                    .fetch_all(pool)
                    .await?
            }
        };
        rows.into_iter().map(record_from_row).collect()
    }

    async fn query_disowned_before(
        &self,
        threshold: i64,
        after: Option<&DisownedCursor>,
        limit: usize,
    ) -> IndexResult<Vec<CopyRecord>> {
        let keyset = if after.is_some() {
            "AND (disown_timestamp, original_key, copy_timestamp) > (?, ?, ?) "
        } else {
            ""
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} \
             WHERE disowned = ? AND disown_timestamp <= ? {keyset}\
             ORDER BY disown_timestamp ASC, original_key ASC, copy_timestamp ASC \
             LIMIT ?",
            self.table
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<RecordRow> = match &self.pool {
            Pool::Sqlite(pool) => {
                let mut q = query_as::<_, RecordRow>(&sql).bind(true).bind(threshold);
                if let Some(cursor) = after {
                    q = q
                        .bind(cursor.disown_timestamp)
                        .bind(&cursor.id.original_key)
                        .bind(cursor.id.copy_timestamp);
                }
                q.bind(limit).fetch_all(pool).await?
            }
            Pool::Postgres(pool) => {
                let sql = numbered(&sql);
                let mut q = query_as::<_, RecordRow>(&sql).bind(true).bind(threshold);
                if let Some(cursor) = after {
                    q = q
                        .bind(cursor.disown_timestamp)
                        .bind(&cursor.id.original_key)
                        .bind(cursor.id.copy_timestamp);
                }
                q.bind(limit).fetch_all(pool).await?
            }
        };
        rows.into_iter().map(record_from_row).collect()
    }

    async fn delete(&self, id: &RecordId) -> IndexResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE original_key = ? AND copy_timestamp = ?",
            self.table
        );
        match &self.pool {
            Pool::Sqlite(pool) => {
                query(&sql)
                    .bind(&id.original_key)
                    .bind(id.copy_timestamp)
                    .execute(pool)
                    .await?;
            }
            Pool::Postgres(pool) => {
                query(&numbered(&sql))
                    .bind(&id.original_key)
                    .bind(id.copy_timestamp)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn batch_mark_disowned(
        &self,
        ids: &[RecordId],
        disown_timestamp: i64,
    ) -> IndexResult<usize> {
        let mut updated = 0;
        let mut failed = Vec::new();

        for id in ids {
            match self.mark_one_disowned(id, disown_timestamp).await {
                Ok(rows) => updated += rows as usize,
                Err(e) => {
                    tracing::warn!(record = %id, error = %e, "Failed to disown copy record");
                    failed.push((id.clone(), e.to_string()));
                }
            }
        }

        if failed.is_empty() {
            Ok(updated)
        } else {
            Err(IndexError::PartialDisown { updated, failed })
        }
    }
}

async fn connect_sqlite(dsn: &str) -> IndexResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

    let pool = if is_in_memory(dsn) {
        // Every connection to an unnamed in-memory database sees its own copy,
        // so pin the pool to one connection that never expires.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    } else {
        if let Some(parent) = sqlite_file_path(dsn).and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IndexError::Unavailable(format!(
                        "cannot create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        SqlitePoolOptions::new().connect_with(options).await
    };

    pool.map_err(|e| {
        tracing::error!(dsn, error = %e, "Failed to connect to SQLite copy index");
        IndexError::Database(e)
    })
}

fn is_in_memory(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

fn sqlite_file_path(dsn: &str) -> Option<&Path> {
    let path = dsn
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()?;
    (!path.is_empty()).then(|| Path::new(path))
}

/// Rewrite `?` placeholders as PostgreSQL's `$1, $2, ...`.
fn numbered(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for c in sql.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

fn record_from_row(row: RecordRow) -> IndexResult<CopyRecord> {
    let (original_key, copy_timestamp, copy_key, disowned, disown_timestamp) = row;
    if disowned != disown_timestamp.is_some() {
        return Err(IndexError::InvalidRow(format!(
            "{original_key}@{copy_timestamp}: disowned={disowned} but disown_timestamp={disown_timestamp:?}"
        )));
    }
    Ok(CopyRecord {
        original_key,
        copy_timestamp,
        copy_key,
        disown_timestamp,
    })
}
