//! # SQLite Backend
//!
//! Durable backend on a single SQLite file. All collections share one
//! `records` table keyed by `(collection, id)`; documents are stored as JSON
//! text next to extracted secondary-index columns. Binary payloads live in
//! `blobs`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use companion_offline::local_db::{LocalStore, SqliteBackend};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> companion_offline::Result<()> {
//! let backend = SqliteBackend::new("/tmp/companion/offline.db");
//! let store = LocalStore::new(Arc::new(backend), Duration::from_secs(5), Duration::from_secs(10));
//! store.open().await?;
//! # Ok(())
//! # }
//! ```

use crate::local_db::backend::StoreBackend;
use crate::local_db::record::Record;
use crate::local_db::schema::{self, IndexField};
use crate::shared::error::{OfflineError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::OnceCell;

/// Where the database lives
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-backed document store
#[derive(Debug)]
pub struct SqliteBackend {
    location: Location,
    pool: OnceCell<SqlitePool>,
}

impl SqliteBackend {
    /// Backend on a database file, created on first open
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            pool: OnceCell::new(),
        }
    }

    /// Private in-memory database, gone when the backend is dropped
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            pool: OnceCell::new(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get()
            .ok_or_else(|| OfflineError::storage("SQLite backend used before init"))
    }

    async fn connect(&self) -> Result<SqlitePool> {
        let options = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        OfflineError::unavailable(format!("cannot create {}: {}", parent.display(), e))
                    })?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
            }
            Location::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| OfflineError::unavailable(e.to_string()))?,
        };

        // An in-memory database exists per connection, so keep exactly one.
        let max_connections = match self.location {
            Location::File(_) => 4,
            Location::Memory => 1,
        };

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if matches!(self.location, Location::Memory) {
            // Recycling the only connection would drop the database.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        pool_options
            .connect_with(options)
            .await
            .map_err(|e| OfflineError::unavailable(e.to_string()))
    }

    /// Run pending migrations
    ///
    /// Checks the current schema version and applies every later migration
    /// inside its own transaction.
    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        let current_version: (i32,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(pool)
            .await?;

        if !schema::needs_migration(current_version.0) {
            return Ok(());
        }

        for (version, statements) in schema::MIGRATIONS.iter().filter(|(v, _)| *v > current_version.0) {
            let mut tx = pool.begin().await?;
            for statement in statements.iter().copied() {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(*version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied local store migration");
        }

        Ok(())
    }

    fn decode(row: &SqliteRow) -> Result<Record> {
        let data: String = row.try_get("data")?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    async fn init(&self) -> Result<()> {
        self.pool
            .get_or_try_init(|| async {
                let pool = self.connect().await?;
                Self::run_migrations(&pool)
                    .await
                    .map_err(|e| OfflineError::unavailable(format!("migration failed: {}", e)))?;
                Ok::<_, OfflineError>(pool)
            })
            .await?;
        Ok(())
    }

    async fn put(&self, collection: &str, id: &str, record: &Record) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO records (collection, id, data, updated_at, created_at, category, sync_status)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (collection, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                created_at = excluded.created_at,
                category = excluded.category,
                sync_status = excluded.sync_status",
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(IndexField::CreatedAt.extract(record))
        .bind(IndexField::Category.extract(record))
        .bind(IndexField::SyncStatus.extract(record))
        .execute(self.pool()?)
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let row = sqlx::query("SELECT data FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(self.pool()?)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::decode(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query("SELECT data FROM records WHERE collection = ? ORDER BY rowid ASC")
            .bind(collection)
            .fetch_all(self.pool()?)
            .await?;

        rows.iter()
            .map(Self::decode)
            .collect()
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(self.pool()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let pool = self.pool()?;
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM blobs WHERE collection = ?")
            .bind(collection)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT collection FROM records ORDER BY collection")
            .fetch_all(self.pool()?)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn find_by_index(&self, collection: &str, index: IndexField, value: &str) -> Result<Vec<Record>> {
        // Column names come from a closed enum, never from input.
        let query = format!(
            "SELECT data FROM records WHERE collection = ? AND {} = ? ORDER BY rowid ASC",
            index.column()
        );
        let rows = sqlx::query(&query)
            .bind(collection)
            .bind(value)
            .fetch_all(self.pool()?)
            .await?;

        rows.iter()
            .map(Self::decode)
            .collect()
    }

    async fn put_blob(&self, collection: &str, id: &str, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO blobs (collection, id, bytes) VALUES (?, ?, ?)
             ON CONFLICT (collection, id) DO UPDATE SET bytes = excluded.bytes",
        )
        .bind(collection)
        .bind(id)
        .bind(bytes)
        .execute(self.pool()?)
        .await?;
        Ok(())
    }

    async fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT bytes FROM blobs WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(self.pool()?)
            .await?;
        Ok(row.map(|(bytes,)| bytes))
    }

    async fn delete_blob(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blobs WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(self.pool()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn blob_bytes(&self, collection: &str) -> Result<u64> {
        let total: (i64,) = sqlx::query_as("SELECT COALESCE(SUM(LENGTH(bytes)), 0) FROM blobs WHERE collection = ?")
            .bind(collection)
            .fetch_one(self.pool()?)
            .await?;
        Ok(total.0.max(0) as u64)
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}
