//! # Local Store
//!
//! Durable, collection-keyed document storage for offline-first operation.
//! Every other part of the offline layer (operation queue, sync metadata,
//! response cache, media library) keeps its state here.
//!
//! ## Guarantees
//!
//! - **Bounded latency**: every operation fails with
//!   [`OfflineError::StorageTimeout`] instead of hanging past its bound.
//! - **Shared initialization**: [`LocalStore::open`] is idempotent and safe to
//!   race; concurrent callers share one initialization.
//! - **Serialized writes**: mutating calls on the same collection are applied
//!   one at a time.
//! - **Distinct fatal failure**: a store that cannot be opened reports
//!   [`OfflineError::StorageUnavailable`], never a per-operation error.
//!
//! ## Key Components
//!
//! - `backend.rs`: the [`StoreBackend`] seam
//! - `sqlite.rs`: durable SQLite backend
//! - `memory.rs`: in-memory backend
//! - `schema.rs`: collection names, indexes and migrations
//! - `record.rs`: record helpers (ids, bookkeeping fields, sorting)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use companion_offline::local_db::{LocalStore, schema};
//! use serde_json::json;
//!
//! # async fn example() -> companion_offline::Result<()> {
//! let store = LocalStore::in_memory();
//! store.open().await?;
//!
//! let record = json!({"title": "Beach trip"}).as_object().cloned().unwrap();
//! let id = store.put(schema::MEMORIES, record).await?;
//! let loaded = store.get(schema::MEMORIES, &id).await?;
//! assert!(loaded.is_some());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod memory;
pub mod record;
pub mod schema;
pub mod sqlite;

pub use backend::StoreBackend;
pub use memory::MemoryBackend;
pub use record::{Record, SortSpec};
pub use schema::IndexField;
pub use sqlite::SqliteBackend;

use crate::shared::config::OfflineConfig;
use crate::shared::error::{OfflineError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

/// Collection-keyed document store with bounded operations
#[derive(Debug)]
pub struct LocalStore {
    backend: Arc<dyn StoreBackend>,
    op_timeout: Duration,
    init_timeout: Duration,
    opened: OnceCell<()>,
    write_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStore {
    /// Wrap a backend with the given operation and initialization bounds
    pub fn new(backend: Arc<dyn StoreBackend>, op_timeout: Duration, init_timeout: Duration) -> Self {
        Self {
            backend,
            op_timeout,
            init_timeout,
            opened: OnceCell::new(),
            write_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// SQLite store at the configured path with the configured bounds
    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(
            Arc::new(SqliteBackend::new(&config.database_path)),
            config.store_timeout,
            config.init_timeout,
        )
    }

    /// Non-durable store with default bounds
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), Duration::from_secs(5), Duration::from_secs(10))
    }

    /// Open the store, creating or upgrading its schema.
    ///
    /// Idempotent. A failure here is fatal to the offline subsystem and is
    /// reported as [`OfflineError::StorageUnavailable`].
    pub async fn open(&self) -> Result<()> {
        self.opened
            .get_or_try_init(|| async {
                let init = tokio::time::timeout(self.init_timeout, self.backend.init()).await;
                match init {
                    Ok(Ok(())) => {
                        tracing::info!("local store opened");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "local store failed to open");
                        Err(match e {
                            OfflineError::StorageUnavailable { .. } => e,
                            other => OfflineError::unavailable(other.to_string()),
                        })
                    }
                    Err(_) => {
                        tracing::error!(after = ?self.init_timeout, "local store initialization timed out");
                        Err(OfflineError::unavailable(format!(
                            "initialization timed out after {:?}",
                            self.init_timeout
                        )))
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Whether [`open`](Self::open) has completed
    pub fn is_open(&self) -> bool {
        self.opened.initialized()
    }

    /// Insert or overwrite a record. Assigns an id when the record has none.
    ///
    /// Returns the resolved id.
    pub async fn put(&self, collection: &str, mut record: Record) -> Result<String> {
        let id = match record::record_id(&record) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                record.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        self.write("put", collection, async {
            self.backend.put(collection, &id, &record).await
        })
        .await?;
        Ok(id)
    }

    /// Serialize a typed value and store it
    pub async fn put_typed<T: Serialize>(&self, collection: &str, value: &T) -> Result<String> {
        match serde_json::to_value(value)? {
            Value::Object(record) => self.put(collection, record).await,
            _ => Err(OfflineError::serialization("value does not serialize to an object")),
        }
    }

    /// Fetch one record; a missing id is `Ok(None)`
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.read("get", collection, self.backend.get(collection, id)).await
    }

    /// Fetch and deserialize one record
    pub async fn get_typed<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        match self.get(collection, id).await? {
            Some(record) => Ok(Some(serde_json::from_value(Value::Object(record))?)),
            None => Ok(None),
        }
    }

    /// Every record of a collection, in insertion order
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        self.read("get_all", collection, self.backend.get_all(collection)).await
    }

    /// Every record of a collection, deserialized. Undecodable records are
    /// skipped with a warning.
    pub async fn get_all_typed<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let records = self.get_all(collection).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(Value::Object(record)) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(collection, error = %e, "skipping undecodable record");
                    None
                }
            })
            .collect())
    }

    /// Sorted, limited view of a collection
    pub async fn get_latest(&self, collection: &str, sort: Option<&SortSpec>, limit: Option<usize>) -> Result<Vec<Record>> {
        let mut records = self.get_all(collection).await?;
        record::sort_and_limit(&mut records, sort, limit);
        Ok(records)
    }

    /// Records whose secondary index equals `value`
    pub async fn find_by_index(&self, collection: &str, index: IndexField, value: &str) -> Result<Vec<Record>> {
        self.read("find_by_index", collection, self.backend.find_by_index(collection, index, value))
            .await
    }

    /// Remove one record; removing a missing id is not an error
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.write("delete", collection, self.backend.delete(collection, id)).await
    }

    /// Remove every record (and blob) of a collection
    pub async fn clear(&self, collection: &str) -> Result<u64> {
        self.write("clear", collection, self.backend.clear(collection)).await
    }

    /// Number of records in a collection
    pub async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.get_all(collection).await?.len())
    }

    /// Names of non-empty collections
    pub async fn collections(&self) -> Result<Vec<String>> {
        self.read("collections", "*", self.backend.collections()).await
    }

    /// Store a binary payload next to a record
    pub async fn put_blob(&self, collection: &str, id: &str, bytes: &[u8]) -> Result<()> {
        self.write("put_blob", collection, self.backend.put_blob(collection, id, bytes))
            .await
    }

    pub async fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        self.read("get_blob", collection, self.backend.get_blob(collection, id)).await
    }

    pub async fn delete_blob(&self, collection: &str, id: &str) -> Result<bool> {
        self.write("delete_blob", collection, self.backend.delete_blob(collection, id))
            .await
    }

    /// Replace every string value equal to `from` with `to` in all
    /// collections. Returns the number of records rewritten.
    pub async fn rewrite_references(&self, from: &str, to: &str) -> Result<usize> {
        let mut rewritten = 0;
        for collection in self.collections().await? {
            for record in self.get_all(&collection).await? {
                let mut value = Value::Object(record);
                if record::replace_string_values(&mut value, from, to) {
                    if let Value::Object(record) = value {
                        self.put(&collection, record).await?;
                        rewritten += 1;
                    }
                }
            }
        }
        if rewritten > 0 {
            tracing::debug!(from, to, rewritten, "rewrote local references");
        }
        Ok(rewritten)
    }

    /// Per-collection record counts and estimated sizes
    pub async fn usage(&self) -> Result<StoreUsage> {
        let mut collections = Vec::new();
        for name in self.collections().await? {
            let records = self.get_all(&name).await?;
            let document_bytes: u64 = records
                .iter()
                .map(|r| serde_json::to_string(r).map(|s| s.len() as u64).unwrap_or(0))
                .sum();
            let blob_bytes = self
                .read("blob_bytes", &name, self.backend.blob_bytes(&name))
                .await?;
            collections.push(CollectionUsage {
                name,
                records: records.len(),
                bytes: document_bytes + blob_bytes,
            });
        }
        let total_bytes = collections.iter().map(|c| c.bytes).sum();
        Ok(StoreUsage {
            collections,
            total_bytes,
        })
    }

    /// Release the engine. The store must not be used afterwards.
    pub async fn close(&self) {
        self.backend.close().await;
    }

    async fn read<T>(&self, operation: &'static str, collection: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.open().await?;
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| OfflineError::timeout(operation, collection, self.op_timeout))?
    }

    async fn write<T>(&self, operation: &'static str, collection: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.open().await?;
        let lock = self.write_lock(collection);
        let bounded = async {
            let _guard = lock.lock().await;
            fut.await
        };
        tokio::time::timeout(self.op_timeout, bounded)
            .await
            .map_err(|_| OfflineError::timeout(operation, collection, self.op_timeout))?
    }

    fn write_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(collection.to_string()).or_default())
    }
}

/// Storage used by one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionUsage {
    pub name: String,
    pub records: usize,
    /// Serialized documents plus blobs
    pub bytes: u64,
}

/// Storage used by the whole store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreUsage {
    pub collections: Vec<CollectionUsage>,
    pub total_bytes: u64,
}

impl StoreUsage {
    /// Records held by a collection, zero when absent
    pub fn records_in(&self, collection: &str) -> usize {
        self.collections
            .iter()
            .find(|c| c.name == collection)
            .map(|c| c.records)
            .unwrap_or(0)
    }
}
