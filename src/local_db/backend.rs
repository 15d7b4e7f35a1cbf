//! Storage backend seam
//!
//! [`LocalStore`](super::LocalStore) owns timeouts, locking and id
//! assignment; a backend only moves documents and blobs in and out of its
//! engine. Backends report failures as [`OfflineError::Storage`] and never
//! apply their own time bounds.

use crate::local_db::record::Record;
use crate::local_db::schema::IndexField;
use crate::shared::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait StoreBackend: Send + Sync + std::fmt::Debug {
    /// Create or upgrade the schema. Called once by the store.
    async fn init(&self) -> Result<()>;

    /// Insert or overwrite by id. An overwrite keeps the original position.
    async fn put(&self, collection: &str, id: &str, record: &Record) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// Every record of a collection, in insertion order
    async fn get_all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Returns whether a record was removed
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Returns the number of records removed
    async fn clear(&self, collection: &str) -> Result<u64>;

    /// Names of collections holding at least one record
    async fn collections(&self) -> Result<Vec<String>>;

    /// Records whose secondary index equals `value`
    async fn find_by_index(&self, collection: &str, index: IndexField, value: &str) -> Result<Vec<Record>> {
        let records = self.get_all(collection).await?;
        Ok(records
            .into_iter()
            .filter(|record| index.extract(record).as_deref() == Some(value))
            .collect())
    }

    async fn put_blob(&self, collection: &str, id: &str, bytes: &[u8]) -> Result<()>;

    async fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>>;

    async fn delete_blob(&self, collection: &str, id: &str) -> Result<bool>;

    /// Total blob bytes stored in a collection
    async fn blob_bytes(&self, collection: &str) -> Result<u64>;

    /// Release engine resources
    async fn close(&self) {}
}
