//! Remote service seam
//!
//! The offline engine talks to the hosted backend only through
//! [`RemoteService`]. Every call is fallible and possibly slow; callers
//! decide between fallback and queueing from the error variant:
//!
//! - [`OfflineError::RemoteUnreachable`](crate::OfflineError::RemoteUnreachable):
//!   no response (network down, timeout, 5xx)
//! - [`OfflineError::RemoteRejected`](crate::OfflineError::RemoteRejected):
//!   the service refused the request (4xx)

pub mod http;

pub use http::HttpRemoteService;

use crate::local_db::{Record, SortSpec};
use crate::shared::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Entity CRUD, server functions and file upload on the hosted backend
#[async_trait]
pub trait RemoteService: Send + Sync + std::fmt::Debug {
    /// List records of an entity type
    async fn list(&self, entity: &str, sort: Option<&SortSpec>, limit: Option<usize>) -> Result<Vec<Record>>;

    /// Fetch one record
    async fn get(&self, entity: &str, id: &str) -> Result<Record>;

    /// Create a record; the returned record carries the permanent id
    async fn create(&self, entity: &str, data: &Record) -> Result<Record>;

    /// Apply a partial update
    async fn update(&self, entity: &str, id: &str, data: &Record) -> Result<Record>;

    async fn delete(&self, entity: &str, id: &str) -> Result<()>;

    /// Call a server-side function such as `chat`
    async fn invoke(&self, function: &str, params: &Value) -> Result<Value>;

    /// Upload a file and return its hosted URL
    async fn upload_file(&self, name: &str, bytes: Vec<u8>) -> Result<String>;
}
