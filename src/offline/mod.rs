//! # Offline Data Layer
//!
//! Offline-first CRUD on top of the Local Store: optimistic local writes,
//! an operation queue for everything the remote has not confirmed, and the
//! retry arithmetic shared with downloads and sync.
//!
//! ## Key Components
//!
//! - `gateway.rs`: entity CRUD with online/offline fallback
//! - `queue.rs`: persistent queue of pending mutations
//! - `retry.rs`: retry ceiling and backoff strategies
//!
//! ## Usage
//!
//! ```rust,no_run
//! use companion_offline::offline::EntityGateway;
//! use serde_json::json;
//!
//! # async fn example(gateway: EntityGateway) -> companion_offline::Result<()> {
//! let data = json!({"title": "Beach trip"}).as_object().cloned().unwrap();
//! let memory = gateway.create("Memory", data).await?;
//!
//! // Readable right away, whether or not the remote answered
//! let id = memory["id"].as_str().unwrap_or_default();
//! assert!(gateway.get("Memory", id).await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod gateway;
pub mod queue;
pub mod retry;

pub use gateway::{collection_for_entity, EntityGateway, ListOptions};
pub use queue::{ErrorKind, OperationKind, OperationQueue, OperationStatus, PendingOperation, QueueStats};
pub use retry::{BackoffStrategy, RetryPolicy};
