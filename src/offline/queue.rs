//! # Operation Queue
//!
//! Mutations that could not be confirmed against the remote service, kept
//! in the `pendingOps` collection until the sync reconciler applies them.
//!
//! ## Features
//!
//! - **Persistent Queue**: entries are Local Store records and survive restarts
//! - **FIFO Replay**: every entry carries a monotonically increasing `sequence`
//! - **Status Tracking**: `pending`, then removed on success or `failed` after
//!   the retry ceiling
//! - **Inspectable Failures**: failed entries keep their last error and its
//!   kind, and stay until retried or removed
//!
//! ## Usage
//!
//! ```rust,no_run
//! use companion_offline::local_db::LocalStore;
//! use companion_offline::offline::queue::{OperationKind, OperationQueue};
//! use std::sync::Arc;
//!
//! # async fn example() -> companion_offline::Result<()> {
//! let store = Arc::new(LocalStore::in_memory());
//! let queue = OperationQueue::new(store);
//!
//! let payload = serde_json::json!({"title": "Beach trip"}).as_object().cloned().unwrap();
//! let op = queue.enqueue(OperationKind::Create, "Memory", "temp_1_abc", payload).await?;
//!
//! // ... after the remote call succeeded
//! queue.dequeue(&op.id).await?;
//! # Ok(())
//! # }
//! ```

use crate::local_db::{record, schema, IndexField, LocalStore, Record};
use crate::offline::gateway::collection_for_entity;
use crate::shared::error::{OfflineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Lifecycle of a queued mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next sync pass
    Pending,
    /// Applied remotely; such entries are removed rather than stored
    Synced,
    /// Exceeded the retry ceiling; kept for inspection
    Failed,
}

/// What went wrong on the last attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response from the remote service
    Unreachable,
    /// The remote service refused the payload
    Rejected,
    Other,
}

impl ErrorKind {
    pub fn of(error: &OfflineError) -> Self {
        match error {
            OfflineError::RemoteUnreachable { .. } => ErrorKind::Unreachable,
            OfflineError::RemoteRejected { .. } => ErrorKind::Rejected,
            _ => ErrorKind::Other,
        }
    }
}

/// A mutation awaiting application against the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOperation {
    pub id: String,
    /// FIFO position, unique and increasing
    pub sequence: u64,
    pub kind: OperationKind,
    /// Remote entity type (`Memory`, `CarePlan`, ...)
    pub entity: String,
    /// Local Store collection of the target record
    pub collection: String,
    /// Temporary id for creates, real or temporary id otherwise
    pub target_id: String,
    pub payload: Record,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: OperationStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// Record a failed attempt
    pub fn record_failure(&mut self, error: &OfflineError) {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.error_kind = Some(ErrorKind::of(error));
        self.last_attempt_at = Some(Utc::now());
    }

    /// Park the entry as a rejected failure. It is replayed only after
    /// [`OperationQueue::retry_failed`].
    pub fn hold_for_review(&mut self, message: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.last_error = Some(message.into());
        self.error_kind = Some(ErrorKind::Rejected);
        self.last_attempt_at = Some(Utc::now());
    }

    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub failed: usize,
    /// Entries whose last failure was a remote rejection
    pub rejected: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.failed
    }
}

/// Persistent FIFO of pending operations
#[derive(Debug)]
pub struct OperationQueue {
    store: Arc<LocalStore>,
    /// Last sequence handed out; loaded from the store on first enqueue
    last_sequence: Mutex<Option<u64>>,
}

impl OperationQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            last_sequence: Mutex::new(None),
        }
    }

    /// Append a pending operation
    pub async fn enqueue(&self, kind: OperationKind, entity: &str, target_id: &str, payload: Record) -> Result<PendingOperation> {
        let mut last_sequence = self.last_sequence.lock().await;
        let previous = match *last_sequence {
            Some(sequence) => sequence,
            None => self
                .load()
                .await?
                .iter()
                .map(|op| op.sequence)
                .max()
                .unwrap_or(0),
        };
        let sequence = previous + 1;

        let op = PendingOperation {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            kind,
            entity: entity.to_string(),
            collection: collection_for_entity(entity),
            target_id: target_id.to_string(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            status: OperationStatus::Pending,
            last_error: None,
            error_kind: None,
            last_attempt_at: None,
        };
        self.store.put_typed(schema::PENDING_OPS, &op).await?;
        *last_sequence = Some(sequence);

        tracing::debug!(op_id = %op.id, ?kind, entity, target_id, sequence, "queued pending operation");
        Ok(op)
    }

    /// Remove an entry, typically after it was applied remotely
    pub async fn dequeue(&self, id: &str) -> Result<bool> {
        self.store.delete(schema::PENDING_OPS, id).await
    }

    /// Pending and failed entries in FIFO order
    pub async fn all(&self) -> Result<Vec<PendingOperation>> {
        let mut ops = self.load().await?;
        ops.retain(|op| op.status != OperationStatus::Synced);
        Ok(ops)
    }

    /// Entries the next sync pass will replay, in FIFO order
    pub async fn pending(&self) -> Result<Vec<PendingOperation>> {
        self.by_status(OperationStatus::Pending).await
    }

    /// Entries that exceeded the retry ceiling
    pub async fn failed(&self) -> Result<Vec<PendingOperation>> {
        self.by_status(OperationStatus::Failed).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingOperation>> {
        self.store.get_typed(schema::PENDING_OPS, id).await
    }

    /// Persist changes to an existing entry
    pub async fn save(&self, op: &PendingOperation) -> Result<()> {
        self.store.put_typed(schema::PENDING_OPS, op).await?;
        Ok(())
    }

    /// Point entries at a permanent id once its create was confirmed.
    ///
    /// Rewrites both the target id and any payload field referencing the
    /// temporary id. Returns the number of entries changed.
    pub async fn remap_target(&self, from: &str, to: &str) -> Result<usize> {
        let mut changed = 0;
        for mut op in self.load().await? {
            let mut touched = false;
            if op.target_id == from {
                op.target_id = to.to_string();
                touched = true;
            }
            let mut payload = Value::Object(std::mem::take(&mut op.payload));
            touched |= record::replace_string_values(&mut payload, from, to);
            if let Value::Object(map) = payload {
                op.payload = map;
            }
            if touched {
                self.save(&op).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Drop every entry targeting a record. Used when a record that never
    /// reached the remote is deleted locally.
    pub async fn remove_for_target(&self, entity: &str, target_id: &str) -> Result<usize> {
        let mut removed = 0;
        for op in self.load().await? {
            if op.entity == entity && op.target_id == target_id && self.dequeue(&op.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(entity, target_id, removed, "cancelled queued operations");
        }
        Ok(removed)
    }

    /// Reset failed entries so the next sync pass retries them
    pub async fn retry_failed(&self) -> Result<usize> {
        let failed = self.failed().await?;
        for mut op in failed.iter().cloned() {
            op.status = OperationStatus::Pending;
            op.retry_count = 0;
            self.save(&op).await?;
        }
        if !failed.is_empty() {
            tracing::info!(count = failed.len(), "re-queued failed operations");
        }
        Ok(failed.len())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let ops = self.all().await?;
        let mut stats = QueueStats::default();
        for op in &ops {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Synced => {}
            }
            if op.error_kind == Some(ErrorKind::Rejected) {
                stats.rejected += 1;
            }
        }
        Ok(stats)
    }

    /// Number of pending and failed entries
    pub async fn len(&self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn by_status(&self, status: OperationStatus) -> Result<Vec<PendingOperation>> {
        let value = match serde_json::to_value(status)? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let records = self
            .store
            .find_by_index(schema::PENDING_OPS, IndexField::SyncStatus, &value)
            .await?;
        let mut ops = decode(records);
        ops.sort_by_key(|op| op.sequence);
        Ok(ops)
    }

    async fn load(&self) -> Result<Vec<PendingOperation>> {
        let mut ops: Vec<PendingOperation> = self.store.get_all_typed(schema::PENDING_OPS).await?;
        ops.sort_by_key(|op| op.sequence);
        Ok(ops)
    }
}

fn decode(records: Vec<Record>) -> Vec<PendingOperation> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(Value::Object(record)) {
            Ok(op) => Some(op),
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable pending operation");
                None
            }
        })
        .collect()
}
