//! # Sync Reconciler
//!
//! Drains the operation queue against the remote service.
//!
//! Each pending operation either succeeds and is removed, or has its retry
//! count raised; at the retry ceiling it becomes `failed` and is left for
//! inspection. Operations replay in FIFO order. When a queued create is
//! confirmed, the temporary record is replaced by the server's record and
//! every local reference to the temporary id is rewritten, so later
//! operations in the same pass already target the permanent id. An
//! operation still pointing at an unconfirmed temporary id, as its target or
//! inside its payload, waits for a later pass without being charged.
//!
//! Only one pass runs at a time; a pass requested while another is running,
//! or while offline, returns immediately.

use crate::local_db::record::{self, FIELD_PENDING_SYNC};
use crate::local_db::{LocalStore, Record};
use crate::offline::queue::{OperationKind, OperationQueue, OperationStatus, PendingOperation};
use crate::offline::retry::RetryPolicy;
use crate::remote::RemoteService;
use crate::shared::error::{OfflineError, Result};
use crate::shared::subscribers::{Subscribers, Subscription};
use crate::sync::metrics::{MetricsSnapshot, SyncMetrics};
use crate::sync::network_monitor::NetworkMonitor;
use crate::sync::sync_state::{SyncMetadata, SyncMetadataStore, SyncStatus};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a sync request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The queue was replayed
    Completed,
    /// Another pass was already running; nothing was done
    AlreadyRunning,
    /// No connectivity; nothing was done
    Offline,
    /// Automatic trigger while auto-sync is switched off
    Disabled,
}

/// Result of one sync request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Operations applied remotely and removed from the queue
    pub processed: usize,
    /// Attempts that failed during this pass
    pub failed: usize,
    /// Operations that reached the retry ceiling during this pass
    pub exhausted: usize,
    /// Operations deferred because their target was never created remotely
    pub skipped: usize,
    /// Pending operations left after the pass
    pub remaining: usize,
    pub outcome: SyncOutcome,
}

impl SyncSummary {
    pub(crate) fn idle(outcome: SyncOutcome) -> Self {
        Self {
            processed: 0,
            failed: 0,
            exhausted: 0,
            skipped: 0,
            remaining: 0,
            outcome,
        }
    }

    pub fn ran(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }
}

/// Clears the in-progress flag however the pass ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct SyncReconciler {
    store: Arc<LocalStore>,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteService>,
    network: NetworkMonitor,
    metadata: Arc<SyncMetadataStore>,
    policy: RetryPolicy,
    in_progress: AtomicBool,
    metrics: std::sync::Mutex<SyncMetrics>,
    subscribers: Subscribers<SyncSummary>,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteService>,
        network: NetworkMonitor,
        metadata: Arc<SyncMetadataStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            network,
            metadata,
            policy,
            in_progress: AtomicBool::new(false),
            metrics: std::sync::Mutex::new(SyncMetrics::new()),
            subscribers: Subscribers::new(),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn metadata(&self) -> &Arc<SyncMetadataStore> {
        &self.metadata
    }

    /// Current sync metadata
    pub async fn status(&self) -> Result<SyncMetadata> {
        self.metadata.load().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.with_metrics(|metrics| metrics.snapshot())
    }

    /// Receive the summary of every completed pass
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncSummary) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.subscribers.unsubscribe(subscription)
    }

    /// Replay the operation queue once
    pub async fn run_sync(&self) -> Result<SyncSummary> {
        if !self.network.is_online() {
            tracing::debug!("sync skipped: offline");
            return Ok(SyncSummary::idle(SyncOutcome::Offline));
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sync skipped: pass already running");
            return Ok(SyncSummary::idle(SyncOutcome::AlreadyRunning));
        }
        let _guard = PassGuard(&self.in_progress);

        self.with_metrics(|metrics| metrics.record_sync_start());
        self.metadata
            .update(|m| {
                m.status = SyncStatus::Syncing;
                m.last_error = None;
            })
            .await?;

        let summary = match self.replay().await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "sync pass aborted");
                self.with_metrics(|metrics| metrics.record_sync_failure(0));
                self.metadata
                    .update(|m| {
                        m.status = SyncStatus::Error;
                        m.last_error = Some(e.to_string());
                    })
                    .await?;
                return Err(e);
            }
        };

        let clean = summary.failed == 0;
        // Entries parked as failed stay visible until retried.
        let awaiting_retry = self.queue.failed().await?.len();
        self.with_metrics(|metrics| {
            if clean {
                metrics.record_sync_success(summary.processed as u64)
            } else {
                metrics.record_sync_failure(summary.processed as u64)
            }
        });
        self.metadata
            .update(|m| {
                m.last_sync_at = Some(chrono::Utc::now());
                m.total_synced += summary.processed as u64;
                if !clean {
                    m.status = SyncStatus::Error;
                    m.last_error = Some(format!("{} operation(s) failed", summary.failed));
                } else if awaiting_retry > 0 {
                    m.status = SyncStatus::Error;
                    m.last_error = Some(format!("{} operation(s) awaiting retry", awaiting_retry));
                } else {
                    m.status = SyncStatus::Synced;
                }
            })
            .await?;

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            exhausted = summary.exhausted,
            skipped = summary.skipped,
            remaining = summary.remaining,
            "sync pass completed"
        );
        self.subscribers.notify(&summary);
        Ok(summary)
    }

    async fn replay(&self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::idle(SyncOutcome::Completed);
        // Temporary ids confirmed during this pass
        let mut resolved: HashMap<String, String> = HashMap::new();

        for mut op in self.queue.pending().await? {
            if !self.network.is_online() {
                tracing::debug!("connectivity lost, stopping sync pass");
                break;
            }

            // The snapshot predates remaps made earlier in this pass.
            let target = resolved
                .get(&op.target_id)
                .cloned()
                .unwrap_or_else(|| op.target_id.clone());
            let payload = resolve_payload(&op.payload, &resolved);

            let unconfirmed = if op.kind != OperationKind::Create && record::is_temp_id(&target) {
                Some(target.as_str())
            } else {
                record::temp_reference(&payload)
            };
            if let Some(unconfirmed) = unconfirmed {
                tracing::debug!(op_id = %op.id, unconfirmed, "deferring operation on unconfirmed record");
                summary.skipped += 1;
                continue;
            }

            match self.apply(&op, &target, &payload).await {
                Ok(Some(created)) if op.kind == OperationKind::Create && record::record_id(&created).is_none() => {
                    // The remote may hold the record already; replaying could duplicate it.
                    tracing::warn!(op_id = %op.id, entity = %op.entity, "remote create returned no id, holding for review");
                    op.payload = payload;
                    op.hold_for_review("created record has no id");
                    self.queue.save(&op).await?;
                    summary.failed += 1;
                    summary.exhausted += 1;
                }
                Ok(remote) => {
                    self.confirm(&op, &target, remote, &mut resolved).await?;
                    summary.processed += 1;
                }
                Err(e) => {
                    op.target_id = target;
                    op.payload = payload;
                    if self.record_failure(&mut op, &e).await? {
                        summary.exhausted += 1;
                    }
                    summary.failed += 1;
                }
            }
        }

        summary.remaining = self.queue.pending().await?.len();
        Ok(summary)
    }

    async fn apply(&self, op: &PendingOperation, target: &str, payload: &Record) -> Result<Option<Record>> {
        match op.kind {
            OperationKind::Create => self
                .remote
                .create(&op.entity, &record::strip_local_fields(payload))
                .await
                .map(Some),
            OperationKind::Update => self.remote.update(&op.entity, target, payload).await.map(Some),
            OperationKind::Delete => self.remote.delete(&op.entity, target).await.map(|_| None),
        }
    }

    /// Local bookkeeping after the remote applied an operation
    async fn confirm(
        &self,
        op: &PendingOperation,
        target: &str,
        remote: Option<Record>,
        resolved: &mut HashMap<String, String>,
    ) -> Result<()> {
        self.queue.dequeue(&op.id).await?;

        match (op.kind, remote) {
            (OperationKind::Create, Some(mut created)) => {
                let permanent = record::record_id(&created).unwrap_or_default();
                // Later offline edits are still queued: keep them on the
                // permanent record until they are confirmed too.
                if self.has_queued(op, &op.target_id).await? {
                    if let Some(local) = self.store.get(&op.collection, &op.target_id).await? {
                        record::merge(&mut created, &record::strip_local_fields(&local));
                        created.insert(FIELD_PENDING_SYNC.to_string(), Value::Bool(true));
                    }
                }
                // Never keep both the temporary and the permanent record.
                self.store.delete(&op.collection, &op.target_id).await?;
                record::touch(&mut created);
                self.store.put(&op.collection, created).await?;

                self.queue.remap_target(&op.target_id, &permanent).await?;
                self.store.rewrite_references(&op.target_id, &permanent).await?;
                tracing::debug!(temp_id = %op.target_id, id = %permanent, entity = %op.entity, "create confirmed");
                resolved.insert(op.target_id.clone(), permanent);
            }
            (OperationKind::Update, remote) => {
                // Newer local edits win until their own operations replay.
                if !self.has_queued(op, target).await? {
                    if let Some(mut local) = self.store.get(&op.collection, target).await? {
                        if let Some(remote) = remote {
                            record::merge(&mut local, &record::strip_local_fields(&remote));
                        }
                        local.remove(FIELD_PENDING_SYNC);
                        record::touch(&mut local);
                        self.store.put(&op.collection, local).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether other pending operations still target the same record
    async fn has_queued(&self, op: &PendingOperation, target: &str) -> Result<bool> {
        Ok(self
            .queue
            .pending()
            .await?
            .iter()
            .any(|other| other.id != op.id && other.entity == op.entity && other.target_id == target))
    }

    /// Charge a failed attempt. Returns whether the ceiling was reached.
    async fn record_failure(&self, op: &mut PendingOperation, error: &OfflineError) -> Result<bool> {
        op.record_failure(error);
        let exhausted = self.policy.should_give_up(op.retry_count);
        if exhausted {
            op.status = OperationStatus::Failed;
        }

        if error.is_remote_rejection() {
            tracing::warn!(op_id = %op.id, entity = %op.entity, attempt = op.retry_count, error = %error, "remote rejected queued operation");
        } else {
            tracing::debug!(op_id = %op.id, entity = %op.entity, attempt = op.retry_count, error = %error, "queued operation failed");
        }
        if exhausted {
            tracing::warn!(op_id = %op.id, entity = %op.entity, attempts = op.retry_count, "operation marked failed");
        }

        self.queue.save(op).await?;
        Ok(exhausted)
    }

    fn with_metrics<T>(&self, f: impl FnOnce(&mut SyncMetrics) -> T) -> T {
        let mut metrics = self
            .metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut metrics)
    }
}

fn resolve_payload(payload: &Record, resolved: &HashMap<String, String>) -> Record {
    if resolved.is_empty() {
        return payload.clone();
    }
    let mut value = Value::Object(payload.clone());
    for (from, to) in resolved {
        record::replace_string_values(&mut value, from, to);
    }
    match value {
        Value::Object(map) => map,
        _ => payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_payload() {
        let payload = json!({"conversation_id": "temp_1_a", "text": "hi"}).as_object().cloned().unwrap();
        let mut resolved = HashMap::new();
        resolved.insert("temp_1_a".to_string(), "c9".to_string());

        let out = resolve_payload(&payload, &resolved);
        assert_eq!(out["conversation_id"], "c9");
        assert_eq!(out["text"], "hi");
    }

    #[test]
    fn test_idle_summary_did_not_run() {
        assert!(!SyncSummary::idle(SyncOutcome::Offline).ran());
        assert!(SyncSummary::idle(SyncOutcome::Completed).ran());
    }
}
