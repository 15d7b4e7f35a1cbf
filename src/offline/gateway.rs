//! # Entity Gateway
//!
//! CRUD over named entity types that works the same whether or not the
//! remote service is reachable.
//!
//! - Reads go to the remote when online, caching what comes back, and fall
//!   back to the Local Store otherwise.
//! - Writes land in the Local Store first (optimistic), then try the remote.
//!   A write the remote did not confirm is recorded in the operation queue
//!   for the sync reconciler, and so is any later write to a record that
//!   still has queued operations, keeping per-record order intact.
//!
//! Records created offline carry a temporary id (`temp_...`) until the
//! reconciler swaps them for the server's record.

use crate::local_db::record::{self, FIELD_IS_TEMP, FIELD_PENDING_SYNC};
use crate::local_db::{schema, LocalStore, Record, SortSpec};
use crate::offline::queue::{OperationKind, OperationQueue};
use crate::remote::RemoteService;
use crate::shared::error::{OfflineError, Result};
use crate::sync::NetworkMonitor;
use serde_json::Value;
use std::sync::Arc;

/// Local collection holding records of a remote entity type.
///
/// Unknown entities are stored under their own name.
pub fn collection_for_entity(entity: &str) -> String {
    let collection = match entity {
        "Conversation" => schema::CONVERSATIONS,
        "Message" => schema::MESSAGES,
        "AIResponse" => schema::AI_RESPONSES,
        "Story" => schema::STORIES,
        "Music" => schema::MUSIC,
        "Memory" => schema::MEMORIES,
        "UserProfile" => schema::USER_PROFILE,
        "CareJournal" => schema::CARE_JOURNAL,
        "FamilyMedia" => schema::FAMILY_MEDIA,
        "ActivityLog" => schema::ACTIVITY_LOG,
        "DailyRoutine" | "Routine" => schema::ROUTINES,
        "SafeZone" => schema::SAFE_ZONES,
        "EmergencyContact" => schema::EMERGENCY_CONTACTS,
        "CognitiveExercise" | "Exercise" => schema::EXERCISES,
        "CarePlan" => schema::CARE_PLANS,
        other => other,
    };
    collection.to_string()
}

/// Sorting and paging for [`EntityGateway::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

impl ListOptions {
    /// Sort by a field in remote notation (`"-created_date"`)
    pub fn sorted(spec: &str) -> Self {
        Self {
            sort: SortSpec::parse(spec),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntityGateway {
    store: Arc<LocalStore>,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteService>,
    network: NetworkMonitor,
}

impl EntityGateway {
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteService>,
        network: NetworkMonitor,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            network,
        }
    }

    /// Records of an entity type, remote when possible, cached otherwise
    pub async fn list(&self, entity: &str, options: &ListOptions) -> Result<Vec<Record>> {
        let collection = collection_for_entity(entity);

        if self.network.is_online() {
            match self
                .remote
                .list(entity, options.sort.as_ref(), options.limit)
                .await
            {
                Ok(records) => {
                    for remote in &records {
                        self.cache(&collection, remote.clone()).await?;
                    }
                    return Ok(records);
                }
                Err(e) => log_remote_failure(entity, "list", &e),
            }
        }

        let cached = self
            .store
            .get_latest(&collection, options.sort.as_ref(), options.limit)
            .await;
        recover(cached, &collection, Vec::new())
    }

    /// One record, remote when possible, cached otherwise
    pub async fn get(&self, entity: &str, id: &str) -> Result<Option<Record>> {
        let collection = collection_for_entity(entity);

        if self.network.is_online() && !record::is_temp_id(id) {
            match self.remote.get(entity, id).await {
                Ok(remote) => {
                    self.cache(&collection, remote.clone()).await?;
                    return Ok(Some(remote));
                }
                Err(e) => log_remote_failure(entity, "get", &e),
            }
        }

        recover(self.store.get(&collection, id).await, &collection, None)
    }

    /// Create a record.
    ///
    /// The record is readable locally under a temporary id before the remote
    /// is contacted. On remote success the temporary record is replaced by the
    /// server's; otherwise a `create` is queued and the temporary record is
    /// returned.
    pub async fn create(&self, entity: &str, data: Record) -> Result<Record> {
        let collection = collection_for_entity(entity);
        let temp_id = record::temp_id();
        let payload = record::strip_local_fields(&data);

        let mut local = payload.clone();
        local.insert("id".to_string(), Value::String(temp_id.clone()));
        local.insert(FIELD_IS_TEMP.to_string(), Value::Bool(true));
        local.insert(FIELD_PENDING_SYNC.to_string(), Value::Bool(true));
        record::touch(&mut local);
        recover(self.store.put(&collection, local.clone()).await.map(|_| ()), &collection, ())?;

        if self.network.is_online() {
            let created = self.remote.create(entity, &payload).await;
            match created {
                Ok(remote) if record::record_id(&remote).is_some() => {
                    recover(self.store.delete(&collection, &temp_id).await.map(|_| ()), &collection, ())?;
                    self.cache(&collection, remote.clone()).await?;
                    tracing::debug!(entity, id = ?record::record_id(&remote), "created remotely");
                    return Ok(remote);
                }
                Ok(_) => {
                    // The remote may hold the record already; replaying could duplicate it.
                    tracing::warn!(entity, temp_id = %temp_id, "remote create returned no id, holding for review");
                    let held = match self.queue.enqueue(OperationKind::Create, entity, &temp_id, payload).await {
                        Ok(mut op) => {
                            op.hold_for_review("created record has no id");
                            self.queue.save(&op).await
                        }
                        Err(e) => Err(e),
                    };
                    recover(held, schema::PENDING_OPS, ())?;
                    return Ok(local);
                }
                Err(e) => {
                    log_remote_failure(entity, "create", &e);
                    self.enqueue_failed(OperationKind::Create, entity, &temp_id, payload, &e)
                        .await?;
                    return Ok(local);
                }
            }
        }

        self.enqueue(OperationKind::Create, entity, &temp_id, payload).await?;
        Ok(local)
    }

    /// Merge `data` into a record locally, then try the remote update.
    ///
    /// Returns the merged record either way.
    pub async fn update(&self, entity: &str, id: &str, data: Record) -> Result<Record> {
        let collection = collection_for_entity(entity);
        let changes = record::strip_local_fields(&data);

        let existing = recover(self.store.get(&collection, id).await, &collection, None)?;
        let mut merged = existing.unwrap_or_else(|| {
            let mut fresh = Record::new();
            fresh.insert("id".to_string(), Value::String(id.to_string()));
            fresh
        });
        record::merge(&mut merged, &changes);
        merged.insert(FIELD_PENDING_SYNC.to_string(), Value::Bool(true));
        record::touch(&mut merged);
        recover(self.store.put(&collection, merged.clone()).await.map(|_| ()), &collection, ())?;

        // A temporary id means the create is still queued; the remote has
        // nothing to update yet. Older queued edits must reach it first.
        if self.network.is_online() && !record::is_temp_id(id) && !self.has_queued(entity, id).await? {
            let updated = self.remote.update(entity, id, &changes).await;
            match updated {
                Ok(remote) => {
                    record::merge(&mut merged, &record::strip_local_fields(&remote));
                    merged.remove(FIELD_PENDING_SYNC);
                    self.cache(&collection, merged.clone()).await?;
                    return Ok(merged);
                }
                Err(e) => {
                    log_remote_failure(entity, "update", &e);
                    self.enqueue_failed(OperationKind::Update, entity, id, changes, &e)
                        .await?;
                    return Ok(merged);
                }
            }
        }

        self.enqueue(OperationKind::Update, entity, id, changes).await?;
        Ok(merged)
    }

    /// Delete locally, then try the remote delete
    pub async fn delete(&self, entity: &str, id: &str) -> Result<()> {
        let collection = collection_for_entity(entity);
        recover(self.store.delete(&collection, id).await.map(|_| ()), &collection, ())?;

        if record::is_temp_id(id) {
            // Never reached the remote: forget its queued history instead.
            recover(self.queue.remove_for_target(entity, id).await.map(|_| ()), schema::PENDING_OPS, ())?;
            return Ok(());
        }

        if self.network.is_online() && !self.has_queued(entity, id).await? {
            match self.remote.delete(entity, id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log_remote_failure(entity, "delete", &e);
                    return self
                        .enqueue_failed(OperationKind::Delete, entity, id, Record::new(), &e)
                        .await;
                }
            }
        }

        self.enqueue(OperationKind::Delete, entity, id, Record::new()).await
    }

    /// Upload a file and return its hosted URL. Requires connectivity.
    pub async fn upload_file(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        if !self.network.is_online() {
            return Err(OfflineError::unreachable("offline"));
        }
        self.remote.upload_file(name, bytes).await
    }

    /// Whether queued operations for this record are still waiting to replay
    async fn has_queued(&self, entity: &str, id: &str) -> Result<bool> {
        let pending = self
            .queue
            .pending()
            .await
            .map(|ops| ops.iter().any(|op| op.entity == entity && op.target_id == id));
        recover(pending, schema::PENDING_OPS, false)
    }

    async fn cache(&self, collection: &str, mut record: Record) -> Result<()> {
        record::touch(&mut record);
        recover(self.store.put(collection, record).await.map(|_| ()), collection, ())
    }

    async fn enqueue(&self, kind: OperationKind, entity: &str, target_id: &str, payload: Record) -> Result<()> {
        let queued = self.queue.enqueue(kind, entity, target_id, payload).await;
        recover(queued.map(|_| ()), schema::PENDING_OPS, ())
    }

    /// Queue an operation the remote just refused or never answered, keeping
    /// the error on the entry without charging an attempt.
    async fn enqueue_failed(
        &self,
        kind: OperationKind,
        entity: &str,
        target_id: &str,
        payload: Record,
        error: &OfflineError,
    ) -> Result<()> {
        let queued = match self.queue.enqueue(kind, entity, target_id, payload).await {
            Ok(mut op) => {
                op.last_error = Some(error.to_string());
                op.error_kind = Some(crate::offline::queue::ErrorKind::of(error));
                self.queue.save(&op).await
            }
            Err(e) => Err(e),
        };
        recover(queued, schema::PENDING_OPS, ())
    }
}

/// Rejections are logged at warn so permanently invalid payloads stand out
/// from ordinary unreachability.
fn log_remote_failure(entity: &str, operation: &str, error: &OfflineError) {
    if error.is_remote_rejection() {
        tracing::warn!(entity, operation, error = %error, "remote rejected request, falling back to local");
    } else {
        tracing::debug!(entity, operation, error = %error, "remote unavailable, falling back to local");
    }
}

/// Swallow non-fatal storage errors into a fallback value
fn recover<T>(result: Result<T>, collection: &str, fallback: T) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(collection, error = %e, "local store operation failed");
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_mapping() {
        assert_eq!(collection_for_entity("Memory"), "memories");
        assert_eq!(collection_for_entity("CarePlan"), "carePlans");
        assert_eq!(collection_for_entity("DailyRoutine"), "routines");
        assert_eq!(collection_for_entity("Widget"), "Widget");
    }

    #[test]
    fn test_list_options() {
        let options = ListOptions::sorted("-created_date").limit(20);
        assert_eq!(options.sort.as_ref().map(|s| s.descending), Some(true));
        assert_eq!(options.limit, Some(20));
    }

    #[test]
    fn test_recover_passes_fatal_errors() {
        let fatal: Result<()> = Err(OfflineError::unavailable("gone"));
        assert!(recover(fatal, "memories", ()).is_err());

        let transient: Result<Vec<Record>> = Err(OfflineError::timeout("get_all", "memories", std::time::Duration::from_secs(5)));
        assert_eq!(recover(transient, "memories", Vec::new()).unwrap(), Vec::<Record>::new());
    }
}
