//! # Sync State Management
//!
//! The sync metadata singleton: when the last pass ran, how many operations
//! have been applied in total, the current status, and whether connectivity
//! changes may trigger a pass on their own. It lives as a single record in
//! the `syncMeta` collection so it shares the Local Store's durability.

use crate::local_db::{schema, LocalStore};
use crate::shared::error::{OfflineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key of the singleton record
const SYNC_META_ID: &str = "sync_meta";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncMetadata {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_synced: u64,
    pub status: SyncStatus,
    pub auto_sync_enabled: bool,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            last_sync_at: None,
            total_synced: 0,
            status: SyncStatus::Idle,
            auto_sync_enabled: true,
            last_error: None,
        }
    }
}

/// Read-modify-write access to the singleton
#[derive(Debug)]
pub struct SyncMetadataStore {
    store: Arc<LocalStore>,
    /// Value of `auto_sync_enabled` before anything was persisted
    auto_sync_default: bool,
    write: Mutex<()>,
}

impl SyncMetadataStore {
    pub fn new(store: Arc<LocalStore>, auto_sync_default: bool) -> Self {
        Self {
            store,
            auto_sync_default,
            write: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<SyncMetadata> {
        let stored = self
            .store
            .get_typed::<SyncMetadata>(schema::SYNC_META, SYNC_META_ID)
            .await?;
        Ok(stored.unwrap_or_else(|| SyncMetadata {
            auto_sync_enabled: self.auto_sync_default,
            ..SyncMetadata::default()
        }))
    }

    /// Apply `change` to the stored metadata and persist the result
    pub async fn update<F>(&self, change: F) -> Result<SyncMetadata>
    where
        F: FnOnce(&mut SyncMetadata),
    {
        let _guard = self.write.lock().await;
        let mut metadata = self.load().await?;
        change(&mut metadata);
        self.save(&metadata).await?;
        Ok(metadata)
    }

    /// User-facing auto-sync toggle
    pub async fn set_auto_sync(&self, enabled: bool) -> Result<SyncMetadata> {
        tracing::info!(enabled, "auto-sync toggled");
        self.update(|metadata| metadata.auto_sync_enabled = enabled).await
    }

    pub async fn is_auto_sync_enabled(&self) -> Result<bool> {
        Ok(self.load().await?.auto_sync_enabled)
    }

    async fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        let mut record = match serde_json::to_value(metadata)? {
            Value::Object(record) => record,
            _ => return Err(OfflineError::serialization("sync metadata is not an object")),
        };
        record.insert("id".to_string(), Value::String(SYNC_META_ID.to_string()));
        self.store.put(schema::SYNC_META, record).await?;
        Ok(())
    }
}
