//! # Media Download Manager
//!
//! Makes remote media and library content available without a network
//! connection.
//!
//! ## Features
//!
//! - **Single items**: `GET` with a per-request timeout, linear backoff
//!   between attempts, and rejection of empty payloads. A stored audio item
//!   always has its full blob.
//! - **Batches**: sequential downloads; one failure never aborts the rest.
//! - **Full download**: bundled answers, stories, music metadata and
//!   exercises, one phase after another. Full downloads never overlap.
//! - **Progress**: any number of subscribers, each given the current snapshot
//!   on subscription and every update after it.
//! - **Verification**: compares stored items against attempted ones.
//!
//! ## Key Components
//!
//! - `progress.rs`: phases and progress snapshots
//! - `verify.rs`: verification report

pub mod progress;
pub mod verify;

pub use progress::{DownloadPhase, DownloadProgress};
pub use verify::{CollectionCheck, VerificationReport};

use crate::local_db::{record, schema, LocalStore, Record};
use crate::offline::retry::{BackoffStrategy, RetryPolicy};
use crate::remote::RemoteService;
use crate::responses::ResponseCache;
use crate::shared::config::OfflineConfig;
use crate::shared::error::{OfflineError, Result};
use crate::shared::subscribers::{Subscribers, Subscription};
use crate::sync::NetworkMonitor;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use verify::AttemptLog;

/// Collections populated by offline downloads
pub const OFFLINE_CONTENT: &[&str] = &[
    schema::AI_RESPONSES,
    schema::STORIES,
    schema::MUSIC,
    schema::EXERCISES,
    schema::AUDIO_LIBRARY,
];

/// A remote media file to make available offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable id; derived from the URL when absent
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    pub title: String,
    #[serde(rename = "type", default = "default_media_type")]
    pub media_type: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub era: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

fn default_media_type() -> String {
    "audio".to_string()
}

impl MediaItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            title: title.into(),
            media_type: default_media_type(),
            artist: None,
            era: None,
            genre: None,
        }
    }

    /// Key under which the item is stored
    pub fn storage_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, self.url.as_bytes()).to_string(),
        }
    }
}

/// A successfully stored item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedItem {
    pub id: String,
    /// Blob size in bytes
    pub size: u64,
    /// Attempts made, the successful one included
    pub attempts: u32,
    pub downloaded_at: DateTime<Utc>,
}

/// Outcome of one item of a batch
#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub url: String,
    pub title: String,
    pub result: std::result::Result<DownloadedItem, OfflineError>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItemResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

/// Items stored per phase of a full download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: DownloadPhase,
    pub stored: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullDownloadReport {
    pub phases: Vec<PhaseReport>,
    pub verification: VerificationReport,
}

impl FullDownloadReport {
    pub fn is_complete(&self) -> bool {
        self.phases.iter().all(|p| p.error.is_none()) && self.verification.is_complete()
    }
}

#[derive(Debug)]
pub struct MediaDownloadManager {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteService>,
    network: NetworkMonitor,
    responses: ResponseCache,
    client: Client,
    policy: RetryPolicy,
    progress_interval: usize,
    progress: Mutex<DownloadProgress>,
    subscribers: Subscribers<DownloadProgress>,
    attempts: Mutex<AttemptLog>,
    full_download: tokio::sync::Mutex<()>,
}

impl MediaDownloadManager {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteService>,
        network: NetworkMonitor,
        responses: ResponseCache,
        config: &OfflineConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| OfflineError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            store,
            remote,
            network,
            responses,
            client,
            policy: RetryPolicy::new(
                config.download_retries,
                BackoffStrategy::Linear {
                    step: config.download_backoff_step,
                },
            ),
            progress_interval: config.progress_interval.max(1),
            progress: Mutex::new(DownloadProgress::idle()),
            subscribers: Subscribers::new(),
            attempts: Mutex::new(AttemptLog::default()),
            full_download: tokio::sync::Mutex::new(()),
        })
    }

    /// Download with the configured number of attempts
    pub async fn download_item(&self, item: &MediaItem) -> Result<DownloadedItem> {
        self.download_item_with_retries(item, self.policy.max_attempts).await
    }

    /// Download one item, making at most `max_retries` attempts
    pub async fn download_item_with_retries(&self, item: &MediaItem, max_retries: u32) -> Result<DownloadedItem> {
        let url = validate_url(&item.url)?;
        let id = item.storage_id();
        self.lock_attempts().record(schema::AUDIO_LIBRARY, id.clone());

        if !self.network.is_online() {
            return Err(OfflineError::download(&item.url, 0, "offline"));
        }

        let policy = RetryPolicy::new(max_retries, self.policy.backoff);
        let mut attempt = 0;
        let bytes = loop {
            attempt += 1;
            match self.fetch(&url).await {
                Ok(bytes) => break bytes,
                Err(message) => {
                    if policy.should_give_up(attempt) {
                        tracing::warn!(url = %item.url, attempts = attempt, error = %message, "download failed");
                        return Err(OfflineError::download(&item.url, attempt, message));
                    }
                    let delay = policy.delay_after(attempt);
                    tracing::debug!(url = %item.url, attempt, ?delay, error = %message, "download attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let downloaded = DownloadedItem {
            id: id.clone(),
            size: bytes.len() as u64,
            attempts: attempt,
            downloaded_at: Utc::now(),
        };

        // Blob first: a metadata record implies the full blob is present.
        self.store.put_blob(schema::AUDIO_LIBRARY, &id, &bytes).await?;
        self.store
            .put(schema::AUDIO_LIBRARY, audio_metadata(item, &downloaded))
            .await?;

        tracing::info!(id = %id, size = downloaded.size, attempts = attempt, "stored offline media");
        Ok(downloaded)
    }

    /// Download items one after another; failures are reported per item
    pub async fn download_batch(&self, items: &[MediaItem]) -> BatchReport {
        let mut report = BatchReport::default();
        for item in items {
            let result = self.download_item(item).await;
            if let Err(e) = &result {
                tracing::warn!(url = %item.url, error = %e, "batch item failed");
            }
            report.items.push(BatchItemResult {
                url: item.url.clone(),
                title: item.title.clone(),
                result,
            });
        }
        tracing::info!(succeeded = report.succeeded(), failed = report.failed(), "batch download finished");
        report
    }

    /// Run every download phase in order, then verify.
    ///
    /// A phase that fails is recorded and the next one still runs. A second
    /// call waits for a running full download to finish.
    pub async fn start_full_download(&self) -> Result<FullDownloadReport> {
        let _running = self.full_download.lock().await;
        tracing::info!("full offline download started");

        let mut phases = Vec::with_capacity(DownloadPhase::ALL.len());
        let mut last_error = None;
        for phase in DownloadPhase::ALL {
            self.publish(DownloadProgress::phase(phase, 0, 0, phase.label()));
            let outcome = match phase.entity() {
                None => self.seed_responses().await,
                Some(entity) => self.download_entities(phase, entity).await,
            };
            let report = match outcome {
                Ok(stored) => PhaseReport {
                    phase,
                    stored,
                    error: None,
                },
                Err(e) if e.is_fatal() => {
                    self.publish(DownloadProgress {
                        finished: true,
                        error: Some(e.to_string()),
                        ..self.progress()
                    });
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(?phase, error = %e, "download phase failed");
                    last_error = Some(e.to_string());
                    PhaseReport {
                        phase,
                        stored: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            phases.push(report);
        }

        let verification = self.verify().await?;
        self.publish(DownloadProgress {
            phase: None,
            current: verification.total_items,
            total: verification.total_items,
            current_item: "Done".to_string(),
            finished: true,
            error: last_error,
        });
        tracing::info!(items = verification.total_items, bytes = verification.total_bytes, "full offline download finished");

        Ok(FullDownloadReport {
            phases,
            verification,
        })
    }

    /// Compare stored items with attempted ones for every populated
    /// offline-content collection
    pub async fn verify(&self) -> Result<VerificationReport> {
        let usage = self.store.usage().await?;
        let mut report = VerificationReport::default();

        for collection in OFFLINE_CONTENT {
            let records = self.store.get_all(collection).await?;
            let attempted = self.lock_attempts().attempted(collection).cloned();
            if records.is_empty() && attempted.as_ref().map_or(true, |ids| ids.is_empty()) {
                continue;
            }

            let (expected, found) = match attempted {
                Some(ids) if !ids.is_empty() => {
                    let present = records
                        .iter()
                        .filter_map(record::record_id)
                        .filter(|id| ids.contains(id))
                        .count();
                    (ids.len(), present)
                }
                _ => (records.len(), records.len()),
            };
            let bytes = usage
                .collections
                .iter()
                .find(|c| c.name == *collection)
                .map_or(0, |c| c.bytes);

            report.total_items += records.len();
            report.total_bytes += bytes;
            report.collections.push(CollectionCheck {
                collection: collection.to_string(),
                expected,
                found,
                records: records.len(),
                bytes,
            });
        }

        for mismatch in report.mismatches() {
            tracing::warn!(error = %mismatch, "offline content incomplete");
        }
        Ok(report)
    }

    /// Metadata of every stored audio item
    pub async fn list_audio(&self) -> Result<Vec<Record>> {
        self.store.get_all(schema::AUDIO_LIBRARY).await
    }

    pub async fn audio_blob(&self, id: &str) -> Result<Option<Vec<u8>>> {
        self.store.get_blob(schema::AUDIO_LIBRARY, id).await
    }

    /// Remove an audio item and its blob
    pub async fn remove_audio(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(schema::AUDIO_LIBRARY, id).await?;
        let blob_removed = self.store.delete_blob(schema::AUDIO_LIBRARY, id).await?;
        self.lock_attempts().forget(schema::AUDIO_LIBRARY, id);
        Ok(removed || blob_removed)
    }

    /// Drop everything the downloads stored
    pub async fn clear_offline_content(&self) -> Result<u64> {
        let _running = self.full_download.lock().await;
        let mut removed = 0;
        for collection in OFFLINE_CONTENT {
            removed += self.store.clear(collection).await?;
        }
        self.lock_attempts().clear();
        self.publish(DownloadProgress::idle());
        tracing::info!(removed, "cleared offline content");
        Ok(removed)
    }

    /// Whether the companion has answers and some library content offline
    pub async fn is_offline_ready(&self) -> Result<bool> {
        if self.store.count(schema::AI_RESPONSES).await? == 0 {
            return Ok(false);
        }
        for collection in [schema::STORIES, schema::MUSIC, schema::AUDIO_LIBRARY] {
            if self.store.count(collection).await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Current progress snapshot
    pub fn progress(&self) -> DownloadProgress {
        self.lock_progress().clone()
    }

    /// Receive the current snapshot now and every update after it
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DownloadProgress) + Send + Sync + 'static,
    {
        // Registering under the snapshot lock means no update can slip in
        // between the initial snapshot and the registration.
        let progress = self.lock_progress();
        listener(&*progress);
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.subscribers.unsubscribe(subscription)
    }

    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Network error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read body: {}", e))?;
        if bytes.is_empty() {
            return Err("empty response body".to_string());
        }
        Ok(bytes.to_vec())
    }

    async fn seed_responses(&self) -> Result<usize> {
        let phase = DownloadPhase::Responses;
        let total = crate::responses::BUNDLED_RESPONSES.len();
        let stored = self.responses.seed_bundle().await?;
        {
            let mut attempts = self.lock_attempts();
            for entry in crate::responses::BUNDLED_RESPONSES {
                attempts.record(
                    phase.collection(),
                    crate::responses::response_id_for(entry.prompt),
                );
            }
        }
        self.publish(DownloadProgress::phase(phase, stored, total, phase.label()));
        Ok(stored)
    }

    async fn download_entities(&self, phase: DownloadPhase, entity: &str) -> Result<usize> {
        if !self.network.is_online() {
            return Err(OfflineError::unreachable("offline"));
        }

        let records = self.remote.list(entity, None, None).await?;
        let total = records.len();
        let collection = phase.collection();
        let mut stored = 0;

        for (index, mut item) in records.into_iter().enumerate() {
            let Some(id) = record::record_id(&item) else {
                tracing::debug!(entity, "skipping record without id");
                continue;
            };
            self.lock_attempts().record(collection, id);

            let label = item_label(&item);
            record::touch(&mut item);
            self.store.put(collection, item).await?;
            stored += 1;

            let done = index + 1;
            if done % self.progress_interval == 0 || done == total {
                self.publish(DownloadProgress::phase(phase, done, total, label));
            }
        }

        if total == 0 {
            self.publish(DownloadProgress::phase(phase, 0, 0, phase.label()));
        }
        tracing::debug!(?phase, stored, "download phase finished");
        Ok(stored)
    }

    fn publish(&self, progress: DownloadProgress) {
        *self.lock_progress() = progress.clone();
        self.subscribers.notify(&progress);
    }

    fn lock_progress(&self) -> MutexGuard<'_, DownloadProgress> {
        self.progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_attempts(&self) -> MutexGuard<'_, AttemptLog> {
        self.attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accept absolute http(s) URLs only
fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| OfflineError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(OfflineError::InvalidUrl {
            url: raw.to_string(),
            message: format!("unsupported scheme '{}'", scheme),
        }),
    }
}

fn audio_metadata(item: &MediaItem, downloaded: &DownloadedItem) -> Record {
    let mut metadata = Record::new();
    metadata.insert("id".into(), Value::String(downloaded.id.clone()));
    metadata.insert("title".into(), Value::String(item.title.clone()));
    metadata.insert("type".into(), Value::String(item.media_type.clone()));
    metadata.insert("sourceUrl".into(), Value::String(item.url.clone()));
    for (key, value) in [("artist", &item.artist), ("era", &item.era), ("genre", &item.genre)] {
        if let Some(value) = value {
            metadata.insert(key.into(), Value::String(value.clone()));
        }
    }
    metadata.insert("size".into(), Value::from(downloaded.size));
    metadata.insert("attempts".into(), Value::from(downloaded.attempts));
    metadata.insert(
        "downloadedAt".into(),
        Value::String(downloaded.downloaded_at.to_rfc3339()),
    );
    metadata
}

fn item_label(item: &Record) -> String {
    ["title", "name"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .unwrap_or("item")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://cdn.example.com/song.mp3").is_ok());
        assert!(matches!(validate_url("not a url"), Err(OfflineError::InvalidUrl { .. })));
        assert!(matches!(validate_url("ftp://example.com/a"), Err(OfflineError::InvalidUrl { .. })));
    }

    #[test]
    fn test_storage_id_is_stable() {
        let item = MediaItem::new("https://cdn.example.com/song.mp3", "Song");
        assert_eq!(item.storage_id(), item.storage_id());

        let named = MediaItem {
            id: Some("song-1".into()),
            ..item
        };
        assert_eq!(named.storage_id(), "song-1");
    }

    #[test]
    fn test_audio_metadata_fields() {
        let item = MediaItem {
            artist: Some("Vera Lynn".into()),
            ..MediaItem::new("https://cdn.example.com/a.mp3", "We'll Meet Again")
        };
        let downloaded = DownloadedItem {
            id: "a".into(),
            size: 12,
            attempts: 1,
            downloaded_at: Utc::now(),
        };
        let metadata = audio_metadata(&item, &downloaded);
        assert_eq!(metadata["sourceUrl"], "https://cdn.example.com/a.mp3");
        assert_eq!(metadata["artist"], "Vera Lynn");
        assert_eq!(metadata["size"], 12);
        assert_eq!(metadata["type"], "audio");
        assert!(metadata.get("era").is_none());
    }

    #[test]
    fn test_batch_report_counts() {
        let report = BatchReport {
            items: vec![
                BatchItemResult {
                    url: "a".into(),
                    title: "a".into(),
                    result: Err(OfflineError::download("a", 3, "HTTP 500")),
                },
                BatchItemResult {
                    url: "b".into(),
                    title: "b".into(),
                    result: Ok(DownloadedItem {
                        id: "b".into(),
                        size: 1,
                        attempts: 1,
                        downloaded_at: Utc::now(),
                    }),
                },
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }
}
