//! Companion Offline - Offline-First Data Layer
//!
//! Keeps a companion application usable without a network connection. Every
//! read and write goes through a local store first; writes made while the
//! remote service is unreachable are queued and replayed later, in order.
//!
//! # Module Structure
//!
//! - **`local_db`** - Local Store
//!   - Named collections of JSON records plus binary blobs
//!   - SQLite backend for persistence, in-memory backend for tests
//!   - Per-operation timeouts and per-collection write serialization
//!
//! - **`offline`** - Operation Queue and Entity Gateway
//!   - FIFO queue of pending create/update/delete operations
//!   - Entity CRUD with local-first fallbacks and temporary ids
//!
//! - **`responses`** - Response Cache
//!   - Answers from the remote chat function, a local cache, keyword
//!     categories, or a default reassurance
//!
//! - **`downloads`** - Media Download Manager
//!   - Retried media downloads, full library downloads with progress,
//!     verification
//!
//! - **`sync`** - Sync Reconciler
//!   - Queue replay when connectivity returns, temp id resolution,
//!     persisted sync metadata, background triggers
//!
//! - **`remote`** - Remote service interface and its HTTP implementation
//!
//! - **`shared`** - Configuration, errors, listener registry
//!
//! # Usage
//!
//! ```rust,no_run
//! use companion_offline::{remote::HttpRemoteService, shared::OfflineConfig, OfflineContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> companion_offline::Result<()> {
//! let config = OfflineConfig::from_env()?;
//! let remote = Arc::new(HttpRemoteService::new(&config)?);
//! let mut context = OfflineContext::new(config, remote)?;
//! context.init().await?;
//!
//! let answer = context.responses().respond("I'm scared").await?;
//! println!("{}", answer.text);
//!
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result`] with [`OfflineError`].
//! Reads fall back to cached data when the remote side fails. Only a store
//! that cannot be opened at all ([`OfflineError::StorageUnavailable`])
//! surfaces to callers that would otherwise recover.

/// Media and library downloads
pub mod downloads;

/// Local persistent store
pub mod local_db;

/// Operation queue and entity gateway
pub mod offline;

/// Remote service interface
pub mod remote;

/// Companion answers available offline
pub mod responses;

/// Shared types
pub mod shared;

/// Queue replay and background sync
pub mod sync;

pub use shared::error::{OfflineError, Result};

use downloads::MediaDownloadManager;
use local_db::LocalStore;
use offline::{EntityGateway, OperationQueue, RetryPolicy};
use remote::RemoteService;
use responses::ResponseCache;
use shared::config::OfflineConfig;
use std::sync::Arc;
use sync::{NetworkMonitor, SyncMetadataStore, SyncReconciler, SyncService};

/// Install a `tracing` subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when it is unset. Does nothing if a subscriber is already installed.
pub fn init_tracing(default_filter: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .try_init();
}

/// Every component of the offline layer, wired to one store, one queue and
/// one connectivity signal
#[derive(Debug)]
pub struct OfflineContext {
    config: OfflineConfig,
    store: Arc<LocalStore>,
    queue: Arc<OperationQueue>,
    network: NetworkMonitor,
    gateway: EntityGateway,
    responses: ResponseCache,
    downloads: Arc<MediaDownloadManager>,
    sync: SyncService,
}

impl OfflineContext {
    pub fn new(config: OfflineConfig, remote: Arc<dyn RemoteService>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LocalStore::from_config(&config));
        Self::with_store(config, store, remote)
    }

    /// Build the context around an existing store
    pub fn with_store(config: OfflineConfig, store: Arc<LocalStore>, remote: Arc<dyn RemoteService>) -> Result<Self> {
        let network = NetworkMonitor::default();
        let queue = Arc::new(OperationQueue::new(Arc::clone(&store)));
        let gateway = EntityGateway::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&remote),
            network.clone(),
        );
        let responses = ResponseCache::new(Arc::clone(&store), Arc::clone(&remote), network.clone());
        let downloads = Arc::new(MediaDownloadManager::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            network.clone(),
            responses.clone(),
            &config,
        )?);
        let metadata = Arc::new(SyncMetadataStore::new(Arc::clone(&store), config.auto_sync));
        let reconciler = Arc::new(SyncReconciler::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            remote,
            network.clone(),
            metadata,
            RetryPolicy::new(config.max_sync_attempts, Default::default()),
        ));
        let sync = SyncService::new(reconciler, network.clone(), config.sync_interval);

        Ok(Self {
            config,
            store,
            queue,
            network,
            gateway,
            responses,
            downloads,
            sync,
        })
    }

    /// Open the store and start background sync.
    ///
    /// The background loop always runs; each automatic trigger checks the
    /// auto-sync flag, so switching it on later applies from the next trigger.
    pub async fn init(&mut self) -> Result<()> {
        self.store.open().await?;
        let auto_sync = self.sync.reconciler().metadata().is_auto_sync_enabled().await?;
        if !self.sync.is_running() {
            self.sync.start()?;
        }
        tracing::info!(auto_sync, database = %self.config.database_path.display(), "offline layer ready");
        Ok(())
    }

    /// Stop background sync and close the store
    pub async fn shutdown(&mut self) {
        self.sync.stop().await;
        self.store.close().await;
        tracing::info!("offline layer shut down");
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn gateway(&self) -> &EntityGateway {
        &self.gateway
    }

    pub fn responses(&self) -> &ResponseCache {
        &self.responses
    }

    pub fn downloads(&self) -> &Arc<MediaDownloadManager> {
        &self.downloads
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncService {
        &mut self.sync
    }
}
