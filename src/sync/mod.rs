//! # Background Sync Service
//!
//! Reconciles the operation queue with the remote service once connectivity
//! is available.
//!
//! ## Architecture
//!
//! - **Network Monitor**: connectivity signal and its transitions
//! - **Reconciler**: one FIFO replay of the queue per pass, mutually exclusive
//! - **Scheduler**: when the background task starts a pass on its own
//! - **Sync State**: the persisted sync metadata singleton
//! - **Metrics**: pass counts and timings
//!
//! ## Triggers
//!
//! A pass runs when the network becomes reachable, on the optional periodic
//! interval while online, and when the user asks for one
//! ([`SyncService::sync_now`]). The automatic triggers respect the
//! `auto_sync_enabled` flag in the sync metadata; the manual one does not.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use companion_offline::sync::SyncService;
//!
//! # async fn example(mut service: SyncService) -> companion_offline::Result<()> {
//! service.start()?;
//!
//! let summary = service.sync_now().await?;
//! println!("applied {} operation(s)", summary.processed);
//!
//! service.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod metrics;
pub mod network_monitor;
pub mod reconciler;
pub mod scheduler;
pub mod sync_state;

pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use network_monitor::{NetworkMonitor, NetworkStatus};
pub use reconciler::{SyncOutcome, SyncReconciler, SyncSummary};
pub use scheduler::{SyncScheduler, SyncTrigger};
pub use sync_state::{SyncMetadata, SyncMetadataStore, SyncStatus};

use crate::shared::error::{OfflineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns the background task that triggers sync passes
#[derive(Debug)]
pub struct SyncService {
    reconciler: Arc<SyncReconciler>,
    network: NetworkMonitor,
    scheduler: Arc<SyncScheduler>,
    /// Raised to end the loop between passes
    shutdown: watch::Sender<bool>,
    background_task: Option<JoinHandle<()>>,
}

impl SyncService {
    pub fn new(reconciler: Arc<SyncReconciler>, network: NetworkMonitor, interval: Option<Duration>) -> Self {
        Self {
            reconciler,
            network,
            scheduler: Arc::new(SyncScheduler::new(interval)),
            shutdown: watch::channel(false).0,
            background_task: None,
        }
    }

    /// Start the background trigger loop
    pub fn start(&mut self) -> Result<()> {
        if self.background_task.is_some() {
            return Err(OfflineError::config("Sync service is already running"));
        }

        let reconciler = Arc::clone(&self.reconciler);
        let scheduler = Arc::clone(&self.scheduler);
        let network = self.network.clone();
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            Self::background_sync_loop(reconciler, scheduler, network, shutdown).await;
        });

        self.background_task = Some(handle);
        tracing::info!(interval = ?self.scheduler.interval(), "sync service started");
        Ok(())
    }

    /// Stop the background trigger loop.
    ///
    /// A pass in flight runs to completion first, so no remote call is left
    /// without its queue bookkeeping.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.background_task.take() {
            self.shutdown.send_replace(true);
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sync task ended abnormally");
            }
            tracing::info!("sync service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.background_task.is_some()
    }

    /// User-initiated pass; ignores the auto-sync flag
    pub async fn sync_now(&self) -> Result<SyncSummary> {
        Self::trigger(&self.reconciler, &self.scheduler, SyncTrigger::Manual).await
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler> {
        &self.reconciler
    }

    async fn background_sync_loop(
        reconciler: Arc<SyncReconciler>,
        scheduler: Arc<SyncScheduler>,
        network: NetworkMonitor,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut status = network.subscribe();

        loop {
            let wait = scheduler.time_until_next_sync().await;
            let tick = async {
                match wait {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let trigger = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !status.borrow_and_update().is_online() {
                        continue;
                    }
                    SyncTrigger::BecameOnline
                }
                _ = tick => {
                    if !network.is_online() {
                        scheduler.record_sync().await;
                        continue;
                    }
                    SyncTrigger::Interval
                }
            };

            if let Err(e) = Self::trigger(&reconciler, &scheduler, trigger).await {
                tracing::error!(error = %e, ?trigger, "automatic sync failed");
            }
        }
    }

    async fn trigger(reconciler: &SyncReconciler, scheduler: &SyncScheduler, trigger: SyncTrigger) -> Result<SyncSummary> {
        if trigger != SyncTrigger::Manual && !reconciler.metadata().is_auto_sync_enabled().await? {
            tracing::debug!(?trigger, "auto-sync disabled, skipping");
            scheduler.record_sync().await;
            return Ok(SyncSummary::idle(SyncOutcome::Disabled));
        }

        tracing::debug!(?trigger, "starting sync pass");
        let summary = reconciler.run_sync().await;
        scheduler.record_sync().await;
        summary
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        // The detached task sees the signal once its current pass is done.
        if self.background_task.take().is_some() {
            self.shutdown.send_replace(true);
        }
    }
}
