//! # Network Monitor
//!
//! Connectivity signal consumed by the offline layer. The platform (or a
//! test) reports reachability with [`NetworkMonitor::set_online`]; the
//! gateway, response cache and downloads read it, and the sync scheduler
//! subscribes to its transitions.
//!
//! ## Features
//!
//! - **Connectivity Detection**: current online/offline status
//! - **Real-time Updates**: `watch`-based subscription to transitions
//! - **Cheap Clones**: every clone observes the same signal

use futures_util::Stream;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    sender: Arc<watch::Sender<NetworkStatus>>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::Online)
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::Offline)
    }

    pub fn status(&self) -> NetworkStatus {
        *self.sender.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Report a new status. Returns whether it differed from the current one.
    pub fn set_status(&self, status: NetworkStatus) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(?status, "network status changed");
        }
        changed
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.set_status(if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        })
    }

    /// Receiver notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.sender.subscribe()
    }

    /// Stream of future transitions. Dropping the stream unsubscribes.
    pub fn changes(&self) -> impl Stream<Item = NetworkStatus> + Send + 'static {
        futures_util::stream::unfold(self.subscribe(), |mut receiver| async move {
            receiver.changed().await.ok()?;
            let status = *receiver.borrow_and_update();
            Some((status, receiver))
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::online()
    }
}
