//! # Sync Scheduler
//!
//! Decides when the background service runs a pass on its own: on every
//! transition to online, and optionally on a fixed interval while online.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Why a pass was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity was restored
    BecameOnline,
    /// The periodic interval elapsed
    Interval,
    /// The user asked for it
    Manual,
}

#[derive(Debug)]
pub struct SyncScheduler {
    /// Periodic interval, `None` for connectivity-only triggering
    interval: Option<Duration>,
    last_sync: RwLock<Instant>,
}

impl SyncScheduler {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|d| !d.is_zero()),
            last_sync: RwLock::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Record that a pass ran
    pub async fn record_sync(&self) {
        *self.last_sync.write().await = Instant::now();
    }

    /// Whether the periodic interval has elapsed
    pub async fn should_sync(&self) -> bool {
        match self.interval {
            Some(interval) => self.last_sync.read().await.elapsed() >= interval,
            None => false,
        }
    }

    /// Time until the next periodic pass, `None` without an interval
    pub async fn time_until_next_sync(&self) -> Option<Duration> {
        let interval = self.interval?;
        let elapsed = self.last_sync.read().await.elapsed();
        Some(interval.saturating_sub(elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_interval() {
        let scheduler = SyncScheduler::new(None);
        assert!(!scheduler.should_sync().await);
        assert_eq!(scheduler.time_until_next_sync().await, None);
    }

    #[tokio::test]
    async fn test_zero_interval_disables_periodic_sync() {
        let scheduler = SyncScheduler::new(Some(Duration::ZERO));
        assert_eq!(scheduler.interval(), None);
    }

    #[tokio::test]
    async fn test_interval_elapses() {
        let scheduler = SyncScheduler::new(Some(Duration::from_millis(20)));
        assert!(!scheduler.should_sync().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.should_sync().await);
        assert_eq!(scheduler.time_until_next_sync().await, Some(Duration::ZERO));

        scheduler.record_sync().await;
        assert!(!scheduler.should_sync().await);
    }
}
