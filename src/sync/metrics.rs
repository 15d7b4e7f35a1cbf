//! # Sync Metrics
//!
//! Counters and timings for sync passes.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub average_sync_duration: Duration,
    pub total_operations_synced: u64,
    pub last_sync_duration: Option<Duration>,
    pub last_sync_start: Option<Instant>,
}

/// Serializable view for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub total_operations_synced: u64,
    pub average_sync_ms: u128,
    pub success_rate: f64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sync_start(&mut self) {
        self.last_sync_start = Some(Instant::now());
        self.total_syncs += 1;
    }

    /// A pass that ran without attempt failures
    pub fn record_sync_success(&mut self, operations_synced: u64) {
        if let Some(start) = self.last_sync_start.take() {
            let duration = start.elapsed();
            self.last_sync_duration = Some(duration);
            self.successful_syncs += 1;
            self.total_operations_synced += operations_synced;

            // Rolling average over successful passes
            let total_duration =
                self.average_sync_duration * (self.successful_syncs - 1) as u32 + duration;
            self.average_sync_duration = total_duration / self.successful_syncs as u32;
        }
    }

    /// A pass with at least one failed attempt; applied operations still count
    pub fn record_sync_failure(&mut self, operations_synced: u64) {
        if let Some(start) = self.last_sync_start.take() {
            self.last_sync_duration = Some(start.elapsed());
        }
        self.failed_syncs += 1;
        self.total_operations_synced += operations_synced;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            0.0
        } else {
            self.successful_syncs as f64 / self.total_syncs as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_syncs: self.total_syncs,
            successful_syncs: self.successful_syncs,
            failed_syncs: self.failed_syncs,
            total_operations_synced: self.total_operations_synced,
            average_sync_ms: self.average_sync_duration.as_millis(),
            success_rate: self.success_rate(),
        }
    }
}
