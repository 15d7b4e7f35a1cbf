//! Post-download verification
//!
//! Compares what each offline-content collection actually holds against the
//! ids the download manager attempted to store in it. Mismatches are
//! reported, never rolled back.

use crate::shared::error::OfflineError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Ids attempted per collection since startup
#[derive(Debug, Default)]
pub(crate) struct AttemptLog {
    attempted: BTreeMap<String, BTreeSet<String>>,
}

impl AttemptLog {
    pub(crate) fn record(&mut self, collection: &str, id: impl Into<String>) {
        self.attempted
            .entry(collection.to_string())
            .or_default()
            .insert(id.into());
    }

    pub(crate) fn attempted(&self, collection: &str) -> Option<&BTreeSet<String>> {
        self.attempted.get(collection)
    }

    pub(crate) fn forget(&mut self, collection: &str, id: &str) {
        if let Some(ids) = self.attempted.get_mut(collection) {
            ids.remove(id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.attempted.clear();
    }
}

/// Verification of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionCheck {
    pub collection: String,
    /// Items attempted (or present, when nothing was attempted this run)
    pub expected: usize,
    /// Attempted items actually present
    pub found: usize,
    /// Records held in total
    pub records: usize,
    /// Estimated bytes, documents plus blobs
    pub bytes: u64,
}

impl CollectionCheck {
    pub fn is_complete(&self) -> bool {
        self.found >= self.expected
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub collections: Vec<CollectionCheck>,
    pub total_items: usize,
    pub total_bytes: u64,
}

impl VerificationReport {
    pub fn is_complete(&self) -> bool {
        self.collections.iter().all(CollectionCheck::is_complete)
    }

    /// One [`OfflineError::VerificationMismatch`] per incomplete collection
    pub fn mismatches(&self) -> Vec<OfflineError> {
        self.collections
            .iter()
            .filter(|check| !check.is_complete())
            .map(|check| OfflineError::VerificationMismatch {
                collection: check.collection.clone(),
                expected: check.expected,
                found: check.found,
            })
            .collect()
    }

    pub fn check(&self, collection: &str) -> Option<&CollectionCheck> {
        self.collections.iter().find(|c| c.collection == collection)
    }
}
