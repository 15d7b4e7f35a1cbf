//! Common test utilities and helpers
//!
//! - Scripted remote service
//! - A fully wired offline stack over an in-memory store
//! - Custom assertion macros

#![allow(dead_code)]

pub mod assertions;
pub mod mock_remote;

pub use mock_remote::{MockRemote, RemoteMode};

use companion_offline::local_db::{record, LocalStore, Record};
use companion_offline::offline::{BackoffStrategy, EntityGateway, OperationQueue, RetryPolicy};
use companion_offline::responses::ResponseCache;
use companion_offline::sync::{NetworkMonitor, SyncMetadataStore, SyncReconciler};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Every component a test needs, sharing one store and one network signal
pub struct TestStack {
    pub store: Arc<LocalStore>,
    pub queue: Arc<OperationQueue>,
    pub remote: Arc<MockRemote>,
    pub network: NetworkMonitor,
    pub gateway: EntityGateway,
    pub responses: ResponseCache,
    pub reconciler: Arc<SyncReconciler>,
}

impl TestStack {
    /// Online stack with a sync ceiling of three attempts
    pub fn new() -> Self {
        Self::with_max_attempts(3)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let store = Arc::new(LocalStore::in_memory());
        let queue = Arc::new(OperationQueue::new(Arc::clone(&store)));
        let remote = Arc::new(MockRemote::new());
        let network = NetworkMonitor::online();

        let gateway = EntityGateway::new(Arc::clone(&store), Arc::clone(&queue), remote.clone(), network.clone());
        let responses = ResponseCache::new(Arc::clone(&store), remote.clone(), network.clone());
        let metadata = Arc::new(SyncMetadataStore::new(Arc::clone(&store), true));
        let reconciler = Arc::new(SyncReconciler::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            remote.clone(),
            network.clone(),
            metadata,
            RetryPolicy::new(
                max_attempts,
                BackoffStrategy::Fixed {
                    interval: Duration::from_millis(1),
                },
            ),
        ));

        Self {
            store,
            queue,
            remote,
            network,
            gateway,
            responses,
            reconciler,
        }
    }

    /// Cut connectivity both in the monitor and at the remote
    pub fn go_offline(&self) {
        self.network.set_online(false);
        self.remote.set_mode(RemoteMode::Unreachable);
    }

    pub fn go_online(&self) {
        self.remote.set_mode(RemoteMode::Online);
        self.network.set_online(true);
    }
}

/// Build a record from a JSON object literal
pub fn rec(value: Value) -> Record {
    record::into_record(value).expect("JSON object")
}

pub fn id_of(record: &Record) -> String {
    record::record_id(record).expect("record has an id")
}
