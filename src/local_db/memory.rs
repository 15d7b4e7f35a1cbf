//! In-memory backend
//!
//! Insertion-ordered, non-durable. Used for ephemeral stores and tests.

use crate::local_db::backend::StoreBackend;
use crate::local_db::record::Record;
use crate::shared::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    next_seq: u64,
    // id -> (insertion sequence, document)
    records: HashMap<String, (u64, Record)>,
    blobs: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn put(&self, collection: &str, id: &str, record: &Record) -> Result<()> {
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        let seq = match entry.records.get(id) {
            Some((seq, _)) => *seq,
            None => {
                entry.next_seq += 1;
                entry.next_seq
            }
        };
        entry.records.insert(id.to_string(), (seq, record.clone()));
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.records.get(id))
            .map(|(_, record)| record.clone()))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let collections = self.collections.read().await;
        let Some(c) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<_> = c.records.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, record)| record.clone()).collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|c| c.records.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .remove(collection)
            .map(|c| c.records.len() as u64)
            .unwrap_or(0))
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        Ok(collections
            .iter()
            .filter(|(_, c)| !c.records.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn put_blob(&self, collection: &str, id: &str, bytes: &[u8]) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .blobs
            .insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get_blob(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.blobs.get(id).cloned()))
    }

    async fn delete_blob(&self, collection: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|c| c.blobs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn blob_bytes(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| c.blobs.values().map(|b| b.len() as u64).sum())
            .unwrap_or(0))
    }
}
