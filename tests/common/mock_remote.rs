//! Scripted remote service
//!
//! An in-process [`RemoteService`] whose availability can be switched at
//! runtime. Created records get `srv_<n>` ids and every call is logged so
//! tests can assert what reached the remote side.

use async_trait::async_trait;
use companion_offline::local_db::{record, Record, SortSpec};
use companion_offline::remote::RemoteService;
use companion_offline::{OfflineError, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How the mock answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    Online,
    /// Every call fails as unreachable
    Unreachable,
    /// Every call is refused with the given status
    Rejecting(u16),
}

#[derive(Debug)]
pub struct MockRemote {
    mode: Mutex<RemoteMode>,
    /// Calls still to fail as unreachable before answering normally
    failures_left: Mutex<u32>,
    /// Calls starting with a prefix still to fail as unreachable
    targeted_failures: Mutex<Vec<(String, u32)>>,
    /// Answer creates without the assigned id
    omit_ids: Mutex<bool>,
    entities: Mutex<BTreeMap<String, Vec<Record>>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
    chat_reply: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(RemoteMode::Online),
            failures_left: Mutex::new(0),
            targeted_failures: Mutex::new(Vec::new()),
            omit_ids: Mutex::new(false),
            entities: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            chat_reply: Mutex::new(None),
            latency: Mutex::new(None),
        }
    }

    pub fn set_mode(&self, mode: RemoteMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Fail the next `n` calls as unreachable
    pub fn fail_next(&self, n: u32) {
        *self.failures_left.lock().unwrap() = n;
    }

    /// Fail the next `n` calls whose log line starts with `prefix`
    pub fn fail_matching(&self, prefix: &str, n: u32) {
        self.targeted_failures.lock().unwrap().push((prefix.to_string(), n));
    }

    /// Store created records as usual but leave the id out of the reply
    pub fn set_omit_ids(&self, omit: bool) {
        *self.omit_ids.lock().unwrap() = omit;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn set_chat_reply(&self, reply: impl Into<String>) {
        *self.chat_reply.lock().unwrap() = Some(reply.into());
    }

    /// Seed records returned by `list` and `get`
    pub fn seed(&self, entity: &str, records: Vec<Value>) {
        let records = records.into_iter().filter_map(record::into_record).collect();
        self.entities.lock().unwrap().insert(entity.to_string(), records);
    }

    pub fn records(&self, entity: &str) -> Vec<Record> {
        self.entities.lock().unwrap().get(entity).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose log line starts with `prefix`, e.g. `"create Message"`
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.starts_with(prefix)).count()
    }

    async fn begin(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call.clone());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let targeted = self
            .targeted_failures
            .lock()
            .unwrap()
            .iter_mut()
            .find(|(prefix, left)| *left > 0 && call.starts_with(prefix.as_str()))
            .map(|(_, left)| *left -= 1)
            .is_some();
        if targeted {
            return Err(OfflineError::unreachable("scripted failure"));
        }

        let mut failures = self.failures_left.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(OfflineError::unreachable("scripted failure"));
        }

        match *self.mode.lock().unwrap() {
            RemoteMode::Online => Ok(()),
            RemoteMode::Unreachable => Err(OfflineError::unreachable("connection refused")),
            RemoteMode::Rejecting(status) => Err(OfflineError::rejected(status, "request refused")),
        }
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn list(&self, entity: &str, sort: Option<&SortSpec>, limit: Option<usize>) -> Result<Vec<Record>> {
        self.begin(format!("list {}", entity)).await?;
        let mut records = self.records(entity);
        record::sort_and_limit(&mut records, sort, limit);
        Ok(records)
    }

    async fn get(&self, entity: &str, id: &str) -> Result<Record> {
        self.begin(format!("get {} {}", entity, id)).await?;
        self.records(entity)
            .into_iter()
            .find(|r| record::record_id(r).as_deref() == Some(id))
            .ok_or_else(|| OfflineError::rejected(404, format!("{} {} not found", entity, id)))
    }

    async fn create(&self, entity: &str, data: &Record) -> Result<Record> {
        self.begin(format!("create {}", entity)).await?;
        let mut created = data.clone();
        let id = format!("srv_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        created.insert("id".into(), Value::String(id));
        self.entities
            .lock()
            .unwrap()
            .entry(entity.to_string())
            .or_default()
            .push(created.clone());
        if *self.omit_ids.lock().unwrap() {
            created.remove("id");
        }
        Ok(created)
    }

    async fn update(&self, entity: &str, id: &str, data: &Record) -> Result<Record> {
        self.begin(format!("update {} {}", entity, id)).await?;
        let mut entities = self.entities.lock().unwrap();
        let records = entities.entry(entity.to_string()).or_default();
        match records.iter_mut().find(|r| record::record_id(r).as_deref() == Some(id)) {
            Some(existing) => {
                record::merge(existing, data);
                Ok(existing.clone())
            }
            None => Err(OfflineError::rejected(404, format!("{} {} not found", entity, id))),
        }
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<()> {
        self.begin(format!("delete {} {}", entity, id)).await?;
        if let Some(records) = self.entities.lock().unwrap().get_mut(entity) {
            records.retain(|r| record::record_id(r).as_deref() != Some(id));
        }
        Ok(())
    }

    async fn invoke(&self, function: &str, params: &Value) -> Result<Value> {
        self.begin(format!("invoke {}", function)).await?;
        let reply = self
            .chat_reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("You said: {}", params["message"].as_str().unwrap_or_default()));
        Ok(json!({ "response": reply }))
    }

    async fn upload_file(&self, name: &str, _bytes: Vec<u8>) -> Result<String> {
        self.begin(format!("upload {}", name)).await?;
        Ok(format!("https://files.example.com/{}", name))
    }
}
