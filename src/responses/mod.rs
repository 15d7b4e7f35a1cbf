//! # Response Cache
//!
//! Decides what the companion says when the remote AI service is not
//! available, and remembers remote answers so they are available later.
//!
//! ## Lookup order
//!
//! 1. Time questions ("what time is it") are answered from the clock at
//!    lookup time and never cached.
//! 2. Cached prompts: an exact match on the normalized prompt, else the
//!    longest cached prompt contained in the question or containing it.
//!    Expired entries are removed as they are encountered.
//! 3. The keyword table, first matching category in declaration order.
//! 4. A default reassurance.
//!
//! ## Key Components
//!
//! - `keywords.rs`: topic keyword table
//! - `bundle.rs`: answers shipped with the application

pub mod bundle;
pub mod keywords;

pub use bundle::{BundledResponse, BUNDLED_RESPONSES};
pub use keywords::{KeywordTable, ResponseCategory};

use crate::local_db::{schema, LocalStore};
use crate::remote::RemoteService;
use crate::shared::error::Result;
use crate::sync::NetworkMonitor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Answer used when nothing else matches
pub const DEFAULT_RESPONSE: &str =
    "I'm here with you. Everything is okay. Would you like to talk about something nice?";

/// Server function producing remote answers
const CHAT_FUNCTION: &str = "chat";

/// A stored prompt/answer pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    /// UUID v5 of the normalized prompt
    pub id: String,
    pub prompt: String,
    pub normalized_prompt: String,
    pub response: String,
    #[serde(default)]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Where an answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Remote,
    Cache,
    Keyword,
    Clock,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanionResponse {
    pub text: String,
    pub source: ResponseSource,
    pub category: Option<String>,
}

impl CompanionResponse {
    fn new(text: impl Into<String>, source: ResponseSource, category: Option<String>) -> Self {
        Self {
            text: text.into(),
            source,
            category,
        }
    }
}

/// Lowercase, unify apostrophes, drop punctuation and collapse whitespace
pub fn normalize_prompt(prompt: &str) -> String {
    let cleaned: String = prompt
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            c if c.is_alphanumeric() || c == '\'' => c,
            _ => ' ',
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockQuestion {
    Time,
    Date,
}

fn clock_question(normalized: &str) -> Option<ClockQuestion> {
    const TIME: &[&str] = &["what time", "what's the time", "what is the time"];
    const DATE: &[&str] = &[
        "what day",
        "what date",
        "what's the date",
        "what is the date",
        "what's today",
        "what is today",
        "what month",
        "what year",
    ];
    if TIME.iter().any(|q| normalized.contains(q)) {
        Some(ClockQuestion::Time)
    } else if DATE.iter().any(|q| normalized.contains(q)) {
        Some(ClockQuestion::Date)
    } else {
        None
    }
}

fn clock_answer(question: ClockQuestion) -> String {
    let now = chrono::Local::now();
    match question {
        ClockQuestion::Time => format!("It's {} right now.", now.format("%-I:%M %p")),
        ClockQuestion::Date => format!("Today is {}.", now.format("%A, %B %-d, %Y")),
    }
}

fn response_id(normalized: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized.as_bytes()).to_string()
}

/// Id of the cache entry a prompt is stored under
pub fn response_id_for(prompt: &str) -> String {
    response_id(&normalize_prompt(prompt))
}

/// Pull the answer text out of a `chat` function result
fn extract_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => ["response", "message", "text", "content"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    };
    text.filter(|text| !text.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteService>,
    network: NetworkMonitor,
    keywords: KeywordTable,
}

impl ResponseCache {
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteService>, network: NetworkMonitor) -> Self {
        Self {
            store,
            remote,
            network,
            keywords: KeywordTable::default(),
        }
    }

    /// Replace the keyword fallback table
    pub fn with_keywords(mut self, keywords: KeywordTable) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    /// Ask the remote when online, caching its answer; otherwise [`lookup`](Self::lookup)
    pub async fn respond(&self, prompt: &str) -> Result<CompanionResponse> {
        let normalized = normalize_prompt(prompt);
        if let Some(question) = clock_question(&normalized) {
            return Ok(CompanionResponse::new(clock_answer(question), ResponseSource::Clock, None));
        }

        if self.network.is_online() {
            let params = json!({ "message": prompt });
            match self.remote.invoke(CHAT_FUNCTION, &params).await {
                Ok(value) => match extract_text(&value) {
                    Some(text) => {
                        if let Err(e) = self.store(prompt, &text, None, None).await {
                            if e.is_fatal() {
                                return Err(e);
                            }
                            tracing::warn!(error = %e, "failed to cache remote response");
                        }
                        return Ok(CompanionResponse::new(text, ResponseSource::Remote, None));
                    }
                    None => tracing::warn!("chat function returned no text"),
                },
                Err(e) if e.is_remote_rejection() => {
                    tracing::warn!(error = %e, "chat request rejected, answering offline")
                }
                Err(e) => tracing::debug!(error = %e, "chat unavailable, answering offline"),
            }
        }

        self.lookup(prompt).await
    }

    /// Answer without the remote service
    pub async fn lookup(&self, prompt: &str) -> Result<CompanionResponse> {
        let normalized = normalize_prompt(prompt);
        if normalized.is_empty() {
            return Ok(CompanionResponse::new(DEFAULT_RESPONSE, ResponseSource::Default, None));
        }

        if let Some(question) = clock_question(&normalized) {
            return Ok(CompanionResponse::new(clock_answer(question), ResponseSource::Clock, None));
        }

        if let Some(cached) = self.find_cached(&normalized).await? {
            return Ok(CompanionResponse::new(cached.response, ResponseSource::Cache, cached.category));
        }

        if let Some(category) = self.keywords.find(&normalized) {
            if let Some(text) = category.response_for(&normalized) {
                return Ok(CompanionResponse::new(
                    text,
                    ResponseSource::Keyword,
                    Some(category.name.clone()),
                ));
            }
        }

        Ok(CompanionResponse::new(DEFAULT_RESPONSE, ResponseSource::Default, None))
    }

    /// Remember an answer. A `ttl` makes it expire; a zero `ttl` expires it
    /// immediately. Time questions are never cached and yield `None`.
    pub async fn store(
        &self,
        prompt: &str,
        response: &str,
        category: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<Option<CachedResponse>> {
        let normalized = normalize_prompt(prompt);
        if normalized.is_empty() || clock_question(&normalized).is_some() {
            return Ok(None);
        }

        let now = Utc::now();
        let expires_at = ttl.map(|ttl| {
            now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
        });
        let entry = CachedResponse {
            id: response_id(&normalized),
            prompt: prompt.to_string(),
            normalized_prompt: normalized,
            response: response.to_string(),
            category: category.map(str::to_string),
            created_at: now,
            expires_at,
        };
        self.store.put_typed(schema::AI_RESPONSES, &entry).await?;
        Ok(Some(entry))
    }

    /// Remove every expired entry
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for entry in self.entries().await? {
            if entry.is_expired(now) && self.store.delete(schema::AI_RESPONSES, &entry.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "purged expired responses");
        }
        Ok(removed)
    }

    /// Store the answers shipped with the application
    pub async fn seed_bundle(&self) -> Result<usize> {
        let mut stored = 0;
        for bundled in BUNDLED_RESPONSES {
            if self
                .store(bundled.prompt, bundled.response, Some(bundled.category), None)
                .await?
                .is_some()
            {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Cached entries, expired ones included
    pub async fn entries(&self) -> Result<Vec<CachedResponse>> {
        self.store.get_all_typed(schema::AI_RESPONSES).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.clear(schema::AI_RESPONSES).await
    }

    async fn find_cached(&self, normalized: &str) -> Result<Option<CachedResponse>> {
        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "response cache unreadable, using keyword fallback");
                return Ok(None);
            }
        };

        let now = Utc::now();
        let mut best: Option<CachedResponse> = None;
        for entry in entries {
            if entry.is_expired(now) {
                if let Err(e) = self.store.delete(schema::AI_RESPONSES, &entry.id).await {
                    tracing::debug!(error = %e, id = %entry.id, "failed to drop expired response");
                }
                continue;
            }
            if entry.normalized_prompt.is_empty() {
                continue;
            }
            if entry.normalized_prompt == normalized {
                return Ok(Some(entry));
            }
            let contained = normalized.contains(entry.normalized_prompt.as_str())
                || entry.normalized_prompt.contains(normalized);
            let longer = best
                .as_ref()
                .map_or(true, |b| entry.normalized_prompt.len() > b.normalized_prompt.len());
            if contained && longer {
                best = Some(entry);
            }
        }
        Ok(best)
    }
}
