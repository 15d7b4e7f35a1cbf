//! Record helpers
//!
//! A record is an arbitrary JSON object stored in a named collection. Every
//! record carries an `id`; ids minted locally before the remote service has
//! confirmed a record are *temporary* and start with [`TEMP_ID_PREFIX`].

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A document stored in the local store
pub type Record = Map<String, Value>;

/// Prefix of locally minted identifiers
pub const TEMP_ID_PREFIX: &str = "temp_";

/// When the record was last written to the local cache
pub const FIELD_CACHED_AT: &str = "_cachedAt";
/// Set on records that only exist locally
pub const FIELD_IS_TEMP: &str = "_isTemp";
/// Set on records with unconfirmed local changes
pub const FIELD_PENDING_SYNC: &str = "_pendingSync";

/// Fields that never leave the device
pub const LOCAL_ONLY_FIELDS: &[&str] = &["id", FIELD_CACHED_AT, FIELD_IS_TEMP, FIELD_PENDING_SYNC];

/// Mint a temporary id from the current time and a random suffix
pub fn temp_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}_{}", TEMP_ID_PREFIX, millis, &random[..9])
}

/// Whether an id was minted locally
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// The record's id, if it has a string or numeric one
pub fn record_id(record: &Record) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert an arbitrary JSON value into a record
pub fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Copy of `record` without device-only bookkeeping
pub fn strip_local_fields(record: &Record) -> Record {
    record
        .iter()
        .filter(|(key, _)| !LOCAL_ONLY_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Shallow-merge `changes` into `base`
pub fn merge(base: &mut Record, changes: &Record) {
    for (key, value) in changes {
        base.insert(key.clone(), value.clone());
    }
}

/// Stamp the cache time on a record
pub fn touch(record: &mut Record) {
    record.insert(
        FIELD_CACHED_AT.to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
}

/// Replace every string equal to `from` with `to`, recursively.
///
/// Returns whether anything changed.
pub fn replace_string_values(value: &mut Value, from: &str, to: &str) -> bool {
    match value {
        Value::String(s) if s == from => {
            *s = to.to_string();
            true
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| replace_string_values(item, from, to) | changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, item| replace_string_values(item, from, to) | changed),
        _ => false,
    }
}

/// First temporary id referenced anywhere inside `value`
pub fn find_temp_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if is_temp_id(s) => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(find_temp_id),
        Value::Object(map) => map.values().find_map(find_temp_id),
        _ => None,
    }
}

/// First temporary id a record's fields point at
pub fn temp_reference(record: &Record) -> Option<&str> {
    record.values().find_map(find_temp_id)
}

/// Sort specification in the remote service's notation.
///
/// `"created_date"` sorts ascending, `"-created_date"` descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let (field, descending) = match spec.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (spec.strip_prefix('+').unwrap_or(spec), false),
        };
        if field.is_empty() {
            return None;
        }
        Some(Self {
            field: field.to_string(),
            descending,
        })
    }

    /// Render back into the remote notation
    pub fn to_param(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }

    /// Sort records in place; records missing the field sort last
    pub fn apply(&self, records: &mut [Record]) {
        records.sort_by(|a, b| {
            let ordering = match (a.get(&self.field), b.get(&self.field)) {
                (Some(x), Some(y)) => compare_values(x, y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Sort then truncate, the way callers ask for "latest N"
pub fn sort_and_limit(records: &mut Vec<Record>, sort: Option<&SortSpec>, limit: Option<usize>) {
    if let Some(sort) = sort {
        sort.apply(records);
    }
    if let Some(limit) = limit {
        records.truncate(limit);
    }
}
