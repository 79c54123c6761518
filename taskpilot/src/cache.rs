//! Deterministic memoization for tool results and reasoning outputs.
//!
//! Keys are SHA-256 fingerprints over canonical (sorted-key) JSON. Entries
//! expire after a TTL and the oldest 20% are evicted when the cache grows
//! past its capacity. Only `read_only` tools and reasoning outputs are
//! eligible: results of `writable` or `destructive` tools must never be
//! replayed from the cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::llm::Message;
use crate::tool::ToolCapability;

/// Context keys excluded from fingerprints because they change per call.
const VOLATILE_CONTEXT_KEYS: &[&str] = &["execution_id", "timestamp"];

/// Fraction of entries dropped when the cache overflows.
const EVICT_FRACTION: f64 = 0.2;

/// A cached value with its insertion time.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// Keyed memoization store for one agent.
///
/// The cache is owned by a single engine and never shared between agents.
#[derive(Debug)]
pub struct ExecutionCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
}

impl ExecutionCache {
    /// Create a cache with the given capacity and TTL.
    ///
    /// A non-positive capacity disables size-based eviction; a non-positive
    /// TTL expires everything immediately (the cache is effectively off).
    #[must_use]
    pub fn new(max_size: i64, ttl_seconds: i64) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: usize::try_from(max_size.max(0)).unwrap_or(0),
            ttl: Duration::from_secs(u64::try_from(ttl_seconds.max(0)).unwrap_or(0)),
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch a cached value if it is still within its TTL.
    ///
    /// Expired entries are deleted on read.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            self.entries.remove(key);
            return None;
        }
        debug!(key, "execution cache hit");
        Some(self.entries[key].value.clone())
    }

    /// Insert a successful result.
    ///
    /// Callers must only insert outcomes that succeeded; failures are never
    /// memoized. Overflow evicts at least `ceil(0.2 * size)` oldest entries.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );

        if self.max_size > 0 && self.entries.len() > self.max_size {
            self.evict_oldest();
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_oldest(&mut self) {
        let remove_count = ((self.entries.len() as f64 * EVICT_FRACTION).ceil() as usize).max(1);
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.inserted_at))
            .collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
        for (key, _) in by_age.into_iter().take(remove_count) {
            self.entries.remove(&key);
        }
        debug!(removed = remove_count, size = self.entries.len(), "evicted oldest cache entries");
    }
}

/// Whether results from a tool with these capabilities may be cached.
///
/// `writable` and `destructive` tools bypass the cache unconditionally;
/// everything else requires an explicit `read_only` declaration.
#[must_use]
pub fn is_cacheable(capabilities: &[ToolCapability]) -> bool {
    if capabilities
        .iter()
        .any(|c| matches!(c, ToolCapability::Writable | ToolCapability::Destructive))
    {
        return false;
    }
    capabilities.contains(&ToolCapability::ReadOnly)
}

/// Fingerprint for a tool invocation.
///
/// Built from the tool name, the canonicalized arguments, and the execution
/// context with volatile keys (execution ids, timestamps) removed.
#[must_use]
pub fn tool_fingerprint(tool_name: &str, arguments: &Value, context: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"tool\0");
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json(arguments));
    hasher.update(b"\0");
    hasher.update(canonical_json(&filter_context(context)));
    format!("tool:{:x}", hasher.finalize())
}

/// Fingerprint for a reasoning (LLM) call.
///
/// Built from the full message sequence and the sampling temperature.
#[must_use]
pub fn reasoning_fingerprint(messages: &[Message], temperature: f32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"reasoning\0");
    for message in messages {
        let value = serde_json::to_value(message).unwrap_or(Value::Null);
        hasher.update(canonical_json(&value));
        hasher.update(b"\0");
    }
    hasher.update(temperature.to_le_bytes());
    format!("reasoning:{:x}", hasher.finalize())
}

/// Serialize a JSON value with recursively sorted object keys.
fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

fn filter_context(context: &Value) -> Value {
    match context {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !VOLATILE_CONTEXT_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn fingerprint_ignores_volatile_context() {
        let args = json!({"path": "a.txt"});
        let ctx1 = json!({"workspace": "/w", "execution_id": "one", "timestamp": 1.0});
        let ctx2 = json!({"workspace": "/w", "execution_id": "two", "timestamp": 2.0});
        assert_eq!(
            tool_fingerprint("read_file", &args, &ctx1),
            tool_fingerprint("read_file", &args, &ctx2)
        );
    }

    #[test]
    fn fingerprint_differs_on_arguments() {
        let ctx = json!({});
        assert_ne!(
            tool_fingerprint("read_file", &json!({"path": "a.txt"}), &ctx),
            tool_fingerprint("read_file", &json!({"path": "b.txt"}), &ctx)
        );
    }

    #[test]
    fn reasoning_fingerprint_varies_with_temperature() {
        let messages = vec![Message::user("think")];
        assert_ne!(
            reasoning_fingerprint(&messages, 0.2),
            reasoning_fingerprint(&messages, 0.7)
        );
    }

    #[test]
    fn get_respects_ttl() {
        let mut cache = ExecutionCache::new(10, 0);
        cache.insert("k", json!("v"));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn get_returns_live_entries() {
        let mut cache = ExecutionCache::new(10, 300);
        cache.insert("k", json!("v"));
        assert_eq!(cache.get("k"), Some(json!("v")));
    }

    #[test]
    fn overflow_evicts_at_least_twenty_percent() {
        let mut cache = ExecutionCache::new(10, 300);
        for i in 0..11 {
            cache.insert(format!("k{i}"), json!(i));
        }
        // 11 entries -> ceil(2.2) = 3 evicted.
        assert_eq!(cache.len(), 8);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k10").is_some());
    }

    #[test]
    fn capability_gate() {
        assert!(is_cacheable(&[ToolCapability::ReadOnly, ToolCapability::Fast]));
        assert!(!is_cacheable(&[ToolCapability::Writable]));
        assert!(!is_cacheable(&[
            ToolCapability::ReadOnly,
            ToolCapability::Destructive
        ]));
        assert!(!is_cacheable(&[ToolCapability::Network]));
    }
}
