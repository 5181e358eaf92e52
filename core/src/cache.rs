//! Bounded TTL cache over the repeated deserialization of stored JSON blob
//! fields. Purely a latency shortcut: every invariant holds with the cache
//! removed, since misses fall through to `serde_json`.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde_json::Value;

const DEFAULT_CAPACITY: u64 = 1000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct JsonFieldCache {
    inner: Cache<String, Arc<Value>>,
}

impl JsonFieldCache {
    pub fn new() -> Self {
        Self::with(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with(capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        Self { inner }
    }

    /// Parsed value of a blob field, keyed by `{kind}:{identifier}:{field}`.
    pub fn get_or_parse(
        &self,
        kind: &str,
        id: &str,
        field: &str,
        raw: &str,
    ) -> serde_json::Result<Arc<Value>> {
        let key = format!("{kind}:{id}:{field}");
        if let Some(value) = self.inner.get(&key) {
            return Ok(value);
        }
        let value = Arc::new(serde_json::from_str::<Value>(raw)?);
        self.inner.insert(key, value.clone());
        Ok(value)
    }

    /// Drop every cached field of the mutated resource.
    pub fn invalidate(&self, kind: &str, id: &str) {
        let prefix = format!("{kind}:{id}:");
        if let Err(err) = self
            .inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            tracing::warn!(%err, "cache invalidation predicate rejected");
        }
    }
}

impl Default for JsonFieldCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_returns_same_parse() {
        let cache = JsonFieldCache::new();
        let a = cache
            .get_or_parse("cluster", "prod", "settings", r#"[{"name":"containerInsights"}]"#)
            .unwrap();
        let b = cache
            .get_or_parse("cluster", "prod", "settings", r#"ignored-on-hit"#)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalidate_is_per_resource() {
        let cache = JsonFieldCache::new();
        cache
            .get_or_parse("cluster", "prod", "settings", r#"{"a":1}"#)
            .unwrap();
        cache
            .get_or_parse("cluster", "staging", "settings", r#"{"b":2}"#)
            .unwrap();
        cache.invalidate("cluster", "prod");
        // moka applies invalidation predicates lazily; reads observe them
        // immediately.
        let reparsed = cache
            .get_or_parse("cluster", "prod", "settings", r#"{"a":2}"#)
            .unwrap();
        assert_eq!(reparsed.as_ref(), &serde_json::json!({"a": 2}));
        let kept = cache
            .get_or_parse("cluster", "staging", "settings", r#"ignored-on-hit"#)
            .unwrap();
        assert_eq!(kept.as_ref(), &serde_json::json!({"b": 2}));
    }

    #[test]
    fn test_bad_json_is_an_error_not_a_panic() {
        let cache = JsonFieldCache::new();
        assert!(cache.get_or_parse("cluster", "x", "tags", "{oops").is_err());
    }
}
