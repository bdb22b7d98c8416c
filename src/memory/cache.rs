//! Best-effort cache with TTL semantics.
//!
//! The cache accelerates session-context lookups; it is never load-bearing.
//! Failures degrade to a miss and must not fail a task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::errors::HivemindError;

/// Key-value cache with TTL, consumed by the core through this trait.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, HivemindError>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), HivemindError>;
    async fn delete(&self, key: &str) -> Result<bool, HivemindError>;
}

/// Recent exchanges kept in a session's context.
const CONTEXT_WINDOW: usize = 10;

/// Session-context helpers over any [`Cache`].
pub struct SessionCache {
    cache: Arc<dyn Cache>,
    session_ttl: Duration,
}

impl SessionCache {
    pub fn new(cache: Arc<dyn Cache>, session_ttl: Duration) -> Self {
        Self { cache, session_ttl }
    }

    fn context_key(session_id: &str) -> String {
        format!("session:{session_id}:context")
    }

    /// Fetch a session's context; a cache failure degrades to `None`.
    pub async fn get_context(&self, session_id: &str) -> Option<Value> {
        match self.cache.get(&Self::context_key(session_id)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "cache read failed, degrading");
                None
            }
        }
    }

    /// Store a session's context under the session TTL. Failures are
    /// logged, never propagated.
    pub async fn put_context(&self, session_id: &str, context: Value) {
        if let Err(e) = self
            .cache
            .set(
                &Self::context_key(session_id),
                context,
                Some(self.session_ttl),
            )
            .await
        {
            tracing::warn!(session_id, error = %e, "cache write failed, degrading");
        }
    }

    /// Append one prompt/response exchange to the session context, keeping
    /// the most recent [`CONTEXT_WINDOW`] entries. Best-effort.
    pub async fn append_exchange(&self, session_id: &str, prompt: &str, response: &str) {
        let mut context = match self.get_context(session_id).await {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({"messages": []}),
        };

        let messages = match context.get_mut("messages").and_then(Value::as_array_mut) {
            Some(messages) => messages,
            None => {
                context["messages"] = json!([]);
                context["messages"].as_array_mut().expect("just set")
            }
        };
        messages.push(json!({"prompt": prompt, "response": response}));
        if messages.len() > CONTEXT_WINDOW {
            let excess = messages.len() - CONTEXT_WINDOW;
            messages.drain(..excess);
        }

        self.put_context(session_id, context).await;
    }
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-memory TTL cache for development and tests.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, HivemindError> {
        let now = Utc::now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), HivemindError> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl)
        });
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, HivemindError> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", json!({"a": 1}), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = InMemoryCache::new();
        cache
            .set("k", json!("v"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_context_round_trip() {
        let session_cache =
            SessionCache::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));
        session_cache
            .put_context("s1", json!({"messages": ["hi"]}))
            .await;
        assert_eq!(
            session_cache.get_context("s1").await,
            Some(json!({"messages": ["hi"]}))
        );
        assert_eq!(session_cache.get_context("other").await, None);
    }

    #[tokio::test]
    async fn test_append_exchange_bounds_the_window() {
        let session_cache =
            SessionCache::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));

        for i in 0..12 {
            session_cache
                .append_exchange("s1", &format!("prompt {i}"), &format!("response {i}"))
                .await;
        }

        let context = session_cache.get_context("s1").await.unwrap();
        let messages = context["messages"].as_array().unwrap();
        assert_eq!(messages.len(), CONTEXT_WINDOW);
        // The oldest entries rolled off.
        assert_eq!(messages[0]["prompt"], "prompt 2");
        assert_eq!(messages[9]["response"], "response 11");
    }

    struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, HivemindError> {
            Err(HivemindError::Cache("connection refused".into()))
        }
        async fn set(
            &self,
            _key: &str,
            _value: Value,
            _ttl: Option<Duration>,
        ) -> Result<(), HivemindError> {
            Err(HivemindError::Cache("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, HivemindError> {
            Err(HivemindError::Cache("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_without_error() {
        let session_cache = SessionCache::new(Arc::new(FailingCache), Duration::from_secs(60));
        // Neither call panics or propagates; reads degrade to a miss.
        session_cache.put_context("s1", json!({})).await;
        session_cache.append_exchange("s1", "p", "r").await;
        assert_eq!(session_cache.get_context("s1").await, None);
    }
}
