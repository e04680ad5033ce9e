//! In-memory lock store

use async_trait::async_trait;
use gpulock_core::GpulockResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::traits::LockStore;

/// A lock binding with its expiry
#[derive(Debug, Clone)]
struct Binding {
    value: String,
    expires_at: Instant,
}

impl Binding {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Lock store kept in process memory
///
/// Expiry follows the tokio clock, so paused-time tests can advance it.
pub struct MemoryStore {
    name: String,
    bindings: Mutex<HashMap<String, Binding>>,
    operations: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Mutex::new(HashMap::new()),
            operations: AtomicUsize::new(0),
        }
    }

    /// Number of set/delete calls served so far
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Value of the live binding for `key`, if any
    pub async fn holder(&self, key: &str) -> Option<String> {
        let bindings = self.bindings.lock().await;
        bindings
            .get(key)
            .filter(|b| b.is_live(Instant::now()))
            .map(|b| b.value.clone())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> GpulockResult<bool> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut bindings = self.bindings.lock().await;

        if bindings.get(key).is_some_and(|b| b.is_live(now)) {
            return Ok(false);
        }

        bindings.insert(
            key.to_string(),
            Binding {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );

        debug!(store = %self.name, key = %key, "Binding written");
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> GpulockResult<bool> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let mut bindings = self.bindings.lock().await;
        match bindings.get(key) {
            Some(b) if b.value == value => {
                bindings.remove(key);
                debug!(store = %self.name, key = %key, "Binding removed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryStore::new("mem");
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent("host:gpu0", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("host:gpu0", "b", ttl).await.unwrap());
        assert!(store.set_if_absent("host:gpu1", "b", ttl).await.unwrap());

        assert_eq!(store.holder("host:gpu0").await.as_deref(), Some("a"));
        assert_eq!(store.operations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_binding_is_replaced() {
        let store = MemoryStore::new("mem");
        let ttl = Duration::from_millis(500);

        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.holder("k").await, None);
        assert!(store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.holder("k").await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = MemoryStore::new("mem");
        let ttl = Duration::from_secs(10);

        store.set_if_absent("k", "a", ttl).await.unwrap();
        assert!(!store.delete_if_equals("k", "b").await.unwrap());
        assert_eq!(store.holder("k").await.as_deref(), Some("a"));

        assert!(store.delete_if_equals("k", "a").await.unwrap());
        assert_eq!(store.holder("k").await, None);
        assert!(!store.delete_if_equals("k", "a").await.unwrap());
    }
}
