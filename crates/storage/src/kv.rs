//! Expiring key-value storage
//!
//! Session state and rate-limit windows both live behind `TtlStore`.
//! The in-memory implementation evicts lazily on access; single
//! operations are atomic under one lock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::PersistenceError;

/// Key-value store with per-key time-to-live
#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), PersistenceError>;

    async fn delete(&self, key: &str) -> Result<bool, PersistenceError>;

    /// Reset the TTL of an existing key. Returns false when the key is
    /// missing or already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PersistenceError>;

    /// Atomically increment a counter, creating it with `window` TTL on
    /// first touch. The TTL is NOT refreshed on later increments, which
    /// is exactly the fixed-window behavior rate limiting needs.
    async fn incr_with_window(&self, key: &str, window: Duration)
        -> Result<u64, PersistenceError>;

    async fn health_check(&self) -> bool;
}

struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// In-process `TtlStore`
#[derive(Default)]
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), PersistenceError> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PersistenceError> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.expired() => {
                entry.deadline = Instant::now() + ttl;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn incr_with_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<u64, PersistenceError> {
        let mut entries = self.entries.lock();
        let count = match entries.get(key) {
            Some(entry) if !entry.expired() => entry
                .value
                .parse::<u64>()
                .map_err(|e| PersistenceError::InvalidData(e.to_string()))?
                .saturating_add(1),
            _ => 1,
        };
        let deadline = match entries.get(key) {
            Some(entry) if !entry.expired() => entry.deadline,
            _ => Instant::now() + window,
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                deadline,
            },
        );
        Ok(count)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryTtlStore::new();
        store
            .set("k1", "v1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k1").await.unwrap().as_deref(), Some("v1"));
        assert!(store.delete("k1").await.unwrap());
        assert_eq!(store.get("k1").await.unwrap(), None);
        assert!(!store.delete("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expiry() {
        let store = InMemoryTtlStore::new();
        store
            .set("k1", "v1", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_refreshes_ttl() {
        let store = InMemoryTtlStore::new();
        store
            .set("k1", "v1", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store.expire("k1", Duration::from_secs(60)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k1").await.unwrap().as_deref(), Some("v1"));
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_counts_within_window() {
        let store = InMemoryTtlStore::new();
        for expected in 1..=5u64 {
            let count = store
                .incr_with_window("rl:t1", Duration::from_secs(60))
                .await
                .unwrap();
            assert_eq!(count, expected);
        }
    }

    #[tokio::test]
    async fn test_incr_resets_after_window() {
        let store = InMemoryTtlStore::new();
        let window = Duration::from_millis(30);
        assert_eq!(store.incr_with_window("rl:t1", window).await.unwrap(), 1);
        assert_eq!(store.incr_with_window("rl:t1", window).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Window elapsed, counter starts over
        assert_eq!(store.incr_with_window("rl:t1", window).await.unwrap(), 1);
    }
}
