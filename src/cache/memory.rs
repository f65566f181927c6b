//! In-process key-value store
//!
//! Same contract as the file store, but nothing survives the process. Expiry is
//! measured on the tokio clock so tests can move time forward.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::store::{CacheError, KvStore};

#[derive(Debug, Default)]
struct Entries {
    values: HashMap<String, (String, Instant)>,
    sets: HashMap<String, HashMap<String, Instant>>,
}

/// A `KvStore` kept in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A panic while holding the lock cannot leave the maps half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock();
        let now = Instant::now();

        match entries.values.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.lock()
            .values
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.lock();
        entries.values.remove(key);
        entries.sets.remove(key);
        Ok(())
    }

    async fn add_to_set(
        &self,
        set_key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.lock()
            .sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string(), expires_at);
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, CacheError> {
        let mut entries = self.lock();
        let now = Instant::now();

        let Some(members) = entries.sets.get_mut(set_key) else {
            return Ok(HashSet::new());
        };
        members.retain(|_, expires_at| *expires_at > now);

        Ok(members.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Duration::from_secs(60))
            .await
            .expect("set should succeed");

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_drops_value() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        store.remove("k").await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_members_expire_individually() {
        let store = MemoryStore::new();
        store
            .add_to_set("s", "OLD", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        store
            .add_to_set("s", "NEW", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let members = store.set_members("s").await.unwrap();
        assert!(!members.contains("OLD"));
        assert!(members.contains("NEW"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readding_member_refreshes_ttl() {
        let store = MemoryStore::new();
        store.add_to_set("s", "X", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store.add_to_set("s", "X", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(store.set_members("s").await.unwrap().contains("X"));
    }

    #[tokio::test]
    async fn test_missing_set_is_empty() {
        let store = MemoryStore::new();
        assert!(store.set_members("nothing").await.unwrap().is_empty());
    }
}
