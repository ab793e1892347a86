//! In-memory backend used by tests and dev mode

use crate::{BatchOp, KeyValueStore, Result, SetOptions};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, opts: SetOptions) -> Self {
        Self {
            value,
            expires_at: opts
                .ttl_seconds
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// Stub store backed by a shared hashmap.
///
/// Clones share the same map. Batches are applied under a single write lock,
/// which is stronger than what the trait promises.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of live keys, handy for asserting on store layout.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn remove_live(map: &mut HashMap<String, Entry>, key: &str, now: Instant) -> bool {
        match map.remove(key) {
            Some(entry) => entry.is_live(now),
            None => false,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), Entry::new(value.to_string(), opts));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(Self::remove_live(&mut self.entries.write(), key, now))
    }

    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>> {
        let now = Instant::now();
        let mut map = self.entries.write();
        let results = ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Set { key, value, opts } => {
                    map.insert(key, Entry::new(value, opts));
                    true
                }
                BatchOp::Del { key } => Self::remove_live(&mut map, &key, now),
            })
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_exists_del() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());

        store.set("k", "v", SetOptions::default()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store = MemoryStore::new();
        store.set("k", "v", SetOptions::with_ttl(0)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("shared", "1", SetOptions::default()).await.unwrap();
        assert_eq!(other.keys(), vec!["shared".to_string()]);
    }
}
