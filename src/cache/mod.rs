//! Side cache: a key → field-map store with per-key TTL.
//!
//! The cache is advisory. Callers treat every error as "entry absent".

pub mod worker;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::CacheError;

pub use worker::{CacheJob, CacheStats, CacheWorker};

pub type Fields = HashMap<String, String>;

#[async_trait]
pub trait SideCache: Send + Sync + 'static {
    async fn get_hash(&self, key: &str) -> Result<Option<Fields>, CacheError>;

    async fn set_hash(&self, key: &str, fields: Fields, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete many keys in one round trip.
    async fn delete_pipelined(&self, keys: &[String]) -> Result<(), CacheError>;
}

struct Entry {
    fields: Fields,
    expires_at: Instant,
}

/// In-process cache. Expiry follows the tokio clock so it can be driven by
/// a paused runtime.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SideCache for MemoryCache {
    async fn get_hash(&self, key: &str) -> Result<Option<Fields>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.fields.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_hash(&self, key: &str, fields: Fields, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            fields,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn delete_pipelined(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_hash("device:abc", fields(&[("model", "\"pixel\"")]), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get_hash("device:abc").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get_hash("device:abc").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn pipelined_delete_removes_every_key() {
        let cache = MemoryCache::new();
        for key in ["a", "b", "c"] {
            cache
                .set_hash(key, Fields::new(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        cache
            .delete_pipelined(&["a".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(!cache.contains("c"));
    }
}
