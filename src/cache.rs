use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;

/// One write inside a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Set {
        key: String,
        value: String,
    },
    SetWithTtl {
        key: String,
        value: String,
        ttl: Duration,
    },
}

/// A batch of writes submitted in one round trip. The store applies all of
/// them or reports failure.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn set(&mut self, key: &str, value: String) -> &mut Self {
        self.ops.push(PipelineOp::Set {
            key: key.to_owned(),
            value,
        });
        self
    }

    pub fn set_with_ttl(
        &mut self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> &mut Self {
        self.ops.push(PipelineOp::SetWithTtl {
            key: key.to_owned(),
            value,
            ttl,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }
}

/// Key-value store with per-key TTL. TTL expiry is the only eviction in
/// steady state; `delete_if_equals` and `clear` serve the refresh lock and debug
/// tooling.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Values of every live key starting with `prefix`, ordered by key.
    async fn get_all(&self, prefix: &str) -> Result<Vec<String>, Error>;

    async fn set(&self, key: &str, value: String) -> Result<(), Error>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), Error>;

    /// Atomic set-if-absent. Returns `true` when the key was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, Error>;

    /// Atomic compare-and-delete. Returns `true` when `key` held `value`
    /// and was removed.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, Error>;

    async fn execute(&self, pipeline: Pipeline) -> Result<(), Error>;

    async fn health_check(&self) -> bool;

    /// Removes every key starting with `prefix`, returning how many went.
    async fn clear(&self, prefix: &str) -> Result<usize, Error>;
}

struct CacheEntry {
    data: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: String, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// In-process store used for development and tests.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

/// Expired entries are invisible to reads and dropped on the next pipeline.
fn purge_expired(entries: &mut BTreeMap<String, CacheEntry>, now: Instant) {
    entries.retain(|_, entry| entry.is_live(now));
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.data.clone()))
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(_, entry)| entry.data.clone())
            .collect())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_owned(), CacheEntry::new(value, None));
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_owned(), CacheEntry::new(value, Some(ttl)));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), CacheEntry::new(value, Some(ttl)));
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, Error> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.data == value => {
                entries.remove(key);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn execute(&self, pipeline: Pipeline) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, Instant::now());
        for op in pipeline.ops {
            match op {
                PipelineOp::Set { key, value } => {
                    entries.insert(key, CacheEntry::new(value, None));
                },
                PipelineOp::SetWithTtl { key, value, ttl } => {
                    entries.insert(key, CacheEntry::new(value, Some(ttl)));
                },
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn clear(&self, prefix: &str) -> Result<usize, Error> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_all_respects_prefix_and_order() {
        let store = MemoryStore::new();
        store.set("market:b", "2".into()).await.unwrap();
        store.set("market:a", "1".into()).await.unwrap();
        store.set("markets:count", "2".into()).await.unwrap();
        store.set("other", "x".into()).await.unwrap();

        let values = store.get_all("market:").await.unwrap();
        assert_eq!(values, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("market:a", "1".into(), Duration::from_millis(100))
            .await
            .unwrap();
        store.set("status", "kept".into()).await.unwrap();

        assert_eq!(store.get("market:a").await.unwrap(), Some("1".into()));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.get("market:a").await.unwrap(), None);
        assert!(store.get_all("market:").await.unwrap().is_empty());
        assert_eq!(store.get("status").await.unwrap(), Some("kept".into()));

        store.execute(Pipeline::new()).await.unwrap();
        assert_eq!(store.entries.read().await.len(), 1);
        assert_eq!(store.clear("market:").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(100);
        assert!(store.set_if_absent("lock", "a".into(), ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b".into(), ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("a".into()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.set_if_absent("lock", "c".into(), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = MemoryStore::new();
        store.set("lock", "a".into()).await.unwrap();

        assert!(!store.delete_if_equals("lock", "b").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("a".into()));

        assert!(store.delete_if_equals("lock", "a").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(!store.delete_if_equals("lock", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_pipeline_applies_all_ops() {
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .set_with_ttl("market:a", "1".into(), Duration::from_secs(60))
            .set_with_ttl("market:b", "2".into(), Duration::from_secs(60))
            .set("markets:last_update", "10".into());
        assert_eq!(pipeline.len(), 3);

        store.execute(pipeline).await.unwrap();

        assert_eq!(store.get_all("market:").await.unwrap().len(), 2);
        assert_eq!(
            store.get("markets:last_update").await.unwrap(),
            Some("10".into())
        );
        assert_eq!(store.clear("market").await.unwrap(), 3);
    }
}
