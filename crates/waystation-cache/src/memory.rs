use crate::error::Result;
use crate::request::Request;
use crate::response::{CachedResponse, Response};
use crate::sharded::ShardedEntries;
use crate::traits::{CacheStorage, CacheStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// In-process cache storage. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStorage {
    // Creation order is preserved for `keys()` and cross-store matching.
    stores: RwLock<Vec<Arc<MemoryStore>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.stores.read().iter().find(|s| s.name == name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        if let Some(store) = self.find(name) {
            return Ok(store);
        }

        let mut stores = self.stores.write();
        // Re-check under the write lock: another open may have raced us.
        if let Some(store) = stores.iter().find(|s| s.name == name) {
            return Ok(Arc::clone(store) as Arc<dyn CacheStore>);
        }
        let store = Arc::new(MemoryStore::new(name));
        stores.push(Arc::clone(&store));
        tracing::debug!(store = name, "memory cache store created");
        Ok(store)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.find(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.stores.read().iter().map(|s| s.name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.write();
        let before = stores.len();
        stores.retain(|s| s.name != name);
        Ok(stores.len() != before)
    }
}

/// One named store backed by a sharded map.
pub struct MemoryStore {
    name: String,
    entries: ShardedEntries,
}

impl MemoryStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: ShardedEntries::new(),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
        Ok(self
            .entries
            .get(&request.cache_key())
            .filter(|entry| entry.matches_vary(request))
            .map(|entry| CachedResponse::clone(&entry)))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        let snapshot = CachedResponse::capture(request, response)?;
        self.entries.insert(request.cache_key(), snapshot);
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        Ok(self.entries.remove(&request.cache_key()))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}
