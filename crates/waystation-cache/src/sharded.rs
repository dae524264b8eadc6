use crate::response::CachedResponse;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 16;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

type Shard = RwLock<HashMap<String, Arc<CachedResponse>>>;

/// Thread-safe sharded map of request key → response snapshot.
///
/// Keys are spread across independent shards, each behind its own
/// `RwLock`, so concurrent fetches for different resources rarely contend.
/// Lookups take a read lock on one shard; writes take a write lock on one
/// shard. There is no eviction: entries live until removed or the whole
/// store is dropped.
///
/// Shard selection uses `ahash` with fixed seeds so a key always maps to the
/// same shard.
pub struct ShardedEntries {
    shards: Box<[Shard; NUM_SHARDS]>,
}

impl ShardedEntries {
    pub fn new() -> Self {
        let shards: Vec<Shard> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        let shards: Box<[Shard; NUM_SHARDS]> = shards
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!());

        Self { shards }
    }

    #[inline]
    fn shard_index(key: &str) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        (hash & SHARD_MASK) as usize
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let idx = Self::shard_index(key);
        self.shards[idx].read().get(key).cloned()
    }

    /// Insert or replace. Last write for a key wins.
    pub fn insert(&self, key: String, value: CachedResponse) {
        let idx = Self::shard_index(&key);
        self.shards[idx].write().insert(key, Arc::new(value));
    }

    pub fn remove(&self, key: &str) -> bool {
        let idx = Self::shard_index(key);
        self.shards[idx].write().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.shards
            .iter()
            .flat_map(|s| s.read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

impl Default for ShardedEntries {
    fn default() -> Self {
        Self::new()
    }
}
