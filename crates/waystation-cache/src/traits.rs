use crate::error::Result;
use crate::request::Request;
use crate::response::{CachedResponse, Response};
use async_trait::async_trait;
use std::sync::Arc;

/// The set of named cache stores owned by the host.
///
/// Implementations: in-memory ([`crate::memory::MemoryStorage`]) and
/// on-disk ([`crate::disk::DiskStorage`]).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the store called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>>;

    /// Whether a store called `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all stores, in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete the store called `name`. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Look up `request` in every store, in creation order; first match wins.
    async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
        for name in self.keys().await? {
            let store = self.open(&name).await?;
            if let Some(hit) = store.match_request(request).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

/// A single named request → response store.
///
/// Writes are atomic per key; the last write for a key wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Name this store was opened under.
    fn name(&self) -> &str;

    /// Stored snapshot for `request`, if any entry matches it.
    async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>>;

    /// Store `response` under `request`, consuming its body.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// Remove the entry for `request`. Returns false if there was none.
    async fn delete(&self, request: &Request) -> Result<bool>;

    /// Request keys of all entries.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Number of entries.
    async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Outbound network access.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform `request`. `Err` means it never settled into a response;
    /// any HTTP status, including errors, is an `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}
