//! Scriptable network and storage doubles for tests.

use crate::error::{Error, Result};
use crate::memory::MemoryStorage;
use crate::request::Request;
use crate::response::{CachedResponse, Response};
use crate::traits::{CacheStorage, CacheStore, Network};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A network that answers from a route table and can be unplugged.
///
/// Unrouted URLs get a 404. Every call is recorded, including failed ones.
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, CachedResponse>>,
    online: AtomicBool,
    calls: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn route(&self, url: &str, response: Response) {
        let req = Request::get(url).unwrap();
        let template = CachedResponse::capture(&req, response).unwrap();
        self.routes.lock().insert(url.to_string(), template);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.lock().push(request.clone());
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".into()));
        }
        let routed = self
            .routes
            .lock()
            .get(request.url().as_str())
            .map(CachedResponse::to_response);
        Ok(routed.unwrap_or_else(|| Response::new(404, "Not Found")))
    }
}

/// Memory storage with switchable failures.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    pub fail_open: AtomicBool,
    pub fail_keys: AtomicBool,
    pub fail_put: AtomicBool,
    pub fail_delete: Mutex<Option<String>>,
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::StoreOpen {
                name: name.to_string(),
                reason: "quota exceeded".into(),
            });
        }
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(FlakyStore {
            inner,
            fail_put: self.fail_put.load(Ordering::SeqCst),
        }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        if self.fail_keys.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("enumeration failed")));
        }
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        if self.fail_delete.lock().as_deref() == Some(name) {
            return Err(Error::StoreDelete {
                name: name.to_string(),
                reason: "locked".into(),
            });
        }
        self.inner.delete(name).await
    }
}

struct FlakyStore {
    inner: Arc<dyn CacheStore>,
    fail_put: bool,
}

#[async_trait]
impl CacheStore for FlakyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
        self.inner.match_request(request).await
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        if self.fail_put {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(request, response).await
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        self.inner.delete(request).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }
}
