//! The interceptor: cache lifecycle plus per-request strategy dispatch.
//!
//! A host adapter drives an [`Interceptor`] through the [`Lifecycle`] trait:
//! `on_install` once a new version is loaded, `on_activate` when it takes
//! over, and `on_fetch` for every outgoing request.

mod strategy;

pub use strategy::Strategy;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::traits::{CacheStorage, Network};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

/// Fixed at construction and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// Version token naming the current cache store, e.g. `refycon-v1.1.0`.
    pub cache_name: String,
    /// The application's own origin. Requests on it are served cache-first.
    pub origin: Url,
}

impl InterceptorConfig {
    pub fn new(cache_name: impl Into<String>, origin: &str) -> Result<Self> {
        let origin =
            Url::parse(origin).map_err(|e| Error::InvalidUrl(format!("{origin}: {e}")))?;
        Ok(Self {
            cache_name: cache_name.into(),
            origin,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Take control immediately instead of waiting for old clients to go away.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Stale stores that were removed.
    pub deleted: Vec<String>,
    /// Start controlling already-open clients.
    pub claim_clients: bool,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted: the host sends the request as it would have anyway.
    PassThrough,
    /// Fulfil the request with this response.
    Respond(Response),
}

impl FetchOutcome {
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::PassThrough => None,
            FetchOutcome::Respond(r) => Some(r),
        }
    }
}

/// Lifecycle and interception hooks a host invokes.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn on_install(&self) -> InstallOutcome;

    async fn on_activate(&self) -> Result<ActivateOutcome>;

    async fn on_fetch(&self, request: Request) -> FetchOutcome;
}

pub struct Interceptor {
    config: InterceptorConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    writes: TaskTracker,
    retired: CancellationToken,
}

impl Interceptor {
    pub fn new(
        config: InterceptorConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            config,
            storage,
            network,
            writes: TaskTracker::new(),
            retired: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Which strategy handles `request`, or `None` if it is passed through.
    pub fn classify(&self, request: &Request) -> Option<Strategy> {
        if request.method() != http::Method::GET {
            return None;
        }
        if request.is_same_origin(&self.config.origin) {
            Some(Strategy::CacheFirst)
        } else {
            Some(Strategy::NetworkFirst)
        }
    }

    /// Stop writing to this version's store. Requests still in flight are
    /// answered as usual but no longer populate the cache.
    ///
    /// Call before activating a successor so its pruning is not undone.
    pub fn retire(&self) {
        self.retired.cancel();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    /// Wait for every background cache write spawned so far.
    ///
    /// Not meant to be called from two tasks at once.
    pub async fn flush_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

#[async_trait]
impl Lifecycle for Interceptor {
    async fn on_install(&self) -> InstallOutcome {
        let cache = self.cache_name();
        tracing::info!(cache, "installing");

        match self.storage.open(cache).await {
            Ok(_) => {
                tracing::info!(cache, "cache store ready");
                InstallOutcome { skip_waiting: true }
            }
            Err(e) => {
                tracing::error!(cache, error = %e, "install failed to open cache store");
                InstallOutcome {
                    skip_waiting: false,
                }
            }
        }
    }

    async fn on_activate(&self) -> Result<ActivateOutcome> {
        let current = self.cache_name();
        tracing::info!(cache = current, "activating");

        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        // Deletions are independent: a failure does not stop the others.
        let results = join_all(stale.iter().map(|name| async move {
            tracing::info!(store = %name, "deleting stale cache store");
            self.storage.delete(name).await.map(|existed| (name, existed))
        }))
        .await;

        let mut deleted = Vec::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok((name, true)) => deleted.push(name.clone()),
                Ok((_, false)) => {}
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::warn!(error = %e, "additional stale store deletion failed"),
            }
        }
        metrics::counter!("waystation_stores_deleted_total").increment(deleted.len() as u64);

        if let Some(e) = first_error {
            return Err(e);
        }

        tracing::info!(cache = current, deleted = deleted.len(), "activated");
        Ok(ActivateOutcome {
            deleted,
            claim_clients: true,
        })
    }

    async fn on_fetch(&self, request: Request) -> FetchOutcome {
        let Some(strategy) = self.classify(&request) else {
            metrics::counter!("waystation_fetch_total", "strategy" => "none", "outcome" => "passthrough")
                .increment(1);
            return FetchOutcome::PassThrough;
        };

        let response = match strategy {
            Strategy::NetworkFirst => self.network_first(&request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        };
        FetchOutcome::Respond(response)
    }
}
