use super::Interceptor;
use crate::request::Request;
use crate::response::{CachedResponse, Response, ResponseKind};
use std::sync::Arc;

/// Retrieval strategy chosen per GET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// External origins: live network, cache only when the network fails.
    /// Never writes to the store.
    NetworkFirst,
    /// The application's origin: store first, network on a miss, and
    /// write-through of plain 200 responses.
    CacheFirst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network_first",
            Strategy::CacheFirst => "cache_first",
        }
    }
}

fn record(strategy: Strategy, outcome: &'static str) {
    metrics::counter!("waystation_fetch_total", "strategy" => strategy.as_str(), "outcome" => outcome)
        .increment(1);
}

/// Only a plain 200 that did not fail at the transport layer may be stored.
fn is_cacheable(response: &Response) -> bool {
    response.status() == 200 && response.kind() != ResponseKind::Error
}

impl Interceptor {
    pub(super) async fn network_first(&self, request: &Request) -> Response {
        let strategy = Strategy::NetworkFirst;
        match self.network.fetch(request).await {
            Ok(response) => {
                tracing::debug!(url = %request.url(), status = response.status(), "network response");
                record(strategy, "network");
                response
            }
            Err(e) => {
                tracing::debug!(url = %request.url(), error = %e, "network failed, trying cache");
                match self.lookup(request).await {
                    Some(hit) => {
                        record(strategy, "cache_fallback");
                        hit.to_response()
                    }
                    None => {
                        record(strategy, "offline");
                        Response::offline()
                    }
                }
            }
        }
    }

    pub(super) async fn cache_first(&self, request: Request) -> Response {
        let strategy = Strategy::CacheFirst;
        if let Some(hit) = self.lookup(&request).await {
            tracing::debug!(url = %request.url(), "cache HIT");
            record(strategy, "cache_hit");
            return hit.to_response();
        }

        let response = match self.network.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %request.url(), error = %e, "cache MISS, network failed");
                record(strategy, "offline");
                return Response::offline();
            }
        };

        if !is_cacheable(&response) {
            tracing::debug!(
                url = %request.url(),
                status = response.status(),
                kind = ?response.kind(),
                "cache MISS, response not cacheable"
            );
            record(strategy, "network_uncached");
            return response;
        }

        match response.try_clone() {
            Ok(copy) => self.populate(request, copy),
            Err(e) => tracing::warn!(url = %request.url(), error = %e, "could not duplicate response for caching"),
        }
        record(strategy, "network_cached");
        response
    }

    /// Search every store. Storage errors count as a miss.
    async fn lookup(&self, request: &Request) -> Option<CachedResponse> {
        match self.storage.match_request(request).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(url = %request.url(), error = %e, "cache lookup failed");
                None
            }
        }
    }

    /// Write `response` into the current store without blocking the caller.
    fn populate(&self, request: Request, response: Response) {
        if self.is_retired() {
            tracing::debug!(cache = self.cache_name(), key = %request.cache_key(), "version retired, skipping cache write");
            return;
        }
        let storage = Arc::clone(&self.storage);
        let cache_name = self.config.cache_name.clone();
        let retired = self.retired.clone();

        self.writes.spawn(async move {
            if retired.is_cancelled() {
                return;
            }
            let result = async {
                let store = storage.open(&cache_name).await?;
                store.put(&request, response).await
            }
            .await;

            match result {
                Ok(()) => {
                    tracing::debug!(cache = %cache_name, key = %request.cache_key(), "cache populated");
                    metrics::counter!("waystation_cache_writes_total", "result" => "ok").increment(1);
                }
                Err(e) => {
                    tracing::warn!(cache = %cache_name, key = %request.cache_key(), error = %e, "cache write failed");
                    metrics::counter!("waystation_cache_writes_total", "result" => "error").increment(1);
                }
            }
        });
    }
}
