use crate::proxy::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use waystation_cache::CacheStorage;

/// Admin router (separate port): Prometheus scrape endpoint plus JSON stats.
pub fn admin_router(state: Arc<AppState>, prom_handle: Option<PrometheusHandle>) -> Router {
    let router = Router::new().route("/api/stats", get(stats_handler));
    let router = match prom_handle {
        Some(h) => router.route(
            "/metrics",
            get(move || {
                let h = h.clone();
                async move { h.render() }
            }),
        ),
        None => router,
    };
    router.with_state(state)
}

/// One-shot view of the cache state.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub cache_name: String,
    pub origin: String,
    pub storage_backend: String,
    pub stores: Vec<String>,
    pub current_entries: usize,
}

async fn collect_stats(state: &AppState) -> waystation_cache::Result<StatsSnapshot> {
    let interceptor = state.host.interceptor();
    let storage = state.host.storage();
    let cache_name = interceptor.cache_name().to_string();

    let stores = storage.keys().await?;
    let current_entries = if storage.has(&cache_name).await? {
        storage.open(&cache_name).await?.len().await?
    } else {
        0
    };

    Ok(StatsSnapshot {
        cache_name,
        origin: state.host.origin().to_string(),
        storage_backend: format!("{:?}", state.storage_backend).to_lowercase(),
        stores,
        current_entries,
    })
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match collect_stats(&state).await {
        Ok(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Err(e) => {
            tracing::error!(error = %e, "failed to collect cache stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}
