use crate::config::StorageBackend;
use crate::host::Host;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use url::Url;
use waystation_cache::{FetchOutcome, Lifecycle};

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Shared application state passed to all handlers.
pub struct AppState {
    pub host: Host,
    pub storage_backend: StorageBackend,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main proxy handler. Runs every request through the active interceptor;
/// requests it passes through are sent to the network unmodified.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let url = match target_url(&parts.uri, state.host.origin()) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!(uri = %parts.uri, error = %e, "unresolvable request target");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    let mut request = waystation_cache::Request::new(parts.method.clone(), url).with_body(body);
    for (name, value) in parts.headers.iter() {
        let name = name.as_str();
        if name == "host" || name == "content-length" || HOP_BY_HOP.contains(&name) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.with_header(name, value);
        }
    }

    let interceptor = state.host.interceptor();
    // Keep a copy for the host's default behavior if the interceptor declines.
    let outcome = interceptor.on_fetch(request.clone()).await;
    let (response, intercepted) = match outcome {
        FetchOutcome::Respond(response) => (response, true),
        FetchOutcome::PassThrough => match state.host.network().fetch(&request).await {
            Ok(response) => (response, false),
            Err(e) => {
                tracing::error!(error = %e, url = %request.url(), "pass-through request failed");
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        },
    };

    tracing::debug!(
        method = %request.method(),
        url = %request.url(),
        status = response.status(),
        intercepted,
        latency_us = start.elapsed().as_micros(),
        "request handled"
    );

    into_http_response(response)
}

/// Absolute-form targets are used as-is; origin-form ones are resolved
/// against the application origin.
fn target_url(uri: &Uri, origin: &Url) -> Result<Url, url::ParseError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string());
    }
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    origin.join(path_and_query)
}

fn into_http_response(response: waystation_cache::Response) -> Response<Body> {
    let Ok(status) = StatusCode::from_u16(response.status()) else {
        // Network-error placeholders carry status 0
        return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) || name == "content-length" {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    let body = match response.into_body() {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "response body unavailable");
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    builder.body(Body::from(body)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to build response");
        (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::HttpNetwork;
    use tower::ServiceExt;
    use waystation_cache::memory::MemoryStorage;
    use waystation_cache::{CacheStorage, InterceptorConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ORIGIN: &str = "http://127.0.0.1:8080";
    const CACHE: &str = "refycon-v1.1.0";

    async fn state(upstream: &str) -> (Arc<AppState>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let origin = Url::parse(ORIGIN).unwrap();
        let network = Arc::new(HttpNetwork::new(origin, upstream).unwrap());
        let config = InterceptorConfig::new(CACHE, ORIGIN).unwrap();
        let host = Host::new(config, storage.clone(), network);
        host.start().await;
        let state = Arc::new(AppState {
            host,
            storage_backend: StorageBackend::Memory,
        });
        (state, storage)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(resp: Response<Body>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn local_asset_cached_and_served_without_upstream() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("console.log(1)"))
            .mount(&upstream)
            .await;
        let (state, storage) = state(&upstream.uri()).await;

        let resp = router(state.clone()).oneshot(get("/app.js")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "console.log(1)");

        state.host.shutdown().await;
        assert_eq!(storage.open(CACHE).await.unwrap().len().await.unwrap(), 1);

        // Upstream no longer knows the asset; the cache answers instead
        upstream.reset().await;
        let resp = router(state).oneshot(get("/app.js")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "console.log(1)");
        assert!(upstream.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_404_passed_back_uncached() {
        let upstream = MockServer::start().await;
        let (state, storage) = state(&upstream.uri()).await;

        let resp = router(state.clone()).oneshot(get("/missing")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state.host.shutdown().await;
        assert_eq!(storage.open(CACHE).await.unwrap().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn external_unreachable_is_offline() {
        let (state, _) = state("http://127.0.0.1:1").await;

        let resp = router(state)
            .oneshot(get("http://127.0.0.1:1/lib.js"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(resp).await, "Offline");
    }

    #[tokio::test]
    async fn post_passes_through_to_upstream() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&upstream)
            .await;
        let (state, storage) = state(&upstream.uri()).await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/items")
            .body(Body::from("{\"name\":\"a\"}"))
            .unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(body_string(resp).await, "created");
        state.host.shutdown().await;
        assert_eq!(storage.open(CACHE).await.unwrap().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pass_through_network_failure_is_bad_gateway() {
        let (state, _) = state("http://127.0.0.1:1").await;

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/items/1")
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn target_url_resolution() {
        let origin = Url::parse(ORIGIN).unwrap();

        let local: Uri = "/app.js?v=1".parse().unwrap();
        assert_eq!(
            target_url(&local, &origin).unwrap().as_str(),
            "http://127.0.0.1:8080/app.js?v=1"
        );

        let absolute: Uri = "https://cdn.example.com/lib.js".parse().unwrap();
        assert_eq!(
            target_url(&absolute, &origin).unwrap().as_str(),
            "https://cdn.example.com/lib.js"
        );
    }

    #[test]
    fn status_zero_becomes_bad_gateway() {
        let resp = into_http_response(waystation_cache::Response::error());
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
