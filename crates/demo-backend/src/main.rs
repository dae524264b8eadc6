use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head>
    <link rel="stylesheet" href="/style.css">
    <script src="/app.js" defer></script>
  </head>
  <body><h1>Refycon</h1></body>
</html>
"#;

/// Simulate upstream latency (5-20ms)
async fn latency() -> u64 {
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    delay
}

async fn index() -> impl IntoResponse {
    latency().await;
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn app_js() -> impl IntoResponse {
    latency().await;
    ([(header::CONTENT_TYPE, "application/javascript")], "console.log(1)")
}

async fn style_css() -> impl IntoResponse {
    latency().await;
    ([(header::CONTENT_TYPE, "text/css")], "h1 { color: #2a6; }")
}

/// Dynamic data: varies per request, useful to see what the cache pins.
async fn status() -> Json<Value> {
    let delay = latency().await;
    Json(json!({
        "ok": true,
        "latency_ms": delay,
    }))
}

async fn moved() -> impl IntoResponse {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/")])
}

async fn missing() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn health() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/style.css", get(style_css))
        .route("/api/status", get(status))
        .route("/old-home", get(moved))
        .route("/health", get(health))
        .fallback(missing)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, "demo backend starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind demo backend to {addr}: {e}"));
    if let Err(e) = axum::serve(listener, app()).await {
        tracing::error!(error = %e, "demo backend server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(uri: &str) -> (StatusCode, String) {
        let resp = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn serves_app_shell() {
        assert_eq!(call("/app.js").await, (StatusCode::OK, "console.log(1)".to_string()));
        let (status, html) = call("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("/app.js"));
    }

    #[tokio::test]
    async fn redirect_and_missing() {
        assert_eq!(call("/old-home").await.0, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(call("/nope").await.0, StatusCode::NOT_FOUND);
    }
}
