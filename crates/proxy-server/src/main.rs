mod admin;
mod config;
mod host;
mod network;
mod proxy;

use clap::Parser;
use config::{Config, StorageBackend};
use host::Host;
use network::HttpNetwork;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use proxy::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;
use waystation_cache::disk::DiskStorage;
use waystation_cache::memory::MemoryStorage;
use waystation_cache::{CacheStorage, InterceptorConfig};

/// Waystation: offline-first caching proxy for a web application.
#[derive(Parser)]
#[command(name = "waystation")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    // Load config
    let config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(c) => {
                tracing::info!(path = %args.config.display(), "loaded config");
                c
            }
            Err(e) => {
                tracing::error!(error = %e, path = %args.config.display(), "failed to load config, using defaults");
                Config::default_config()
            }
        }
    } else {
        tracing::info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default_config()
    };

    // Install Prometheus metrics recorder
    let prom_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
    {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder unavailable, /metrics disabled");
            None
        }
    };

    let origin = Url::parse(&config.app.origin)
        .unwrap_or_else(|e| panic!("invalid app origin {}: {e}", config.app.origin));

    let storage: Arc<dyn CacheStorage> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Disk => Arc::new(
            DiskStorage::open_root(&config.storage.path)
                .await
                .unwrap_or_else(|e| {
                    panic!(
                        "failed to open cache directory {}: {e}",
                        config.storage.path.display()
                    )
                }),
        ),
    };

    let network = Arc::new(
        HttpNetwork::new(origin.clone(), &config.upstream.url)
            .unwrap_or_else(|e| panic!("failed to build http client: {e}")),
    );

    let host = Host::new(
        InterceptorConfig {
            cache_name: config.app.cache_name.clone(),
            origin,
        },
        storage,
        network,
    );
    host.start().await;

    let state = Arc::new(AppState {
        host,
        storage_backend: config.storage.backend,
    });

    // Shutdown token for graceful shutdown
    let shutdown = CancellationToken::new();

    let proxy_router = proxy::router(Arc::clone(&state));
    let admin_router = admin::admin_router(Arc::clone(&state), prom_handle);

    let proxy_addr = config.server.listen_addr.clone();
    let admin_addr = config.server.admin_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        admin = %admin_addr,
        origin = %config.app.origin,
        upstream = %config.upstream.url,
        cache = %config.app.cache_name,
        storage = ?config.storage.backend,
        "waystation proxy starting"
    );

    let proxy_listener = tokio::net::TcpListener::bind(&proxy_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind proxy to {proxy_addr}: {e}"));

    let admin_listener = tokio::net::TcpListener::bind(&admin_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind admin to {admin_addr}: {e}"));

    // Spawn config file watcher
    spawn_config_watcher(args.config.clone(), config, Arc::clone(&state));

    // Spawn shutdown signal handler
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    let proxy_future = axum::serve(proxy_listener, proxy_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let admin_future = axum::serve(admin_listener, admin_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = proxy_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server error");
            }
        }
        result = admin_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin server error");
            }
        }
    }

    state.host.shutdown().await;
    tracing::info!("waystation proxy shut down");
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}

/// Watch the config file and roll out a new cache version when
/// `app.cache_name` changes.
fn spawn_config_watcher(config_path: PathBuf, initial_config: Config, state: Arc<AppState>) {
    let current_config = Arc::new(Mutex::new(initial_config));
    let runtime = Handle::current();

    let config_path_clone = config_path.clone();
    let mut watcher = match notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                reload(&config_path_clone, &current_config, &state, &runtime);
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start config watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, path = %config_path.display(), "failed to watch config file");
        return;
    }

    // Leak the watcher so it lives for the process lifetime
    std::mem::forget(watcher);
    tracing::info!("config file watcher started");
}

fn reload(path: &Path, current: &Mutex<Config>, state: &Arc<AppState>, runtime: &Handle) {
    let new_config = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to reload config");
            return;
        }
    };

    let mut old = current.lock();
    if let Some(cache_name) = config::diff(&old, &new_config) {
        let state = Arc::clone(state);
        runtime.spawn(async move {
            state.host.upgrade(cache_name).await;
        });
    }
    *old = new_config;
}
