use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub app: AppConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Origin the application is served from; requests on it are cache-first.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Version token naming the current cache store.
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Where requests for the application origin are actually fetched from.
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            app: AppConfig::default(),
            upstream: UpstreamConfig {
                url: "http://127.0.0.1:3000".to_string(),
            },
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache_name: default_cache_name(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
        }
    }
}

/// Compare old and new config and decide what can change at runtime.
///
/// - Cache name changed → returns the new version token to install + activate
/// - Anything else changed → WARN log, ignored until restart
pub fn diff(old: &Config, new: &Config) -> Option<String> {
    if old.server.listen_addr != new.server.listen_addr
        || old.server.admin_addr != new.server.admin_addr
    {
        tracing::warn!("listen address change detected, ignoring. Restart to rebind");
    }

    if old.app.origin != new.app.origin || old.upstream.url != new.upstream.url {
        tracing::warn!(
            old_origin = %old.app.origin,
            new_origin = %new.app.origin,
            "origin/upstream change detected, ignoring. Restart to apply"
        );
    }

    if old.storage.backend != new.storage.backend || old.storage.path != new.storage.path {
        tracing::warn!("storage change detected, ignoring. Restart to apply");
    }

    if old.app.cache_name != new.app.cache_name {
        tracing::info!(
            old = %old.app.cache_name,
            new = %new.app.cache_name,
            "config reloaded: cache version changed"
        );
        return Some(new.app.cache_name.clone());
    }

    None
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_origin() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_cache_name() -> String {
    "refycon-v1.1.0".to_string()
}
fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}
fn default_storage_path() -> PathBuf {
    PathBuf::from(".waystation-cache")
}
