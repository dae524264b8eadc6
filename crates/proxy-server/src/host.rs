use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;
use waystation_cache::{CacheStorage, Interceptor, InterceptorConfig, Lifecycle, Network};

/// Drives interceptor versions through install and activate, and holds the
/// one currently in control.
///
/// The active interceptor lives in an `ArcSwap`: a version upgrade swaps it
/// in atomically while in-flight requests finish on the previous instance.
pub struct Host {
    active: ArcSwap<Interceptor>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    origin: Url,
    upgrading: Mutex<()>,
}

impl Host {
    pub fn new(
        config: InterceptorConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        let origin = config.origin.clone();
        let interceptor = Interceptor::new(config, Arc::clone(&storage), Arc::clone(&network));
        Self {
            active: ArcSwap::from_pointee(interceptor),
            storage,
            network,
            origin,
            upgrading: Mutex::new(()),
        }
    }

    /// The interceptor handling new requests.
    pub fn interceptor(&self) -> Arc<Interceptor> {
        self.active.load_full()
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// First start: install the configured version, then activate it.
    ///
    /// With nothing already in control there is no one to wait for, so the
    /// version activates even if install asked it to wait.
    pub async fn start(&self) {
        let interceptor = self.interceptor();
        let install = interceptor.on_install().await;
        if !install.skip_waiting {
            tracing::warn!(cache = interceptor.cache_name(), "install incomplete, activating anyway");
        }
        activate(&interceptor).await;
    }

    /// Install `cache_name` as a new version and, if install succeeds, make it
    /// the active interceptor and activate it.
    ///
    /// Upgrades run one at a time. Returns whether the new version took
    /// control.
    pub async fn upgrade(&self, cache_name: String) -> bool {
        let _guard = self.upgrading.lock().await;
        if self.interceptor().cache_name() == cache_name {
            tracing::debug!(cache = %cache_name, "version already active");
            return false;
        }

        let config = InterceptorConfig {
            cache_name,
            origin: self.origin.clone(),
        };
        let candidate = Arc::new(Interceptor::new(
            config,
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
        ));

        let install = candidate.on_install().await;
        if !install.skip_waiting {
            tracing::warn!(
                cache = candidate.cache_name(),
                "new version installed but waiting; restart to activate"
            );
            return false;
        }

        let previous = self.active.swap(Arc::clone(&candidate));
        // In-flight requests on the old version must not reopen its store.
        previous.retire();
        previous.flush_writes().await;
        activate(&candidate).await;

        tracing::info!(
            old = previous.cache_name(),
            new = candidate.cache_name(),
            "version upgrade complete"
        );
        true
    }

    /// Wait for background cache writes of the active version.
    pub async fn shutdown(&self) {
        self.interceptor().flush_writes().await;
    }
}

async fn activate(interceptor: &Interceptor) {
    match interceptor.on_activate().await {
        Ok(outcome) => {
            tracing::info!(
                cache = interceptor.cache_name(),
                deleted = ?outcome.deleted,
                claim_clients = outcome.claim_clients,
                "version in control"
            );
        }
        // Activation still happens; stale stores may linger until the next one.
        Err(e) => {
            tracing::error!(cache = interceptor.cache_name(), error = %e, "activation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use waystation_cache::memory::MemoryStorage;
    use waystation_cache::{Error, FetchOutcome, Request, Response};

    struct Offline;

    #[async_trait]
    impl Network for Offline {
        async fn fetch(&self, _request: &Request) -> waystation_cache::Result<Response> {
            Err(Error::Network("offline".into()))
        }
    }

    fn host(storage: Arc<MemoryStorage>) -> Host {
        let config = InterceptorConfig::new("refycon-v1.0.0", "http://127.0.0.1:8080").unwrap();
        Host::new(config, storage, Arc::new(Offline))
    }

    #[tokio::test]
    async fn start_installs_and_activates() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open("refycon-v0.9.0").await.unwrap();
        let host = host(storage.clone());

        host.start().await;

        assert_eq!(storage.keys().await.unwrap(), vec!["refycon-v1.0.0"]);
    }

    #[tokio::test]
    async fn upgrade_swaps_version_and_prunes_old_store() {
        let storage = Arc::new(MemoryStorage::new());
        let host = host(storage.clone());
        host.start().await;

        assert!(host.upgrade("refycon-v1.1.0".into()).await);

        assert_eq!(host.interceptor().cache_name(), "refycon-v1.1.0");
        assert_eq!(storage.keys().await.unwrap(), vec!["refycon-v1.1.0"]);
    }

    #[tokio::test]
    async fn upgraded_version_serves_offline_response() {
        let storage = Arc::new(MemoryStorage::new());
        let host = host(storage);
        host.start().await;
        host.upgrade("refycon-v1.1.0".into()).await;

        let outcome = host
            .interceptor()
            .on_fetch(Request::get("http://127.0.0.1:8080/app.js").unwrap())
            .await;

        match outcome {
            FetchOutcome::Respond(resp) => assert_eq!(resp.status(), 503),
            FetchOutcome::PassThrough => panic!("GET should be intercepted"),
        }
    }

    /// Holds every request until released.
    #[derive(Default)]
    struct Gated {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Network for Gated {
        async fn fetch(&self, _request: &Request) -> waystation_cache::Result<Response> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Response::new(200, "console.log(1)"))
        }
    }

    #[tokio::test]
    async fn in_flight_request_does_not_recreate_pruned_store() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(Gated::default());
        let config = InterceptorConfig::new("refycon-v1.0.0", "http://127.0.0.1:8080").unwrap();
        let host = Host::new(config, storage.clone(), network.clone());
        host.start().await;

        let old = host.interceptor();
        let pending = tokio::spawn({
            let old = Arc::clone(&old);
            async move {
                old.on_fetch(Request::get("http://127.0.0.1:8080/app.js").unwrap())
                    .await
            }
        });
        network.entered.notified().await;

        assert!(host.upgrade("refycon-v1.1.0".into()).await);
        assert_eq!(storage.keys().await.unwrap(), vec!["refycon-v1.1.0"]);

        network.release.notify_one();
        match pending.await.unwrap() {
            FetchOutcome::Respond(resp) => assert_eq!(resp.status(), 200),
            FetchOutcome::PassThrough => panic!("GET should be intercepted"),
        }
        old.flush_writes().await;

        assert_eq!(storage.keys().await.unwrap(), vec!["refycon-v1.1.0"]);
    }

    #[tokio::test]
    async fn concurrent_upgrades_leave_one_store() {
        let storage = Arc::new(MemoryStorage::new());
        let host = host(storage.clone());
        host.start().await;

        let (a, b) = tokio::join!(
            host.upgrade("refycon-v1.1.0".into()),
            host.upgrade("refycon-v1.2.0".into())
        );

        assert!(a && b);
        assert_eq!(host.interceptor().cache_name(), "refycon-v1.2.0");
        assert_eq!(storage.keys().await.unwrap(), vec!["refycon-v1.2.0"]);
    }

    #[tokio::test]
    async fn upgrade_to_active_version_is_a_no_op() {
        let storage = Arc::new(MemoryStorage::new());
        let host = host(storage.clone());
        host.start().await;

        assert!(!host.upgrade("refycon-v1.0.0".into()).await);
        assert!(!host.interceptor().is_retired());
        assert_eq!(storage.keys().await.unwrap(), vec!["refycon-v1.0.0"]);
    }
}
