//! The offline worker: wires configuration, classifier, generations and
//! strategies into one [`WorkerHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use knot_net::{Fetcher, Response};
use knot_store::CacheStorage;
use tracing::{debug, info};

use crate::{
    ControlMessage, FetchEvent, GenerationManager, MessageEvent, RequestClass, RequestClassifier,
    Result, Strategies, WorkerConfig, WorkerHandler, WorkerScope,
};

/// Caches the app shell on install and serves it offline.
pub struct OfflineWorker {
    config: WorkerConfig,
    generations: GenerationManager,
    classifier: RequestClassifier,
    strategies: Strategies,
}

impl OfflineWorker {
    /// Build a worker over `storage`, reaching the network through `fetcher`.
    pub fn new(
        config: WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let precache = config.precache_urls()?;

        let generations = GenerationManager::new(
            storage.clone(),
            Arc::clone(&fetcher),
            config.cache_name.clone(),
            precache,
        );
        let classifier = RequestClassifier::from_config(&config);
        let strategies = Strategies::new(
            storage,
            config.cache_name.clone(),
            fetcher,
            &config.media_extensions,
        );

        Ok(Self {
            config,
            generations,
            classifier,
            strategies,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }
}

#[async_trait]
impl WorkerHandler for OfflineWorker {
    async fn handle_install(&self, scope: &dyn WorkerScope) -> Result<()> {
        self.generations.install().await?;
        scope.skip_waiting().await;
        Ok(())
    }

    async fn handle_activate(&self, scope: &dyn WorkerScope) -> Result<()> {
        let deleted = self.generations.activate().await?;
        let claimed = scope.claim_clients().await;
        info!(
            cache = %self.generations.cache_name(),
            deleted = deleted.len(),
            claimed,
            "Worker activated"
        );
        Ok(())
    }

    async fn handle_fetch(&self, event: FetchEvent) -> Result<Response> {
        let request = event.request;
        let class = self.classifier.classify(&request);
        debug!(url = %request.url, method = %request.method, class = ?class, "Fetch intercepted");

        match class {
            RequestClass::Passthrough(_) => self.strategies.passthrough(request).await,
            RequestClass::Data => self.strategies.network_first(request).await,
            RequestClass::Default => Ok(self.strategies.cache_first(request).await),
        }
    }

    async fn handle_message(&self, event: MessageEvent) {
        match ControlMessage::parse(&event.data) {
            Some(ControlMessage::CacheMedia { urls }) => {
                let report = self.strategies.prefetch_media(&urls).await;
                info!(
                    cached = report.cached.len(),
                    failed = report.failed.len(),
                    "Media prefetch finished"
                );
            }
            None => debug!("Ignoring message"),
        }
    }
}
