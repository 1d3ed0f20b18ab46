//! Wires the worker to a durable store and the real network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use knot_common::{retry_with_backoff, RetryConfig};
use knot_net::{Fetcher, HttpFetcher, LoaderConfig};
use knot_store::{CacheStorage, SqliteBackend};
use knot_sw::{OfflineWorker, ServiceWorkerHost, WorkerConfig, WorkerState};
use tracing::{debug, info};
use url::Url;

const DB_FILE: &str = "cache.db";

/// Directory name for one origin, e.g. `localhost_8080`.
pub fn origin_slug(origin: &Url) -> String {
    let host = origin.host_str().unwrap_or("local");
    let raw = match origin.port_or_known_default() {
        Some(port) => format!("{host}_{port}"),
        None => host.to_string(),
    };
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Data directory for `origin`: the explicit one, or the platform's
/// local data directory.
pub fn resolve_data_dir(explicit: Option<&Path>, origin: &Url) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let base = dirs::data_local_dir().context("No platform data directory; pass --data-dir")?;
    Ok(base.join("knot-agent").join(origin_slug(origin)))
}

/// A worker host over the on-disk store.
pub struct Agent {
    pub config: WorkerConfig,
    pub storage: CacheStorage,
    pub host: ServiceWorkerHost<OfflineWorker>,
    fetcher: Arc<dyn Fetcher>,
}

impl Agent {
    /// Open the store under `data_dir` and build the host.
    pub async fn open(config: WorkerConfig, data_dir: &Path) -> Result<Self> {
        let db = data_dir.join(DB_FILE);
        let storage = CacheStorage::new(
            SqliteBackend::open(&db)
                .with_context(|| format!("Failed to open cache store at {}", db.display()))?,
        );

        let fetcher: Arc<dyn Fetcher> =
            Arc::new(HttpFetcher::new(LoaderConfig::default(), config.origin.clone())?);

        Self::with_parts(config, storage, fetcher).await
    }

    /// Build the host over `storage`. The worker resumes as active when an
    /// earlier process completed both install and activation: the current
    /// generation holds entries and no other generation is left.
    pub async fn with_parts(
        config: WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let host = build_host(&config, &storage, &fetcher)?;

        let generations = storage.keys()?;
        let activated = generations == [config.cache_name.as_str()]
            && !storage.handle(&config.cache_name).is_empty()?;
        if activated {
            host.resume_active().await?;
            debug!(cache = %config.cache_name, "Resumed active worker");
        } else if !generations.is_empty() {
            debug!(?generations, "Cache not activated, install will run");
        }

        Ok(Self {
            config,
            storage,
            host,
            fetcher,
        })
    }

    pub async fn is_active(&self) -> bool {
        self.host.state().await.is_active()
    }

    /// Install and activate, retrying failed attempts with backoff. An
    /// active worker is superseded by a fresh one, which re-populates the
    /// current generation.
    pub async fn install(&mut self, retry: &RetryConfig) -> Result<WorkerState> {
        if self.is_active().await {
            debug!(cache = %self.config.cache_name, "Replacing active worker");
            self.host = build_host(&self.config, &self.storage, &self.fetcher)?;
        }

        let host = &self.host;
        let state = retry_with_backoff(retry, "install", |attempt| async move {
            debug!(attempt, "Install attempt");
            match host.state().await {
                // Install succeeded earlier but activation did not.
                WorkerState::Installed => {
                    host.activate().await?;
                    Ok(host.state().await)
                }
                _ => host.register().await,
            }
        })
        .await?;

        info!(cache = %self.config.cache_name, ?state, "Install finished");
        Ok(state)
    }
}

fn build_host(
    config: &WorkerConfig,
    storage: &CacheStorage,
    fetcher: &Arc<dyn Fetcher>,
) -> Result<ServiceWorkerHost<OfflineWorker>> {
    let worker = OfflineWorker::new(config.clone(), storage.clone(), Arc::clone(fetcher))?;
    let (host, _events) = ServiceWorkerHost::new(worker, Arc::clone(fetcher));
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knot_net::{NetError, Request, Response};

    struct Offline;

    /// Serves every URL with a 200 whose body counts the fetches so far.
    #[derive(Default)]
    struct Online {
        fetches: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for Online {
        async fn fetch(&self, _request: Request) -> std::result::Result<Response, NetError> {
            let n = self.fetches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Response::synthetic(200, "OK", format!("fetch {n}")))
        }
    }

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, _request: Request) -> std::result::Result<Response, NetError> {
            Err(NetError::RequestFailed("offline".into()))
        }
    }

    #[test]
    fn test_origin_slug() {
        let slug = |s: &str| origin_slug(&Url::parse(s).unwrap());
        assert_eq!(slug("http://localhost:8080/"), "localhost_8080");
        assert_eq!(slug("https://knot.example/app/"), "knot_example_443");
        assert_eq!(slug("http://[::1]:3000/"), "___1__3000");
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let origin = Url::parse("http://localhost:8080/").unwrap();
        let dir = resolve_data_dir(Some(Path::new("/tmp/knot")), &origin).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/knot"));
    }

    #[tokio::test]
    async fn test_fresh_store_is_not_active() {
        let mut agent = Agent::with_parts(
            WorkerConfig::default(),
            CacheStorage::in_memory(),
            Arc::new(Offline),
        )
        .await
        .unwrap();
        assert!(!agent.is_active().await);

        assert!(agent.install(&RetryConfig::none()).await.is_err());
        assert_eq!(agent.host.state().await, WorkerState::Redundant);
    }

    #[tokio::test]
    async fn test_populated_generation_resumes_active() {
        let config = WorkerConfig::default();
        let storage = CacheStorage::in_memory();
        let url = Url::parse("http://localhost:8080/index.html").unwrap();
        storage
            .open(&config.cache_name)
            .unwrap()
            .put_url(&url, Response::synthetic(200, "OK", "shell"))
            .unwrap();

        let agent = Agent::with_parts(config, storage, Arc::new(Offline))
            .await
            .unwrap();
        assert!(agent.is_active().await);

        let served = agent.host.fetch(Request::get(url)).await.unwrap();
        assert_eq!(served.text().unwrap(), "shell");
    }

    #[tokio::test]
    async fn test_open_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested");
        let agent = Agent::open(WorkerConfig::default(), &data_dir).await.unwrap();
        assert!(data_dir.join(DB_FILE).exists());
        assert!(agent.storage.keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_twice_over_one_store() {
        let config = WorkerConfig::default();
        let storage = CacheStorage::in_memory();
        let fetcher: Arc<dyn Fetcher> = Arc::new(Online::default());
        let index = Url::parse("http://localhost:8080/index.html").unwrap();

        let mut first = Agent::with_parts(config.clone(), storage.clone(), Arc::clone(&fetcher))
            .await
            .unwrap();
        assert_eq!(
            first.install(&RetryConfig::none()).await.unwrap(),
            WorkerState::Activated
        );
        let entries = storage.handle(&config.cache_name).len().unwrap();

        let mut second = Agent::with_parts(config.clone(), storage.clone(), fetcher)
            .await
            .unwrap();
        assert!(second.is_active().await);
        let before = second.host.fetch(Request::get(index.clone())).await.unwrap();
        assert_eq!(
            second.install(&RetryConfig::none()).await.unwrap(),
            WorkerState::Activated
        );

        let cache = storage.handle(&config.cache_name);
        assert_eq!(cache.len().unwrap(), entries);
        let after = cache.match_url(&index).unwrap().unwrap();
        assert_ne!(after.body, before.body);
        assert_eq!(storage.keys().unwrap(), vec![config.cache_name]);
    }

    #[tokio::test]
    async fn test_unactivated_store_installs_and_cleans_up() {
        let config = WorkerConfig::default();
        let storage = CacheStorage::in_memory();
        let url = Url::parse("http://localhost:8080/index.html").unwrap();
        storage
            .open("knot-app-cache-v0")
            .unwrap()
            .put_url(&url, Response::synthetic(200, "OK", "old"))
            .unwrap();
        storage
            .open(&config.cache_name)
            .unwrap()
            .put_url(&url, Response::synthetic(200, "OK", "new"))
            .unwrap();

        let fetcher = Arc::new(Online::default());
        let mut agent = Agent::with_parts(config.clone(), storage.clone(), fetcher)
            .await
            .unwrap();
        assert!(!agent.is_active().await);

        agent.install(&RetryConfig::none()).await.unwrap();
        assert_eq!(storage.keys().unwrap(), vec![config.cache_name]);
    }
}
