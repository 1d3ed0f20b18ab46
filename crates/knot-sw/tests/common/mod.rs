#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use knot_net::{same_origin, Fetcher, NetError, Request, RequestMode, Response, ResponseType};
use knot_store::CacheStorage;
use knot_sw::{OfflineWorker, ServiceWorkerEvent, ServiceWorkerHost, WorkerConfig};
use tokio::sync::mpsc;
use url::Url;

pub const ORIGIN: &str = "http://localhost:8080/";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Scripted network: routes by URL, counts calls, can go offline.
pub struct MockFetcher {
    origin: Url,
    routes: Mutex<HashMap<String, (u16, Bytes)>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new(origin: &str) -> Arc<Self> {
        Arc::new(Self {
            origin: Url::parse(origin).unwrap(),
            routes: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            offline: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn route(&self, url: &str, status: u16, body: &str) {
        let url = Url::parse(url).unwrap().to_string();
        self.routes
            .lock()
            .unwrap()
            .insert(url, (status, Bytes::from(body.to_string())));
    }

    pub fn fail(&self, url: &str) {
        let url = Url::parse(url).unwrap().to_string();
        self.failing.lock().unwrap().insert(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        let url = Url::parse(url).unwrap().to_string();
        self.calls.lock().unwrap().iter().filter(|c| **c == url).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        self.calls.lock().unwrap().push(key.clone());

        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&key) {
            return Err(NetError::RequestFailed(format!("connection refused: {key}")));
        }

        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or((404, Bytes::from_static(b"not found")));

        let response_type = if same_origin(&request.url, &self.origin) {
            ResponseType::Basic
        } else {
            match request.mode {
                RequestMode::NoCors => return Ok(Response::opaque(request.url, body)),
                RequestMode::SameOrigin => return Err(NetError::CrossOrigin(request.url)),
                RequestMode::Cors => ResponseType::Cors,
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        Ok(Response::fetched(
            request.url,
            StatusCode::from_u16(status).unwrap(),
            headers,
            body,
            response_type,
        ))
    }
}

/// Host plus everything a test needs to inspect it.
pub struct Harness {
    pub config: WorkerConfig,
    pub storage: CacheStorage,
    pub network: Arc<MockFetcher>,
    pub host: ServiceWorkerHost<OfflineWorker>,
    pub events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
}

impl Harness {
    /// Default config over an in-memory store, every precache URL routed.
    pub fn new() -> Self {
        Self::with(WorkerConfig::default(), CacheStorage::in_memory())
    }

    pub fn with(config: WorkerConfig, storage: CacheStorage) -> Self {
        init_tracing();
        let network = MockFetcher::new(config.origin.as_str());
        for url in config.precache_urls().unwrap() {
            network.route(url.as_str(), 200, url.as_str());
        }
        let worker = OfflineWorker::new(config.clone(), storage.clone(), network.clone()).unwrap();
        let (host, events) = ServiceWorkerHost::new(worker, network.clone());
        Self {
            config,
            storage,
            network,
            host,
            events,
        }
    }

    /// Register and clear the call counter.
    pub async fn activated() -> Self {
        let harness = Self::new();
        harness.host.register().await.unwrap();
        harness.network.reset_calls();
        harness
    }

    pub fn current(&self) -> knot_store::Cache {
        self.storage.handle(&self.config.cache_name)
    }

    pub fn stored(&self, url: &str) -> Option<Response> {
        self.current()
            .match_url(&Url::parse(url).unwrap())
            .unwrap()
    }
}

pub fn get(url: &str) -> Request {
    Request::parse_get(url).unwrap()
}
