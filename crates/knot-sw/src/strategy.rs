//! Response strategies: network-first for data, cache-first for
//! everything else, plain passthrough, and media prefetch.

use std::sync::Arc;

use futures::future::join_all;
use knot_net::{Fetcher, Request, RequestMode, Response, UrlPattern};
use knot_store::{Cache, CacheStorage};
use tracing::{debug, error, warn};
use url::Url;

use crate::Result;

/// Outcome of a media prefetch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MediaPrefetchReport {
    /// URLs whose responses were stored.
    pub cached: Vec<Url>,
    /// URLs that could not be fetched or stored, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Strategies bound to one cache generation and one network.
pub struct Strategies {
    storage: CacheStorage,
    cache_name: String,
    fetcher: Arc<dyn Fetcher>,
    media: Vec<UrlPattern>,
}

impl Strategies {
    pub fn new(
        storage: CacheStorage,
        cache_name: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        media_extensions: &[String],
    ) -> Self {
        Self {
            storage,
            cache_name: cache_name.into(),
            fetcher,
            media: media_extensions
                .iter()
                .map(|ext| UrlPattern::extension(ext))
                .collect(),
        }
    }

    /// Whether `url` names a media resource.
    pub fn is_media(&self, url: &Url) -> bool {
        UrlPattern::any(&self.media, url)
    }

    fn cache(&self) -> Cache {
        self.storage.handle(&self.cache_name)
    }

    /// Store a copy of `response`. Failures are logged and swallowed.
    fn store(&self, request: &Request, response: Response) {
        let result = self
            .storage
            .open(&self.cache_name)
            .and_then(|cache| cache.put(request, response));
        if let Err(e) = result {
            error!(url = %request.url, error = %e, "Failed to update cache");
        }
    }

    /// Network first. A successful basic response is stored before it is
    /// returned. When the network fails the cached copy is served; with
    /// no copy the network error is returned.
    pub async fn network_first(&self, request: Request) -> Result<Response> {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() && response.is_basic() {
                    self.store(&request, response.clone());
                }
                Ok(response)
            }
            Err(err) => match self.cache().match_request(&request) {
                Ok(Some(cached)) => {
                    debug!(url = %request.url, error = %err, "Network failed, serving cached data");
                    Ok(cached)
                }
                Ok(None) => Err(err.into()),
                Err(store_err) => {
                    error!(url = %request.url, error = %store_err, "Cache lookup failed");
                    Err(err.into())
                }
            },
        }
    }

    /// Cache first. On a miss the network answers; a 200 basic response
    /// for a media URL is stored before it is returned. Network failure
    /// yields a synthetic 503, never an error.
    pub async fn cache_first(&self, request: Request) -> Response {
        match self.cache().match_request(&request) {
            Ok(Some(cached)) => {
                debug!(url = %request.url, "Cache hit");
                return cached;
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, using network"),
        }

        let response = match self.fetcher.fetch(request.clone()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed");
                return Response::service_unavailable();
            }
        };

        if response.status != 200 || !response.is_basic() {
            return response;
        }

        if self.is_media(&request.url) {
            self.store(&request, response.clone());
        }
        response
    }

    /// Forward to the network without touching the cache.
    pub async fn passthrough(&self, request: Request) -> Result<Response> {
        Ok(self.fetcher.fetch(request).await?)
    }

    /// Fetch every URL in no-cors mode and store whatever comes back,
    /// opaque responses included. Each URL succeeds or fails on its own.
    pub async fn prefetch_media(&self, urls: &[String]) -> MediaPrefetchReport {
        let outcomes = join_all(urls.iter().map(|raw| self.prefetch_one(raw))).await;

        let mut report = MediaPrefetchReport::default();
        for (raw, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                Ok(url) => report.cached.push(url),
                Err(reason) => {
                    warn!(url = %raw, error = %reason, "Failed to cache media");
                    report.failed.push((raw.clone(), reason));
                }
            }
        }
        report
    }

    async fn prefetch_one(&self, raw: &str) -> std::result::Result<Url, String> {
        let url = Url::parse(raw).map_err(|e| e.to_string())?;
        let request = Request::get(url.clone()).mode(RequestMode::NoCors);
        let response = self
            .fetcher
            .fetch(request)
            .await
            .map_err(|e| e.to_string())?;
        self.storage
            .open(&self.cache_name)
            .and_then(|cache| cache.put_url(&url, response))
            .map_err(|e| e.to_string())?;
        Ok(url)
    }
}
