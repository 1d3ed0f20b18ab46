//! Cache generations: precache on install, drop stale generations on
//! activate.

use std::sync::Arc;

use futures::future::try_join_all;
use knot_net::{Fetcher, Request, Response};
use knot_store::{Cache, CacheStorage};
use tracing::{debug, info};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Owns the current generation name and its precache set.
pub struct GenerationManager {
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    cache_name: String,
    precache: Vec<Url>,
}

impl GenerationManager {
    pub fn new(
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        cache_name: impl Into<String>,
        precache: Vec<Url>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            cache_name: cache_name.into(),
            precache,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Open the current generation and fill it with the precache set.
    ///
    /// All URLs are fetched concurrently. Any network error or non-2xx
    /// status fails the install and nothing is written; otherwise every
    /// response is written in one batch.
    pub async fn install(&self) -> Result<Cache> {
        info!(cache = %self.cache_name, count = self.precache.len(), "Caching app resources");

        let cache = self.storage.open(&self.cache_name)?;

        let pairs = try_join_all(self.precache.iter().map(|url| self.fetch_one(url))).await?;
        cache.put_all(pairs)?;

        debug!(cache = %self.cache_name, entries = cache.len()?, "Precache complete");
        Ok(cache)
    }

    async fn fetch_one(&self, url: &Url) -> Result<(Request, Response)> {
        let request = Request::get(url.clone());
        let response = self
            .fetcher
            .fetch(request.clone())
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed {
                url: url.to_string(),
                reason: format!("status {}", response.status),
            });
        }
        Ok((request, response))
    }

    /// Delete every generation except the current one. Returns the
    /// deleted names.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.keys()? {
            if name == self.cache_name {
                continue;
            }
            info!(cache = %name, "Deleting old cache");
            if self.storage.delete(&name)? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}
