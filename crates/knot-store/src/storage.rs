//! Generation handle (`CacheStorage`) and per-generation handle (`Cache`).

use std::sync::Arc;

use knot_net::{Request, Response};
use tracing::{debug, info};
use url::Url;

use crate::backend::{CacheBackend, MemoryBackend};
use crate::{CacheEntry, CacheKey, StoreResult};

/// All cache generations for one origin.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStorage {
    /// Create storage over `backend`.
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Storage that lives only in this process.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Open a cache, creating it if absent.
    pub fn open(&self, name: &str) -> StoreResult<Cache> {
        self.backend.create(name)?;
        Ok(Cache {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        })
    }

    /// Handle to a cache without creating it. Lookups in a missing cache
    /// find nothing; writes fail with `CacheNotFound`.
    pub fn handle(&self, name: &str) -> Cache {
        Cache {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        }
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> StoreResult<bool> {
        self.backend.has(name)
    }

    /// Delete a cache.
    pub fn delete(&self, name: &str) -> StoreResult<bool> {
        let deleted = self.backend.delete(name)?;
        if deleted {
            info!(cache = name, "Deleted cache");
        }
        Ok(deleted)
    }

    /// Get all cache names, oldest first.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.backend.names()
    }
}

/// One named cache generation.
#[derive(Clone)]
pub struct Cache {
    name: String,
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("name", &self.name).finish()
    }
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request. Non-GET requests never match.
    pub fn match_request(&self, request: &Request) -> StoreResult<Option<Response>> {
        if !request.is_get() {
            return Ok(None);
        }
        self.match_key(&CacheKey::from_url(&request.url))
    }

    /// Match a GET of `url`.
    pub fn match_url(&self, url: &Url) -> StoreResult<Option<Response>> {
        self.match_key(&CacheKey::from_url(url))
    }

    fn match_key(&self, key: &CacheKey) -> StoreResult<Option<Response>> {
        match self.backend.get(&self.name, key)? {
            Some(entry) => Ok(Some(entry.to_response()?)),
            None => Ok(None),
        }
    }

    /// Store `response` under `request`, replacing any previous entry.
    pub fn put(&self, request: &Request, response: Response) -> StoreResult<()> {
        let key = CacheKey::from_request(request)?;
        self.put_entries(vec![CacheEntry::new(key, &response)])
    }

    /// Store `response` as the answer to a GET of `url`.
    pub fn put_url(&self, url: &Url, response: Response) -> StoreResult<()> {
        self.put_entries(vec![CacheEntry::new(CacheKey::from_url(url), &response)])
    }

    /// Store every pair, or none of them.
    pub fn put_all(&self, pairs: Vec<(Request, Response)>) -> StoreResult<()> {
        let entries = pairs
            .iter()
            .map(|(request, response)| {
                CacheKey::from_request(request).map(|key| CacheEntry::new(key, response))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        self.put_entries(entries)
    }

    fn put_entries(&self, entries: Vec<CacheEntry>) -> StoreResult<()> {
        for entry in &entries {
            debug!(cache = %self.name, key = %entry.key, status = entry.status, "Caching response");
        }
        self.backend.put(&self.name, entries)
    }

    /// Delete the entry for `request`.
    pub fn delete(&self, request: &Request) -> StoreResult<bool> {
        if !request.is_get() {
            return Ok(false);
        }
        self.backend
            .remove(&self.name, &CacheKey::from_url(&request.url))
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> StoreResult<Vec<CacheKey>> {
        self.backend.keys(&self.name)
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SqliteBackend, StoreError};
    use http::Method;

    fn request(url: &str) -> Request {
        Request::parse_get(url).unwrap()
    }

    fn storages() -> Vec<CacheStorage> {
        vec![
            CacheStorage::in_memory(),
            CacheStorage::new(SqliteBackend::open_in_memory().unwrap()),
        ]
    }

    #[test]
    fn test_open_creates_cache() {
        for storage in storages() {
            assert!(!storage.has("v1").unwrap());
            storage.open("v1").unwrap();
            assert!(storage.has("v1").unwrap());
            assert!(storage.delete("v1").unwrap());
            assert!(!storage.has("v1").unwrap());
        }
    }

    #[test]
    fn test_match_after_put() {
        for storage in storages() {
            let cache = storage.open("v1").unwrap();
            let req = request("https://example.com/style.css");
            let response = Response::synthetic(200, "OK", "body{}");

            cache.put(&req, response.clone()).unwrap();

            assert_eq!(cache.match_request(&req).unwrap(), Some(response));
            assert!(cache
                .match_request(&request("https://example.com/other.css"))
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_put_rejects_non_get() {
        for storage in storages() {
            let cache = storage.open("v1").unwrap();
            let url = Url::parse("https://example.com/api").unwrap();
            let post = Request::new(Method::POST, url);

            let result = cache.put(&post, Response::synthetic(200, "OK", ""));
            assert!(matches!(result, Err(StoreError::UnsupportedMethod(_))));
            assert!(cache.is_empty().unwrap());
            assert!(cache.match_request(&post).unwrap().is_none());
        }
    }

    #[test]
    fn test_put_all_is_all_or_nothing() {
        for storage in storages() {
            let cache = storage.open("v1").unwrap();
            let url = Url::parse("https://example.com/api").unwrap();
            let pairs = vec![
                (request("https://example.com/a"), Response::synthetic(200, "OK", "a")),
                (Request::new(Method::PUT, url), Response::synthetic(200, "OK", "b")),
            ];

            assert!(cache.put_all(pairs).is_err());
            assert!(cache.is_empty().unwrap());
        }
    }

    #[test]
    fn test_handles_share_backend() {
        let storage = CacheStorage::in_memory();
        let writer = storage.open("v1").unwrap();
        writer
            .put(&request("https://example.com/a.png"), Response::synthetic(200, "OK", "a"))
            .unwrap();

        let reader = storage.clone().open("v1").unwrap();
        assert_eq!(reader.len().unwrap(), 1);
    }

    #[test]
    fn test_delete_entry() {
        for storage in storages() {
            let cache = storage.open("v1").unwrap();
            let req = request("https://example.com/a.js");
            cache.put(&req, Response::synthetic(200, "OK", "a")).unwrap();
            assert!(cache.delete(&req).unwrap());
            assert!(cache.match_request(&req).unwrap().is_none());
        }
    }

    #[test]
    fn test_keys_in_creation_order() {
        for storage in storages() {
            storage.open("knot-app-cache-v0").unwrap();
            storage.open("knot-app-cache-v1").unwrap();
            assert_eq!(
                storage.keys().unwrap(),
                vec!["knot-app-cache-v0", "knot-app-cache-v1"]
            );
        }
    }

    #[test]
    fn test_handle_does_not_create() {
        for storage in storages() {
            let cache = storage.handle("v1");
            let req = request("https://example.com/a.js");
            assert!(cache.match_request(&req).unwrap().is_none());
            assert!(matches!(
                cache.put(&req, Response::synthetic(200, "OK", "a")),
                Err(StoreError::CacheNotFound(_))
            ));
            assert!(!storage.has("v1").unwrap());
        }
    }
}
