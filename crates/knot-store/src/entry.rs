//! Cache keys and stored response snapshots.

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue};
use knot_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{StoreError, StoreResult};

/// Canonical request descriptor: a GET of a URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a GET of `url`.
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// Key for `request`. Fails for anything but GET.
    pub fn from_request(request: &Request) -> StoreResult<Self> {
        if !request.is_get() {
            return Err(StoreError::UnsupportedMethod(request.method.to_string()));
        }
        Ok(Self::from_url(&request.url))
    }

    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Final response URL, absent for synthetic responses.
    pub url: Option<String>,
    pub status: u16,
    pub status_text: String,
    /// Header names and raw value bytes, in order.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    pub response_type: ResponseType,
    pub redirected: bool,
    /// Milliseconds since the Unix epoch.
    pub cached_at: i64,
}

impl CacheEntry {
    /// Snapshot `response` under `key`.
    pub fn new(key: CacheKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            key,
            url: response.url.as_ref().map(|u| u.to_string()),
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            body: response.body.to_vec(),
            response_type: response.response_type,
            redirected: response.redirected,
            cached_at: Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild the response this entry was taken from.
    pub fn to_response(&self) -> StoreResult<Response> {
        let corrupt = |reason: String| StoreError::Corrupt {
            key: self.key.to_string(),
            reason,
        };

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| corrupt(e.to_string()))?;
            let value = HeaderValue::from_bytes(value).map_err(|e| corrupt(e.to_string()))?;
            headers.append(name, value);
        }

        let url = match self.url {
            Some(ref raw) => Some(Url::parse(raw).map_err(|e| corrupt(e.to_string()))?),
            None => None,
        };

        Ok(Response {
            url,
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: self.response_type,
            redirected: self.redirected,
        })
    }
}
