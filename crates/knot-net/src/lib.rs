//! # Knot Net
//!
//! The network side of the Knot offline agent: the request and response
//! values that flow through the interception strategies, and the
//! [`Fetcher`] seam through which every network call is made.
//!
//! ## Response types
//!
//! Each response carries a [`ResponseType`] mirroring what the caller is
//! allowed to inspect:
//!
//! ```text
//! same-origin                  -> Basic   (full status, headers, body)
//! cross-origin, cors mode      -> Cors
//! cross-origin, no-cors mode   -> Opaque  (status 0, no headers; body kept for replay)
//! built locally                -> Default
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod fetch;
pub mod pattern;

pub use fetch::{Fetcher, HttpFetcher, LoaderConfig};
pub use pattern::UrlPattern;

/// Body of the synthetic response returned when the network is unreachable.
pub const NETWORK_ERROR_BODY: &str = "Network error occurred";

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cross-origin request not allowed in same-origin mode: {0}")]
    CrossOrigin(Url),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, controlling what a cross-origin response exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Cross-origin requests fail.
    SameOrigin,
    /// Cross-origin responses are readable.
    #[default]
    Cors,
    /// Cross-origin responses come back opaque.
    NoCors,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub referrer: Option<Url>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            referrer: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse `url` and create a GET request.
    pub fn parse_get(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set referrer.
    pub fn referrer(mut self, referrer: Url) -> Self {
        self.referrer = Some(referrer);
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// What the receiver of a response is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response, fully inspectable.
    Basic,
    /// Cross-origin response fetched in cors mode.
    Cors,
    /// Constructed locally rather than fetched.
    Default,
    /// Cross-origin response fetched in no-cors mode.
    Opaque,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Default => "default",
            ResponseType::Opaque => "opaque",
        }
    }
}

impl std::str::FromStr for ResponseType {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ResponseType::Basic),
            "cors" => Ok(ResponseType::Cors),
            "default" => Ok(ResponseType::Default),
            "opaque" => Ok(ResponseType::Opaque),
            other => Err(NetError::RequestFailed(format!("unknown response type {other}"))),
        }
    }
}

/// A response snapshot.
///
/// The body is fully buffered. Handing the same response both to a
/// caller and to the store requires an explicit `clone()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Final URL after redirects. `None` for synthetic responses.
    pub url: Option<Url>,
    /// Status code; 0 for opaque responses.
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Whether the fetch followed at least one redirect.
    pub redirected: bool,
}

impl Response {
    /// Build a fetched response. The status text is the canonical reason.
    pub fn fetched(
        url: Url,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        response_type: ResponseType,
    ) -> Self {
        Self {
            url: Some(url),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            response_type,
            redirected: false,
        }
    }

    /// An opaque response: nothing but the body survives, for replay only.
    pub fn opaque(url: Url, body: Bytes) -> Self {
        Self {
            url: Some(url),
            status: 0,
            status_text: String::new(),
            headers: HeaderMap::new(),
            body,
            response_type: ResponseType::Opaque,
            redirected: false,
        }
    }

    /// A locally constructed plain-text response.
    pub fn synthetic(status: u16, status_text: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        Self {
            url: None,
            status,
            status_text: status_text.into(),
            headers,
            body: body.into(),
            response_type: ResponseType::Default,
            redirected: false,
        }
    }

    /// The response served when the network fails and nothing is cached.
    pub fn service_unavailable() -> Self {
        Self::synthetic(503, "Service Unavailable", NETWORK_ERROR_BODY)
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_basic(&self) -> bool {
        self.response_type == ResponseType::Basic
    }

    pub fn is_opaque(&self) -> bool {
        self.response_type == ResponseType::Opaque
    }

    /// Get the body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Value of the content-type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
