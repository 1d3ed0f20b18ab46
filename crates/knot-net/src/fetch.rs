//! The network fetch primitive.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{same_origin, NetError, Request, RequestMode, Response, ResponseType};

/// Anything that can turn a [`Request`] into a [`Response`].
///
/// Every network call the agent makes goes through this trait, so tests
/// can swap in a double that counts calls or simulates being offline.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Overall request timeout. `None` leaves failure detection to the
    /// network stack.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("KnotAgent/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            timeout: None,
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// [`Fetcher`] backed by `reqwest`, typing responses relative to `origin`.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
    origin: Url,
}

impl HttpFetcher {
    /// Create a new fetcher acting on behalf of pages at `origin`.
    pub fn new(config: LoaderConfig, origin: Url) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %origin, "HttpFetcher initialized");

        Ok(Self {
            client,
            config,
            origin,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn classify(&self, final_url: &Url, mode: RequestMode) -> Result<ResponseType, NetError> {
        if same_origin(final_url, &self.origin) {
            return Ok(ResponseType::Basic);
        }
        match mode {
            RequestMode::SameOrigin => Err(NetError::CrossOrigin(final_url.clone())),
            RequestMode::Cors => Ok(ResponseType::Cors),
            RequestMode::NoCors => Ok(ResponseType::Opaque),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        // Fail before touching the network when the mode forbids it.
        if request.mode == RequestMode::SameOrigin && !same_origin(&request.url, &self.origin) {
            return Err(NetError::CrossOrigin(request.url));
        }

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(ref referrer) = request.referrer {
            req_builder = req_builder.header("Referer", referrer.as_str());
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let redirected = final_url != request.url;
        let response_type = self.classify(&final_url, request.mode)?;

        let body = response.bytes().await?;

        trace!(
            url = %final_url,
            status = %status,
            response_type = response_type.as_str(),
            body_len = body.len(),
            "Response received"
        );

        let mut response = match response_type {
            ResponseType::Opaque => Response::opaque(final_url, body),
            ty => Response::fetched(final_url, status, headers, body, ty),
        };
        response.redirected = redirected;
        Ok(response)
    }
}
