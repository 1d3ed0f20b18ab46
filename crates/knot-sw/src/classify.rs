//! Request routing.

use knot_net::{same_origin, Request, UrlPattern};
use url::Url;

use crate::WorkerConfig;

/// Why a request is left to the network untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Only GET requests are cacheable.
    NonGet,
    /// Cross-origin and not on the allow-list.
    DisallowedOrigin,
}

/// Where an intercepted request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Not intercepted; forwarded to the network as-is.
    Passthrough(PassthroughReason),
    /// Data (`.json`): network first, cache fallback.
    Data,
    /// Everything else: cache first, network fallback.
    Default,
}

/// Classifies requests relative to the controlled origin.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Url,
    allowed_hosts: Vec<UrlPattern>,
    data: UrlPattern,
}

impl RequestClassifier {
    /// Classifier for pages at `origin`. Requests whose URL contains one
    /// of `allowed_hosts` are intercepted even when cross-origin.
    pub fn new(origin: Url, allowed_hosts: &[String]) -> Self {
        Self {
            origin,
            allowed_hosts: allowed_hosts
                .iter()
                .map(|host| UrlPattern::contains(host))
                .collect(),
            data: UrlPattern::path_suffix(".json"),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.origin.clone(), &config.allowed_hosts)
    }

    /// Classify a request. Rules apply in order; the first match wins.
    pub fn classify(&self, request: &Request) -> RequestClass {
        if !request.is_get() {
            return RequestClass::Passthrough(PassthroughReason::NonGet);
        }
        if !self.is_intercepted(&request.url) {
            return RequestClass::Passthrough(PassthroughReason::DisallowedOrigin);
        }
        if self.data.matches(&request.url) {
            return RequestClass::Data;
        }
        RequestClass::Default
    }

    fn is_intercepted(&self, url: &Url) -> bool {
        same_origin(url, &self.origin) || UrlPattern::any(&self.allowed_hosts, url)
    }
}
