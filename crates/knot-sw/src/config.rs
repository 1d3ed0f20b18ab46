//! Deployment configuration: cache generation name, precache set,
//! allow-listed hosts and media extensions.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Current cache generation. Bump on redeploy to replace the cache.
pub const CACHE_NAME: &str = "knot-app-cache-v1";

const PRECACHE: &[&str] = &[
    "./",
    "./index.html",
    "https://cdn.tailwindcss.com",
    "https://cdn.jsdelivr.net/npm/chart.js@4.4.2/dist/chart.umd.min.js",
    "https://unpkg.com/lucide-static@latest/font/Lucide.ttf",
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;600;700&display=swap",
    "https://fonts.gstatic.com",
    "https://fonts.googleapis.com",
];

const ICON_NAMES: &[&str] = &[
    "list",
    "plus",
    "test-tube",
    "chart-no-axes-combined",
    "download",
    "upload",
    "pencil",
    "trash",
    "eye",
    "chevron-left",
    "book-open",
    "x",
    "check",
    "search",
    "filter",
    "rotate-ccw",
    "save",
    "menu",
];

const ICON_URL_TEMPLATE: &str = "https://unpkg.com/lucide-static@latest/icons/{name}.svg";

const ALLOWED_HOSTS: &[&str] = &[
    "unpkg.com",
    "cdn.jsdelivr.net",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
];

const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "webp", "mp4", "webm"];

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the current cache generation.
    pub cache_name: String,

    /// Origin of the controlled pages; relative precache entries resolve
    /// against it.
    pub origin: Url,

    /// Precache entries, absolute or relative.
    pub precache: Vec<String>,

    /// Icon names templated into `icon_url_template`.
    pub icon_names: Vec<String>,

    /// Icon URL with a `{name}` placeholder.
    pub icon_url_template: String,

    /// Cross-origin hosts whose requests are intercepted (substring match).
    pub allowed_hosts: Vec<String>,

    /// Extensions whose successful responses get cached on first sight.
    pub media_extensions: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
            precache: to_strings(PRECACHE),
            icon_names: to_strings(ICON_NAMES),
            icon_url_template: ICON_URL_TEMPLATE.to_string(),
            allowed_hosts: to_strings(ALLOWED_HOSTS),
            media_extensions: to_strings(MEDIA_EXTENSIONS),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl WorkerConfig {
    /// Default configuration for pages served from `origin`.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: WorkerConfig = serde_json::from_str(&contents).map_err(|e| {
            ServiceWorkerError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config("cache_name is empty".into()));
        }
        if self.origin.cannot_be_a_base() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} cannot be used as a base URL",
                self.origin
            )));
        }
        if !self.icon_names.is_empty() && !self.icon_url_template.contains("{name}") {
            return Err(ServiceWorkerError::Config(
                "icon_url_template has no {name} placeholder".into(),
            ));
        }
        Ok(())
    }

    /// The full precache set: configured entries resolved against the
    /// origin, then one URL per icon. Order is kept, duplicates dropped.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        let icons = self
            .icon_names
            .iter()
            .map(|name| self.icon_url_template.replace("{name}", name));

        let mut urls: Vec<Url> = Vec::with_capacity(self.precache.len() + self.icon_names.len());
        for raw in self.precache.iter().cloned().chain(icons) {
            let url = self.origin.join(&raw).map_err(|e| {
                ServiceWorkerError::Config(format!("Invalid precache URL {raw}: {e}"))
            })?;
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}
