//! # Knot Service Worker
//!
//! The offline caching worker for the Knot app. It sits between the
//! app's pages and the network, keeps one named cache generation, and
//! decides per request whether to answer from the cache, the network,
//! or both.
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost            (host adapter: state machine, clients)
//!     │  install / activate / fetch / message
//!     ▼
//! OfflineWorker: WorkerHandler
//!     ├── GenerationManager    precache on install, drop stale caches on activate
//!     ├── RequestClassifier    passthrough | data (.json) | default
//!     └── Strategies           network-first, cache-first, passthrough, media prefetch
//!             │
//!             ├── Cache        (knot-store)
//!             └── Fetcher      (knot-net)
//! ```

use knot_net::NetError;
use knot_store::StoreError;
use thiserror::Error;

pub mod classify;
pub mod config;
pub mod generation;
pub mod host;
pub mod lifecycle;
pub mod message;
pub mod strategy;
pub mod worker;

pub use classify::{PassthroughReason, RequestClass, RequestClassifier};
pub use config::{WorkerConfig, CACHE_NAME};
pub use generation::GenerationManager;
pub use host::{ServiceWorkerEvent, ServiceWorkerHost};
pub use lifecycle::{
    Client, ClientId, Clients, FetchEvent, MessageEvent, ServiceWorkerId, WorkerHandler,
    WorkerScope, WorkerState,
};
pub use message::ControlMessage;
pub use strategy::{MediaPrefetchReport, Strategies};
pub use worker::OfflineWorker;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed at {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
