//! Lifecycle vocabulary shared by the host and worker implementations.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use knot_net::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::Result;

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, nothing run yet.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active and handling fetches.
    Activated,
    /// Install failed; the worker must be installed again.
    Redundant,
}

impl WorkerState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Activated)
    }
}

// ==================== Events ====================

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Client that issued the request, if known.
    pub client_id: Option<ClientId>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// A message posted to the worker.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Value,
    pub source: Option<ClientId>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        Self { data, source: None }
    }
}

// ==================== Handler Seams ====================

/// Host capabilities available to lifecycle handlers.
#[async_trait]
pub trait WorkerScope: Send + Sync {
    /// Ask to be activated as soon as install finishes.
    async fn skip_waiting(&self);

    /// Take control of every open client. Returns how many were claimed.
    async fn claim_clients(&self) -> usize;
}

/// Behaviour of a worker, driven by the host.
///
/// Errors from `handle_install` abort installation. Errors from
/// `handle_activate` leave the worker installed so activation can be
/// retried. `handle_fetch` errors surface to the page as a failed fetch.
#[async_trait]
pub trait WorkerHandler: Send + Sync {
    async fn handle_install(&self, scope: &dyn WorkerScope) -> Result<()>;

    async fn handle_activate(&self, scope: &dyn WorkerScope) -> Result<()>;

    async fn handle_fetch(&self, event: FetchEvent) -> Result<Response>;

    async fn handle_message(&self, event: MessageEvent);
}

// ==================== Clients ====================

/// Identifier of a page controlled (or controllable) by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Whether the active worker controls this page.
    pub controlled: bool,
}

/// Open pages known to the host.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open page.
    pub fn open(&mut self, url: Url, controlled: bool) -> Client {
        let client = Client {
            id: ClientId::next(),
            url,
            controlled,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// All clients ordered by ID, optionally only the controlled ones.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        let mut clients: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| include_uncontrolled || c.controlled)
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    /// Take control of every uncontrolled client. Returns the newly
    /// claimed IDs.
    pub fn claim(&mut self) -> Vec<ClientId> {
        let mut claimed: Vec<ClientId> = self
            .clients
            .values_mut()
            .filter(|c| !c.controlled)
            .map(|c| {
                c.controlled = true;
                c.id.clone()
            })
            .collect();
        claimed.sort();
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(path: &str) -> Url {
        Url::parse("http://localhost:8080/").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_worker_state_default() {
        assert_eq!(WorkerState::default(), WorkerState::Parsed);
        assert!(!WorkerState::Installed.is_active());
        assert!(WorkerState::Activated.is_active());
    }

    #[test]
    fn test_worker_state_serde() {
        let json = serde_json::to_string(&WorkerState::Activated).unwrap();
        assert_eq!(json, "\"activated\"");
    }

    #[test]
    fn test_claim_controls_every_client_once() {
        let mut clients = Clients::new();
        let a = clients.open(page("index.html"), false);
        let b = clients.open(page("tests.html"), false);

        assert!(clients.match_all(false).is_empty());
        assert_eq!(clients.match_all(true).len(), 2);

        let claimed = clients.claim();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.contains(&a.id) && claimed.contains(&b.id));
        assert!(clients.match_all(true).iter().all(|c| c.controlled));

        assert!(clients.claim().is_empty());
        assert_eq!(clients.match_all(false).len(), 2);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let mut clients = Clients::new();
        let a = clients.open(page("a"), false);
        let b = clients.open(page("b"), true);
        assert_ne!(a.id, b.id);
        assert!(a.id.as_str().starts_with("client-"));
        assert_eq!(clients.match_all(false), vec![&b]);
    }
}
