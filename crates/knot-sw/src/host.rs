//! Host adapter: drives a [`WorkerHandler`] through its lifecycle and
//! routes fetches and messages to it.

use std::sync::Arc;

use async_trait::async_trait;
use knot_net::{Fetcher, Request, Response};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};
use url::Url;

use crate::{
    Client, ClientId, Clients, FetchEvent, MessageEvent, Result, ServiceWorkerError,
    ServiceWorkerId, WorkerHandler, WorkerScope, WorkerState,
};

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: WorkerState,
    },
    /// A client came under the worker's control.
    ControllerChange { client_id: ClientId },
}

#[derive(Debug)]
struct WorkerRecord {
    id: ServiceWorkerId,
    state: WorkerState,
    skip_waiting: bool,
}

/// Hosts one worker: owns its state, its clients and the plain network
/// used while no worker is active.
pub struct ServiceWorkerHost<H> {
    handler: Arc<H>,
    network: Arc<dyn Fetcher>,
    record: Arc<RwLock<WorkerRecord>>,
    clients: Arc<RwLock<Clients>>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl<H: WorkerHandler> ServiceWorkerHost<H> {
    /// Create a new host.
    pub fn new(
        handler: H,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let host = Self {
            handler: Arc::new(handler),
            network,
            record: Arc::new(RwLock::new(WorkerRecord {
                id: ServiceWorkerId::new(),
                state: WorkerState::Parsed,
                skip_waiting: false,
            })),
            clients: Arc::new(RwLock::new(Clients::new())),
            event_tx,
        };
        (host, event_rx)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn id(&self) -> ServiceWorkerId {
        self.record.read().await.id
    }

    pub async fn state(&self) -> WorkerState {
        self.record.read().await.state
    }

    fn scope(&self) -> HostScope<'_> {
        HostScope {
            record: &self.record,
            clients: &self.clients,
            event_tx: &self.event_tx,
        }
    }

    /// Move to `next` if the current state is one of `from`.
    async fn transition(&self, from: &[WorkerState], next: WorkerState) -> Result<()> {
        let mut record = self.record.write().await;
        if !from.contains(&record.state) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move from {:?} to {:?}",
                record.state, next
            )));
        }
        self.set_locked(&mut record, next);
        Ok(())
    }

    async fn set_state(&self, next: WorkerState) {
        let mut record = self.record.write().await;
        self.set_locked(&mut record, next);
    }

    fn set_locked(&self, record: &mut WorkerRecord, next: WorkerState) {
        debug!(worker = record.id.raw(), from = ?record.state, to = ?next, "Worker state change");
        record.state = next;
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id: record.id,
            new_state: next,
        });
    }

    // ==================== Lifecycle ====================

    /// Run the install handler. Allowed from `Parsed`, or `Redundant`
    /// after a failed install. Failure leaves the worker `Redundant`.
    pub async fn install(&self) -> Result<()> {
        self.transition(
            &[WorkerState::Parsed, WorkerState::Redundant],
            WorkerState::Installing,
        )
        .await?;
        self.record.write().await.skip_waiting = false;

        match self.handler.handle_install(&self.scope()).await {
            Ok(()) => {
                self.set_state(WorkerState::Installed).await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    /// Run the activate handler. Failure returns the worker to
    /// `Installed` so activation can be retried.
    pub async fn activate(&self) -> Result<()> {
        self.transition(&[WorkerState::Installed], WorkerState::Activating)
            .await?;

        match self.handler.handle_activate(&self.scope()).await {
            Ok(()) => {
                self.set_state(WorkerState::Activated).await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Activate failed");
                self.set_state(WorkerState::Installed).await;
                Err(e)
            }
        }
    }

    /// Install, then activate unless the worker has to wait: it waits
    /// when pages are already controlled and it did not skip waiting.
    pub async fn register(&self) -> Result<WorkerState> {
        self.install().await?;

        let skip_waiting = self.record.read().await.skip_waiting;
        let controlled = self.clients.read().await.match_all(false).len();
        if skip_waiting || controlled == 0 {
            self.activate().await?;
        } else {
            info!(controlled, "Worker installed, waiting for activation");
        }
        Ok(self.state().await)
    }

    /// Mark a worker whose install and activation already happened in an
    /// earlier process as active, without running either handler.
    pub async fn resume_active(&self) -> Result<()> {
        self.transition(&[WorkerState::Parsed], WorkerState::Activated)
            .await
    }

    // ==================== Clients ====================

    /// Register an open page. Pages opened while the worker is active are
    /// controlled immediately.
    pub async fn open_client(&self, url: Url) -> Client {
        let active = self.state().await.is_active();
        self.clients.write().await.open(url, active)
    }

    /// All known pages.
    pub async fn clients(&self) -> Vec<Client> {
        self.clients
            .read()
            .await
            .match_all(true)
            .into_iter()
            .cloned()
            .collect()
    }

    // ==================== Dispatch ====================

    /// Fetch `request` on behalf of a page.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        self.dispatch_fetch(FetchEvent::new(request)).await
    }

    /// Route a fetch to the active worker, or straight to the network
    /// when no worker is active.
    pub async fn dispatch_fetch(&self, event: FetchEvent) -> Result<Response> {
        if !self.state().await.is_active() {
            debug!(url = %event.request.url, "No active worker, using network");
            return Ok(self.network.fetch(event.request).await?);
        }
        self.handler.handle_fetch(event).await
    }

    /// Deliver a message. Fails when the worker has not been installed.
    pub async fn post_message(&self, data: Value) -> Result<()> {
        let state = self.state().await;
        if matches!(state, WorkerState::Parsed | WorkerState::Redundant) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot deliver message in state {state:?}"
            )));
        }
        self.handler.handle_message(MessageEvent::new(data)).await;
        Ok(())
    }
}

/// Scope handed to lifecycle handlers.
struct HostScope<'a> {
    record: &'a RwLock<WorkerRecord>,
    clients: &'a RwLock<Clients>,
    event_tx: &'a mpsc::UnboundedSender<ServiceWorkerEvent>,
}

#[async_trait]
impl<'a> WorkerScope for HostScope<'a> {
    async fn skip_waiting(&self) {
        self.record.write().await.skip_waiting = true;
    }

    async fn claim_clients(&self) -> usize {
        let claimed = self.clients.write().await.claim();
        for client_id in &claimed {
            let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
            });
        }
        claimed.len()
    }
}
