//! The repo: top-level orchestrator
//!
//! Owns the identity, the adapters, the live document registry, and the
//! synchronizer task. Adapters get their host reference at `start` and
//! may register channels until they are stopped; everything else reaches
//! the model by message dispatch only.

use crate::executor::Executor;
use crate::handle::DocHandle;
use crate::message::Message;
use crate::middleware::{Middleware, MiddlewarePipeline};
use crate::model::{Model, DEFAULT_HEARTBEAT_INTERVAL};
use crate::registry::DocRegistry;
use crate::synchronizer::{Control, Input, SyncHandle, Synchronizer, UpdateSink};
use folio_core::{AllowAll, DocId, PeerId, PeerIdentity, PeerKind, PermissionPolicy};
use folio_transport::{Adapter, AdapterHost, TransportError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Repo construction and runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// An adapter failed to start or stop
    #[error("adapter error: {0}")]
    Adapter(#[from] TransportError),
    /// The synchronizer task is gone
    #[error("synchronizer terminated")]
    Terminated,
}

/// Everything a repo can be configured with; all fields optional
pub struct RepoConfig {
    /// Human-readable name sent in establish handshakes
    pub name: Option<String>,
    /// User or service
    pub kind: PeerKind,
    /// Transports to start with the repo
    pub adapters: Vec<Arc<dyn Adapter>>,
    /// Synchronous policy hooks
    pub permissions: Arc<dyn PermissionPolicy>,
    /// Ordered async inbound checks
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Ephemeral heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Debug sink for model transition summaries
    pub on_update: Option<UpdateSink>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: None,
            kind: PeerKind::User,
            adapters: Vec::new(),
            permissions: Arc::new(AllowAll),
            middleware: Vec::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            on_update: None,
        }
    }
}

impl RepoConfig {
    /// Start from defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handshake name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark this repo as a service peer
    pub fn as_service(mut self) -> Self {
        self.kind = PeerKind::Service;
        self
    }

    /// Add one adapter
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Install the permission policy
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionPolicy>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Append one middleware stage
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Override the heartbeat cadence
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Install the transition debug sink
    pub fn with_update_sink(mut self, sink: UpdateSink) -> Self {
        self.on_update = Some(sink);
        self
    }
}

impl std::fmt::Debug for RepoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("adapters", &self.adapters.len())
            .field("middleware", &self.middleware.len())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

/// Top-level orchestrator
pub struct Repo {
    identity: PeerIdentity,
    handle: SyncHandle,
    adapters: Vec<Arc<dyn Adapter>>,
    task: Option<JoinHandle<()>>,
}

impl Repo {
    /// Build the synchronizer and start every adapter
    pub async fn new(config: RepoConfig) -> Result<Self, RepoError> {
        let identity = PeerIdentity {
            peer_id: PeerId::random(),
            name: config.name,
            kind: config.kind,
        };
        let (mailbox, inputs) = mpsc::unbounded_channel();
        let registry = DocRegistry::new();
        let ports = Arc::new(RwLock::new(HashMap::new()));
        let model = Model::new(
            identity.clone(),
            config.permissions,
            config.heartbeat_interval,
        );
        let synchronizer = Synchronizer {
            model,
            executor: Executor::new(registry.clone(), ports.clone(), mailbox.clone()),
            middleware: MiddlewarePipeline::new(config.middleware),
            inputs,
            registry: registry.clone(),
            on_update: config.on_update,
        };
        let task = tokio::spawn(synchronizer.run());
        let handle = SyncHandle::new(mailbox, registry, ports);

        // the first heartbeat dispatch arms the recurring timer
        let _ = handle.mailbox.send(Input::Message(Message::Heartbeat));

        let repo = Self {
            identity,
            handle,
            adapters: config.adapters,
            task: Some(task),
        };
        for adapter in &repo.adapters {
            let host: Arc<dyn AdapterHost> = Arc::new(repo.handle.clone());
            adapter.start(host).await?;
        }
        Ok(repo)
    }

    /// Our stable peer id
    pub fn peer_id(&self) -> &PeerId {
        &self.identity.peer_id
    }

    /// Start one more adapter on a running repo (e.g. a reconnect)
    pub async fn add_adapter(&mut self, adapter: Arc<dyn Adapter>) -> Result<(), RepoError> {
        let host: Arc<dyn AdapterHost> = Arc::new(self.handle.clone());
        adapter.start(host).await?;
        self.adapters.push(adapter);
        Ok(())
    }

    /// Get (creating if needed) a handle for a document
    ///
    /// Returns immediately; the underlying document exists but may be
    /// empty until peers or storage deliver state.
    pub fn get(&self, doc_id: impl Into<DocId>) -> DocHandle {
        let doc_id = doc_id.into();
        let shared = self
            .handle
            .registry
            .ensure(&doc_id, self.handle.mailbox.clone());
        let _ = self.handle.mailbox.send(Input::Message(Message::DocEnsure {
            doc_id: doc_id.clone(),
        }));
        DocHandle::new(
            doc_id,
            self.identity.peer_id.clone(),
            shared,
            self.handle.mailbox.clone(),
        )
    }

    /// Drop the local copy of a document and tell peers about it
    pub fn delete(&self, doc_id: impl Into<DocId>) {
        let _ = self.handle.mailbox.send(Input::Message(Message::DocDelete {
            doc_id: doc_id.into(),
        }));
    }

    /// Disconnect all adapters and return to the initial model
    pub async fn reset(&self) -> Result<(), RepoError> {
        for adapter in &self.adapters {
            adapter.stop().await?;
        }
        let (ack, done) = oneshot::channel();
        self.handle
            .mailbox
            .send(Input::Control(Control::Reset { ack }))
            .map_err(|_| RepoError::Terminated)?;
        done.await.map_err(|_| RepoError::Terminated)
    }

    /// Graceful teardown: stop adapters, then the synchronizer task
    pub async fn shutdown(mut self) -> Result<(), RepoError> {
        for adapter in &self.adapters {
            adapter.stop().await?;
        }
        let (ack, done) = oneshot::channel();
        self.handle
            .mailbox
            .send(Input::Control(Control::Shutdown { ack }))
            .map_err(|_| RepoError::Terminated)?;
        done.await.map_err(|_| RepoError::Terminated)?;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("peer_id", &self.identity.peer_id)
            .field("adapters", &self.adapters.len())
            .finish()
    }
}
