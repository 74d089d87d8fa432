//! Live document registry
//!
//! The registry owns the actual CRDT instances and the per-document
//! publishers applications observe. `repo.get` creates entries
//! synchronously so a handle is available immediately; the executor
//! attaches to the same entries when it runs imports, exports, and
//! ready-state emissions. Entries are removed only by document deletion
//! or a repo reset, which is what bounds handle lifetimes.

use crate::message::Message;
use crate::synchronizer::Input;
use folio_core::{DocId, DocSubscription, PeerId, ReadyState, SharedDoc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// One observed presence change, delivered to `ephemeral().subscribe()`
#[derive(Debug, Clone)]
pub struct EphemeralEvent {
    /// Document the change belongs to
    pub doc_id: DocId,
    /// Whose entry changed
    pub peer_id: PeerId,
    /// New value; `None` means the entry went away
    pub value: Option<serde_json::Value>,
}

/// Shared per-document resources behind every handle
pub(crate) struct DocShared {
    /// The live CRDT instance
    pub doc: SharedDoc,
    /// Ready-state snapshots; watch, so late subscribers see the latest
    pub ready_tx: watch::Sender<Vec<ReadyState>>,
    /// Presence change events
    pub ephemeral_tx: broadcast::Sender<EphemeralEvent>,
    /// Presence mirror for synchronous reads
    pub ephemeral_mirror: RwLock<BTreeMap<PeerId, serde_json::Value>>,
    /// Keeps the local-commit subscription alive
    _update_sub: Mutex<Option<DocSubscription>>,
}

/// Synchronized map of live documents
#[derive(Clone)]
pub(crate) struct DocRegistry {
    inner: Arc<RwLock<HashMap<DocId, Arc<DocShared>>>>,
}

impl DocRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or create the shared state for a document
    ///
    /// Creation wires the document's local-commit subscription into the
    /// dispatch mailbox, so every `change` on a handle becomes a
    /// `LocalDocChange` message.
    pub fn ensure(
        &self,
        doc_id: &DocId,
        mailbox: mpsc::UnboundedSender<Input>,
    ) -> Arc<DocShared> {
        if let Some(existing) = self.inner.read().get(doc_id) {
            return existing.clone();
        }
        let mut inner = self.inner.write();
        if let Some(existing) = inner.get(doc_id) {
            return existing.clone();
        }

        let doc = SharedDoc::new();
        let (ready_tx, _) = watch::channel(Vec::new());
        let (ephemeral_tx, _) = broadcast::channel(256);
        let subscription = {
            let doc_id = doc_id.clone();
            doc.observe_local_updates(move |update| {
                let _ = mailbox.send(Input::Message(Message::LocalDocChange {
                    doc_id: doc_id.clone(),
                    data: update.data,
                    version: update.version,
                }));
            })
        };
        let subscription = match subscription {
            Ok(sub) => Some(sub),
            Err(e) => {
                tracing::error!(
                    target: "folio::sync",
                    doc = %doc_id,
                    error = %e,
                    "local-update subscription failed; commits will not stream"
                );
                None
            }
        };

        let shared = Arc::new(DocShared {
            doc,
            ready_tx,
            ephemeral_tx,
            ephemeral_mirror: RwLock::new(BTreeMap::new()),
            _update_sub: Mutex::new(subscription),
        });
        inner.insert(doc_id.clone(), shared.clone());
        shared
    }

    pub fn get(&self, doc_id: &DocId) -> Option<Arc<DocShared>> {
        self.inner.read().get(doc_id).cloned()
    }

    pub fn remove(&self, doc_id: &DocId) {
        self.inner.write().remove(doc_id);
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl DocShared {
    /// Publish a fresh ready-state snapshot
    pub fn publish_ready(&self, states: Vec<ReadyState>) {
        let _ = self.ready_tx.send(states);
    }

    /// Apply presence deltas to the mirror and notify subscribers
    pub fn publish_ephemeral(&self, doc_id: &DocId, changes: Vec<(PeerId, Option<serde_json::Value>)>) {
        let mut mirror = self.ephemeral_mirror.write();
        for (peer_id, value) in changes {
            match &value {
                Some(v) => {
                    mirror.insert(peer_id.clone(), v.clone());
                }
                None => {
                    mirror.remove(&peer_id);
                }
            }
            let _ = self.ephemeral_tx.send(EphemeralEvent {
                doc_id: doc_id.clone(),
                peer_id,
                value,
            });
        }
    }
}
