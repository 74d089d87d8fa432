//! Document handles
//!
//! `repo.get` returns immediately with a handle whose underlying
//! document exists but may still be empty; readiness is something the
//! application observes, per channel, through the ready-state vector.
//! Handles hold the document id and shared per-document resources, never
//! the synchronizer itself, so dropping a handle never tears anything
//! down.

use crate::message::Message;
use crate::registry::{DocShared, EphemeralEvent};
use crate::synchronizer::Input;
use folio_core::ready::{any_network_found, any_storage_found};
use folio_core::{DocId, PeerId, ReadyState, SharedDoc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use yrs::{MapRef, TransactionMut};

/// A ready-state wait gave up
#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out after {waited:?} waiting for ready state")]
pub struct WaitTimeout {
    /// How long the wait ran
    pub waited: Duration,
}

/// Application-facing facade over one document
#[derive(Clone)]
pub struct DocHandle {
    doc_id: DocId,
    peer_id: PeerId,
    shared: Arc<DocShared>,
    mailbox: mpsc::UnboundedSender<Input>,
}

impl DocHandle {
    pub(crate) fn new(
        doc_id: DocId,
        peer_id: PeerId,
        shared: Arc<DocShared>,
        mailbox: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            doc_id,
            peer_id,
            shared,
            mailbox,
        }
    }

    /// The document's id
    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    /// Our own stable peer id
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Direct access to the CRDT document
    pub fn doc(&self) -> SharedDoc {
        self.shared.doc.clone()
    }

    /// Get or create a named root map
    pub fn get_map(&self, name: &str) -> MapRef {
        self.shared.doc.get_map(name)
    }

    /// Apply a mutator inside one commit
    ///
    /// The commit is observed through the engine subscription, which is
    /// what triggers the synchronizer broadcast to subscribed peers.
    pub fn change<F, R>(&self, mutator: F) -> R
    where
        F: FnOnce(&mut TransactionMut) -> R,
    {
        self.shared.doc.with_transaction(mutator)
    }

    /// Plain JSON projection of the document
    pub fn to_json(&self) -> serde_json::Value {
        self.shared.doc.to_json()
    }

    /// Current per-channel ready states
    pub fn ready_states(&self) -> Vec<ReadyState> {
        self.shared.ready_tx.subscribe().borrow().clone()
    }

    /// Wait until the predicate holds over the ready-state vector
    ///
    /// With a timeout, gives up with [`WaitTimeout`]; the model is
    /// unaffected either way, and the internal subscription is released
    /// on both outcomes.
    pub async fn wait_until_ready<P>(
        &self,
        mut predicate: P,
        timeout: Option<Duration>,
    ) -> Result<(), WaitTimeout>
    where
        P: FnMut(&[ReadyState]) -> bool,
    {
        let mut ready = self.shared.ready_tx.subscribe();
        let wait = async move {
            loop {
                let satisfied = predicate(ready.borrow().as_slice());
                if satisfied {
                    return;
                }
                if ready.changed().await.is_err() {
                    // document dropped; only a timeout can end this wait
                    futures::future::pending::<()>().await;
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| WaitTimeout { waited: limit }),
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    /// Wait until any storage channel found the document
    pub async fn wait_for_storage(&self, timeout: Option<Duration>) -> Result<(), WaitTimeout> {
        self.wait_until_ready(any_storage_found, timeout).await
    }

    /// Wait until any network channel found the document
    pub async fn wait_for_network(&self, timeout: Option<Duration>) -> Result<(), WaitTimeout> {
        self.wait_until_ready(any_network_found, timeout).await
    }

    /// Presence accessor for this document
    pub fn ephemeral(&self) -> EphemeralScope {
        EphemeralScope {
            doc_id: self.doc_id.clone(),
            peer_id: self.peer_id.clone(),
            shared: self.shared.clone(),
            mailbox: self.mailbox.clone(),
        }
    }
}

impl std::fmt::Debug for DocHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocHandle")
            .field("doc_id", &self.doc_id)
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

/// Namespaced presence accessor
#[derive(Clone)]
pub struct EphemeralScope {
    doc_id: DocId,
    peer_id: PeerId,
    shared: Arc<DocShared>,
    mailbox: mpsc::UnboundedSender<Input>,
}

impl EphemeralScope {
    /// Replace our own presence value and broadcast it
    pub fn set(&self, value: serde_json::Value) {
        let _ = self
            .mailbox
            .send(Input::Message(Message::EphemeralLocalChange {
                doc_id: self.doc_id.clone(),
                value,
            }));
    }

    /// One peer's current value
    pub fn get(&self, peer_id: &PeerId) -> Option<serde_json::Value> {
        self.shared.ephemeral_mirror.read().get(peer_id).cloned()
    }

    /// Our own current value
    pub fn self_value(&self) -> Option<serde_json::Value> {
        self.get(&self.peer_id)
    }

    /// All current values, by writer
    pub fn all(&self) -> BTreeMap<PeerId, serde_json::Value> {
        self.shared.ephemeral_mirror.read().clone()
    }

    /// Subscribe to presence change events
    pub fn subscribe(&self) -> broadcast::Receiver<EphemeralEvent> {
        self.shared.ephemeral_tx.subscribe()
    }
}
