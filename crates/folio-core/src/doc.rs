//! CRDT engine wrapper
//!
//! The synchronizer consumes the engine through this narrow surface:
//! create an empty document, import snapshot/update bytes, export either a
//! full snapshot or a delta since a version, read the current version
//! vector, and subscribe to local commits. Everything else about the
//! engine (merge order, compaction, container semantics) stays opaque.
//!
//! Remote imports are tagged with a transaction origin so the local-commit
//! subscription can tell application edits apart from sync traffic and
//! never echoes an import back into the network.

use crate::version::VersionVector;
use parking_lot::Mutex;
use std::sync::Arc;
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::{Doc, MapRef, Origin, ReadTxn, StateVector, Transact, TransactionMut, Update};

/// Transaction origin tag applied to imports of remote data.
const REMOTE_ORIGIN: &str = "folio/remote";

/// Engine-level errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DocError {
    /// Incoming bytes were not a valid update
    #[error("failed to decode update: {0}")]
    Decode(String),
    /// Update decoded but could not be applied
    #[error("failed to apply update: {0}")]
    Apply(String),
    /// Any other engine failure
    #[error("engine error: {0}")]
    Engine(String),
}

/// Result of importing remote bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Document version after the import
    pub version: VersionVector,
    /// False when the import was a no-op (already-known history)
    pub changed: bool,
}

/// A locally committed change, as observed by an update subscription
#[derive(Debug, Clone)]
pub struct LocalUpdate {
    /// Incremental update bytes describing the commit
    pub data: Vec<u8>,
    /// Document version after the commit
    pub version: VersionVector,
}

/// Keeps a local-update subscription alive; dropping it unsubscribes.
pub struct DocSubscription {
    _inner: yrs::Subscription,
}

/// Shared handle to one CRDT document
///
/// Clones share the same underlying document. Commits (local transactions
/// and remote imports alike) are serialized through an internal guard so
/// concurrent writers from application threads and the synchronizer task
/// never contend inside the engine.
#[derive(Clone)]
pub struct SharedDoc {
    doc: Doc,
    commit_guard: Arc<Mutex<()>>,
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDoc {
    /// Create an empty document
    pub fn new() -> Self {
        Self {
            doc: Doc::new(),
            commit_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Import snapshot or update bytes produced by another replica
    ///
    /// Tagged with the remote origin so local-update subscriptions skip it.
    /// Reports whether the import actually advanced the document.
    pub fn import(&self, data: &[u8]) -> Result<ImportOutcome, DocError> {
        let update = Update::decode_v1(data).map_err(|e| DocError::Decode(e.to_string()))?;
        let _guard = self.commit_guard.lock();
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
            txn.apply_update(update)
                .map_err(|e| DocError::Apply(e.to_string()))?;
        }
        let after = self.doc.transact().state_vector();
        Ok(ImportOutcome {
            changed: after != before,
            version: VersionVector::from_state_vector(after),
        })
    }

    /// Export document state
    ///
    /// `since = None` exports a full snapshot; `since = Some(v)` exports
    /// the delta a replica at version `v` is missing.
    pub fn export(&self, since: Option<&VersionVector>) -> Vec<u8> {
        let txn = self.doc.transact();
        match since {
            Some(v) => txn.encode_state_as_update_v1(v.state_vector()),
            None => txn.encode_state_as_update_v1(&StateVector::default()),
        }
    }

    /// Current version vector
    pub fn version(&self) -> VersionVector {
        VersionVector::from_state_vector(self.doc.transact().state_vector())
    }

    /// Export and read the version under one read transaction, so the
    /// two cannot be torn apart by a concurrent commit
    pub fn export_with_version(&self, since: Option<&VersionVector>) -> (Vec<u8>, VersionVector) {
        let txn = self.doc.transact();
        let data = match since {
            Some(v) => txn.encode_state_as_update_v1(v.state_vector()),
            None => txn.encode_state_as_update_v1(&StateVector::default()),
        };
        (data, VersionVector::from_state_vector(txn.state_vector()))
    }

    /// Get or create a named root map
    pub fn get_map(&self, name: &str) -> MapRef {
        self.doc.get_or_insert_map(name)
    }

    /// Run a mutating closure inside one local commit
    ///
    /// The transaction commits when the closure returns, which fires any
    /// registered update subscription with the commit's bytes.
    pub fn with_transaction<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut TransactionMut) -> R,
    {
        let _guard = self.commit_guard.lock();
        let mut txn = self.doc.transact_mut();
        f(&mut txn)
    }

    /// Subscribe to local commits
    ///
    /// The callback receives the incremental bytes of each commit made
    /// through [`SharedDoc::with_transaction`]; imports of remote data do
    /// not fire it. The subscription lives as long as the returned guard.
    pub fn observe_local_updates<F>(&self, callback: F) -> Result<DocSubscription, DocError>
    where
        F: Fn(LocalUpdate) + Send + Sync + 'static,
    {
        let remote = Origin::from(REMOTE_ORIGIN);
        let sub = self
            .doc
            .observe_update_v1(move |txn, event| {
                if txn.origin() == Some(&remote) {
                    return;
                }
                callback(LocalUpdate {
                    data: event.update.clone(),
                    version: VersionVector::from_state_vector(txn.state_vector()),
                });
            })
            .map_err(|e| DocError::Engine(e.to_string()))?;
        Ok(DocSubscription { _inner: sub })
    }

    /// Project the document into plain JSON, one entry per root container
    pub fn to_json(&self) -> serde_json::Value {
        let txn = self.doc.transact();
        let mut out = serde_json::Map::new();
        for (name, value) in txn.root_refs() {
            let any = value.to_json(&txn);
            match serde_json::to_value(&any) {
                Ok(v) => {
                    out.insert(name.to_string(), v);
                }
                Err(e) => {
                    tracing::warn!(root = name, error = %e, "skipping unprojectable root");
                }
            }
        }
        serde_json::Value::Object(out)
    }
}

impl std::fmt::Debug for SharedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDoc")
            .field("version", &self.version())
            .finish()
    }
}
