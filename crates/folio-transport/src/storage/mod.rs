//! Storage adapter base: a blob store masquerading as a peer
//!
//! To the synchronizer a storage backend is indistinguishable from a
//! network peer: it establishes a channel with a stable peer identity,
//! answers directory and sync requests with version-aware deltas, and
//! subscribes itself to every document it learns about so future updates
//! get persisted. Subclassing means implementing the five-method
//! [`BlobStore`] contract; everything protocol-shaped lives here.
//!
//! Persistence is append-only at this layer: every received snapshot or
//! delta lands under a fresh `[doc_id, "update", timestamp]` key.
//! Compaction, if any, is a backend concern.

mod blob;
mod fs;
mod memory;

pub use blob::{BlobStore, StorageChunk, StorageError, StorageKey};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use crate::adapter::{Adapter, AdapterHost, ChannelSpec};
use crate::channel::{ChannelHandle, ChannelSender, TransportError};
use async_trait::async_trait;
use folio_core::{
    AdapterType, ChannelKind, DeleteStatus, DocId, PeerId, PeerIdentity, ProtocolMessage,
    SharedDoc, Transmission, VersionVector,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Reserved key prefix for adapter bookkeeping; never listed as a document.
const META_PREFIX: &str = "folio-storage-meta";

enum StorageJob {
    Message(ProtocolMessage),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Adapter exposing a [`BlobStore`] as a storage peer
pub struct StorageAdapter<S: BlobStore + 'static> {
    store: Arc<S>,
    adapter_type: AdapterType,
    name: Option<String>,
    running: Mutex<Option<Running>>,
}

struct Running {
    jobs: mpsc::UnboundedSender<StorageJob>,
    worker: JoinHandle<()>,
}

struct StorageChannelSender {
    jobs: mpsc::UnboundedSender<StorageJob>,
}

impl ChannelSender for StorageChannelSender {
    fn send(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        self.jobs
            .send(StorageJob::Message(message))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn stop(&self) {}
}

impl<S: BlobStore + 'static> StorageAdapter<S> {
    /// Wrap a blob store with the default `"storage"` adapter tag
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            adapter_type: AdapterType::from("storage"),
            name: None,
            running: Mutex::new(None),
        }
    }

    /// Override the adapter tag (e.g. `"fs-storage"`)
    pub fn with_adapter_type(mut self, adapter_type: impl Into<AdapterType>) -> Self {
        self.adapter_type = adapter_type.into();
        self
    }

    /// Set the human-readable name used in the establish handshake
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The wrapped blob store
    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Wait until every save enqueued so far is durably written
    ///
    /// The worker handles jobs in order and awaits each save inline, so
    /// acknowledging the flush marker proves all prior writes completed.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let jobs = self
            .running
            .lock()
            .as_ref()
            .map(|r| r.jobs.clone())
            .ok_or(TransportError::ChannelClosed)?;
        let (tx, rx) = oneshot::channel();
        jobs.send(StorageJob::Flush(tx))
            .map_err(|_| TransportError::ChannelClosed)?;
        rx.await.map_err(|_| TransportError::ChannelClosed)
    }

    async fn load_or_create_peer_id(store: &S) -> Result<PeerId, TransportError> {
        let key = StorageKey::new([META_PREFIX, "peer-id"]);
        let existing = store
            .load(&key)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if let Some(id) = existing {
            return Ok(PeerId::from(id));
        }
        let id = PeerId::random();
        store
            .save(&key, id.as_str().as_bytes())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(id)
    }
}

#[async_trait]
impl<S: BlobStore + 'static> Adapter for StorageAdapter<S> {
    fn adapter_type(&self) -> AdapterType {
        self.adapter_type.clone()
    }

    async fn start(&self, host: Arc<dyn AdapterHost>) -> Result<(), TransportError> {
        if self.running.lock().is_some() {
            return Err(TransportError::Lifecycle(
                "storage adapter already started".to_string(),
            ));
        }
        let peer_id = Self::load_or_create_peer_id(&self.store).await?;
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("storage ({})", self.adapter_type));
        let identity = PeerIdentity::service(peer_id, Some(name));

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let handle = host.add_channel(ChannelSpec {
            kind: ChannelKind::Storage,
            adapter_type: self.adapter_type.clone(),
            sender: Arc::new(StorageChannelSender {
                jobs: jobs_tx.clone(),
            }),
        });

        let worker = Worker {
            store: self.store.clone(),
            identity,
            handle,
            subscribed: BTreeSet::new(),
            established: false,
            stamp: KeyStamp::default(),
        };
        let task = tokio::spawn(worker.run(jobs_rx));
        *self.running.lock() = Some(Running {
            jobs: jobs_tx,
            worker: task,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.jobs.send(StorageJob::Shutdown);
            let _ = running.worker.await;
        }
        Ok(())
    }
}

impl<S: BlobStore + 'static> std::fmt::Debug for StorageAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("adapter_type", &self.adapter_type)
            .field("started", &self.running.lock().is_some())
            .finish()
    }
}

/// Timestamp component generator: wallclock milliseconds plus a four
/// digit counter, monotonic within one millisecond.
#[derive(Default)]
struct KeyStamp {
    last_ms: u128,
    counter: u16,
}

impl KeyStamp {
    fn next(&mut self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        if now == self.last_ms {
            self.counter = self.counter.wrapping_add(1);
        } else {
            self.last_ms = now;
            self.counter = 0;
        }
        format!("{now:013}-{:04}", self.counter)
    }
}

struct Worker<S: BlobStore> {
    store: Arc<S>,
    identity: PeerIdentity,
    handle: ChannelHandle,
    subscribed: BTreeSet<DocId>,
    established: bool,
    stamp: KeyStamp,
}

impl<S: BlobStore> Worker<S> {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<StorageJob>) {
        while let Some(job) = jobs.recv().await {
            match job {
                StorageJob::Message(message) => self.process(message).await,
                StorageJob::Flush(ack) => {
                    let _ = ack.send(());
                }
                StorageJob::Shutdown => break,
            }
        }
        self.handle.close();
    }

    async fn process(&mut self, message: ProtocolMessage) {
        if let ProtocolMessage::Batch { messages } = message {
            for inner in messages {
                self.process_single(inner).await;
            }
        } else {
            self.process_single(message).await;
        }
    }

    async fn process_single(&mut self, message: ProtocolMessage) {
        if !self.established && !message.is_establish() {
            tracing::warn!(
                target: "folio::transport",
                channel = %self.handle.channel_id(),
                kind = message.kind(),
                "dropping message on unestablished storage channel"
            );
            return;
        }
        match message {
            ProtocolMessage::EstablishRequest { identity } => {
                tracing::debug!(
                    target: "folio::transport",
                    peer = %identity.peer_id,
                    "storage channel established"
                );
                self.established = true;
                self.reply(ProtocolMessage::EstablishResponse {
                    identity: self.identity.clone(),
                });
            }
            // We never initiate the handshake, so a response has no
            // pending request to complete.
            ProtocolMessage::EstablishResponse { .. } => {}
            ProtocolMessage::DirectoryRequest { doc_ids } => {
                let listed = match self.list_docs().await {
                    Ok(docs) => docs,
                    Err(e) => {
                        tracing::error!(target: "folio::transport", error = %e, "directory scan failed");
                        BTreeSet::new()
                    }
                };
                let doc_ids = match doc_ids {
                    Some(filter) => filter.into_iter().filter(|d| listed.contains(d)).collect(),
                    None => listed.into_iter().collect(),
                };
                self.reply(ProtocolMessage::DirectoryResponse { doc_ids });
            }
            ProtocolMessage::NewDoc { doc_ids } => {
                // A fresh announcement means we hold nothing yet: request
                // a full snapshot and stay subscribed for what follows.
                for doc_id in doc_ids {
                    self.subscribed.insert(doc_id.clone());
                    self.reply(ProtocolMessage::SyncRequest {
                        doc_id,
                        requester_version: VersionVector::new(),
                        bidirectional: false,
                    });
                }
            }
            ProtocolMessage::SyncRequest {
                doc_id,
                requester_version,
                // Storage reciprocates unconditionally; the flag adds nothing.
                bidirectional: _,
            } => {
                self.handle_sync_request(doc_id, requester_version).await;
            }
            ProtocolMessage::SyncResponse {
                doc_id,
                transmission,
            }
            | ProtocolMessage::Update {
                doc_id,
                transmission,
            } => {
                self.persist(&doc_id, &transmission).await;
            }
            ProtocolMessage::DeleteRequest { doc_id } => {
                let status = match self
                    .store
                    .remove_range(&StorageKey::new([doc_id.as_str()]))
                    .await
                {
                    Ok(()) => {
                        self.subscribed.remove(&doc_id);
                        DeleteStatus::Deleted
                    }
                    Err(e) => {
                        tracing::error!(
                            target: "folio::transport",
                            doc = %doc_id,
                            error = %e,
                            "delete failed; keeping chunks"
                        );
                        DeleteStatus::Ignored
                    }
                };
                self.reply(ProtocolMessage::DeleteResponse { doc_id, status });
            }
            ProtocolMessage::DirectoryResponse { .. } | ProtocolMessage::DeleteResponse { .. } => {}
            ProtocolMessage::Ephemeral { .. } => {
                // Storage has no presence; nothing to persist either.
            }
            ProtocolMessage::Batch { .. } => {
                tracing::warn!(target: "folio::transport", "dropping nested batch");
            }
        }
    }

    /// Answer a sync request from reconstructed chunk state
    async fn handle_sync_request(&mut self, doc_id: DocId, requester_version: VersionVector) {
        self.subscribed.insert(doc_id.clone());
        let prefix = StorageKey::new([doc_id.as_str()]);
        let chunks = match self.store.load_range(&prefix).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!(
                    target: "folio::transport",
                    doc = %doc_id,
                    error = %e,
                    "chunk load failed; answering unavailable"
                );
                self.reply(ProtocolMessage::SyncResponse {
                    doc_id: doc_id.clone(),
                    transmission: Transmission::Unavailable,
                });
                self.reciprocal_request(doc_id, VersionVector::new());
                return;
            }
        };

        if chunks.is_empty() {
            self.reply(ProtocolMessage::SyncResponse {
                doc_id: doc_id.clone(),
                transmission: Transmission::Unavailable,
            });
            // Nothing stored yet, but the reciprocal request still goes
            // out so the requester's copy gets captured from now on.
            self.reciprocal_request(doc_id, VersionVector::new());
            return;
        }

        // Chunk order is unspecified and irrelevant: imports commute.
        let scratch = SharedDoc::new();
        for chunk in &chunks {
            if let Err(e) = scratch.import(&chunk.data) {
                tracing::warn!(
                    target: "folio::transport",
                    key = %chunk.key,
                    error = %e,
                    "skipping unreadable chunk"
                );
            }
        }
        let version = scratch.version();
        let transmission = if requester_version.covers(&version) {
            Transmission::UpToDate { version }
        } else if requester_version.is_empty() {
            Transmission::Snapshot {
                data: scratch.export(None),
                version,
            }
        } else {
            Transmission::Update {
                data: scratch.export(Some(&requester_version)),
                version: version.clone(),
            }
        };
        self.reply(ProtocolMessage::SyncResponse {
            doc_id: doc_id.clone(),
            transmission,
        });
        self.reciprocal_request(doc_id, scratch.version());
    }

    /// Append one received snapshot or delta under a fresh update key
    async fn persist(&mut self, doc_id: &DocId, transmission: &Transmission) {
        let Some(data) = transmission.data() else {
            return;
        };
        let key = StorageKey(vec![
            doc_id.0.clone(),
            "update".to_string(),
            self.stamp.next(),
        ]);
        if let Err(e) = self.store.save(&key, data).await {
            tracing::error!(
                target: "folio::transport",
                key = %key,
                error = %e,
                "failed to persist update"
            );
        }
    }

    fn reciprocal_request(&mut self, doc_id: DocId, version: VersionVector) {
        self.subscribed.insert(doc_id.clone());
        self.reply(ProtocolMessage::SyncRequest {
            doc_id,
            requester_version: version,
            bidirectional: false,
        });
    }

    async fn list_docs(&self) -> Result<BTreeSet<DocId>, StorageError> {
        let chunks = self.store.load_range(&StorageKey::root()).await?;
        Ok(chunks
            .iter()
            .filter_map(|c| c.key.head())
            .filter(|head| *head != META_PREFIX)
            .map(DocId::from)
            .collect())
    }

    fn reply(&self, message: ProtocolMessage) {
        self.handle.receive(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InboundSink;
    use folio_core::{ChannelId, PeerKind};
    use parking_lot::Mutex as SyncMutex;
    use yrs::Map;

    #[derive(Default)]
    struct RecordingHost {
        replies: Arc<SyncMutex<Vec<ProtocolMessage>>>,
        senders: SyncMutex<Vec<Arc<dyn ChannelSender>>>,
    }

    struct RecordingSink {
        replies: Arc<SyncMutex<Vec<ProtocolMessage>>>,
    }

    impl InboundSink for RecordingSink {
        fn channel_received(&self, _channel_id: ChannelId, message: ProtocolMessage) {
            self.replies.lock().push(message);
        }
        fn channel_closed(&self, _channel_id: ChannelId) {}
    }

    impl AdapterHost for RecordingHost {
        fn add_channel(&self, spec: ChannelSpec) -> ChannelHandle {
            self.senders.lock().push(spec.sender);
            ChannelHandle::new(
                ChannelId(1),
                Arc::new(RecordingSink {
                    replies: self.replies.clone(),
                }),
            )
        }
        fn remove_channel(&self, _channel_id: ChannelId) {}
    }

    struct Rig {
        adapter: StorageAdapter<MemoryBlobStore>,
        host: Arc<RecordingHost>,
    }

    impl Rig {
        async fn start(store: MemoryBlobStore) -> Self {
            let adapter = StorageAdapter::new(store);
            let host = Arc::new(RecordingHost::default());
            adapter.start(host.clone() as Arc<dyn AdapterHost>).await.unwrap();
            Self { adapter, host }
        }

        fn send(&self, message: ProtocolMessage) {
            self.host.senders.lock()[0].send(message).unwrap();
        }

        async fn establish(&self) {
            self.send(ProtocolMessage::EstablishRequest {
                identity: PeerIdentity::user(PeerId::from("client"), None),
            });
            self.drain().await;
        }

        async fn drain(&self) -> Vec<ProtocolMessage> {
            self.adapter.flush().await.unwrap();
            std::mem::take(&mut *self.host.replies.lock())
        }
    }

    fn doc_with_text(text: &str) -> SharedDoc {
        let doc = SharedDoc::new();
        let map = doc.get_map("root");
        doc.with_transaction(|txn| {
            map.insert(txn, "text", text);
        });
        doc
    }

    #[tokio::test]
    async fn establish_answers_with_stable_service_identity() {
        let store = MemoryBlobStore::new();
        let rig = Rig::start(store.clone()).await;
        rig.send(ProtocolMessage::EstablishRequest {
            identity: PeerIdentity::user(PeerId::from("client"), None),
        });
        let replies = rig.drain().await;
        let first_id = match &replies[0] {
            ProtocolMessage::EstablishResponse { identity } => {
                assert_eq!(identity.kind, PeerKind::Service);
                identity.peer_id.clone()
            }
            other => panic!("expected establish response, got {other:?}"),
        };
        rig.adapter.stop().await.unwrap();

        // A restart against the same store keeps the peer id.
        let rig = Rig::start(store).await;
        rig.send(ProtocolMessage::EstablishRequest {
            identity: PeerIdentity::user(PeerId::from("client"), None),
        });
        let replies = rig.drain().await;
        match &replies[0] {
            ProtocolMessage::EstablishResponse { identity } => {
                assert_eq!(identity.peer_id, first_id);
            }
            other => panic!("expected establish response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn messages_before_establish_are_dropped() {
        let rig = Rig::start(MemoryBlobStore::new()).await;
        rig.send(ProtocolMessage::DirectoryRequest { doc_ids: None });
        assert!(rig.drain().await.is_empty());
    }

    #[tokio::test]
    async fn empty_store_answers_unavailable_with_reciprocal_request() {
        let rig = Rig::start(MemoryBlobStore::new()).await;
        rig.establish().await;
        rig.send(ProtocolMessage::SyncRequest {
            doc_id: DocId::from("d"),
            requester_version: VersionVector::new(),
            bidirectional: false,
        });
        let replies = rig.drain().await;
        assert_eq!(replies.len(), 2);
        assert!(matches!(
            &replies[0],
            ProtocolMessage::SyncResponse {
                transmission: Transmission::Unavailable,
                ..
            }
        ));
        match &replies[1] {
            ProtocolMessage::SyncRequest {
                requester_version, ..
            } => assert!(requester_version.is_empty()),
            other => panic!("expected reciprocal sync request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn persisted_updates_reconstruct_into_sync_responses() {
        let rig = Rig::start(MemoryBlobStore::new()).await;
        rig.establish().await;

        let doc = doc_with_text("hello");
        rig.send(ProtocolMessage::Update {
            doc_id: DocId::from("d"),
            transmission: Transmission::Update {
                data: doc.export(None),
                version: doc.version(),
            },
        });
        rig.adapter.flush().await.unwrap();
        rig.host.replies.lock().clear();

        // Fresh requester gets a snapshot.
        rig.send(ProtocolMessage::SyncRequest {
            doc_id: DocId::from("d"),
            requester_version: VersionVector::new(),
            bidirectional: false,
        });
        let replies = rig.drain().await;
        match &replies[0] {
            ProtocolMessage::SyncResponse {
                transmission: Transmission::Snapshot { data, version },
                ..
            } => {
                assert_eq!(version, &doc.version());
                let rebuilt = SharedDoc::new();
                rebuilt.import(data).unwrap();
                assert_eq!(rebuilt.to_json(), doc.to_json());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        // An up-to-date requester gets no data back.
        rig.send(ProtocolMessage::SyncRequest {
            doc_id: DocId::from("d"),
            requester_version: doc.version(),
            bidirectional: false,
        });
        let replies = rig.drain().await;
        assert!(matches!(
            &replies[0],
            ProtocolMessage::SyncResponse {
                transmission: Transmission::UpToDate { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn directory_listing_skips_meta_keys() {
        let store = MemoryBlobStore::new();
        let rig = Rig::start(store.clone()).await;
        rig.establish().await;

        let doc = doc_with_text("x");
        rig.send(ProtocolMessage::Update {
            doc_id: DocId::from("listed"),
            transmission: Transmission::Update {
                data: doc.export(None),
                version: doc.version(),
            },
        });
        rig.send(ProtocolMessage::DirectoryRequest { doc_ids: None });
        let replies = rig.drain().await;
        match replies.last() {
            Some(ProtocolMessage::DirectoryResponse { doc_ids }) => {
                assert_eq!(doc_ids, &vec![DocId::from("listed")]);
            }
            other => panic!("expected directory response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_request_removes_chunks() {
        let store = MemoryBlobStore::new();
        let rig = Rig::start(store.clone()).await;
        rig.establish().await;

        let doc = doc_with_text("bye");
        rig.send(ProtocolMessage::Update {
            doc_id: DocId::from("d"),
            transmission: Transmission::Update {
                data: doc.export(None),
                version: doc.version(),
            },
        });
        rig.adapter.flush().await.unwrap();
        assert_eq!(store.len(), 2); // peer id + one update chunk

        rig.send(ProtocolMessage::DeleteRequest {
            doc_id: DocId::from("d"),
        });
        let replies = rig.drain().await;
        assert!(matches!(
            replies.last(),
            Some(ProtocolMessage::DeleteResponse {
                status: DeleteStatus::Deleted,
                ..
            })
        ));
        assert_eq!(store.len(), 1); // only the peer id remains
    }

    #[tokio::test]
    async fn chunk_reconstruction_is_order_independent() {
        let doc = doc_with_text("first");
        let snapshot = doc.export(None);
        let v1 = doc.version();
        let map = doc.get_map("root");
        doc.with_transaction(|txn| {
            map.insert(txn, "more", "second");
        });
        let delta = doc.export(Some(&v1));

        let forward = SharedDoc::new();
        forward.import(&snapshot).unwrap();
        forward.import(&delta).unwrap();

        let backward = SharedDoc::new();
        backward.import(&delta).unwrap();
        backward.import(&snapshot).unwrap();

        assert_eq!(forward.version(), backward.version());
        assert_eq!(forward.export(None), backward.export(None));
        assert_eq!(forward.to_json(), doc.to_json());
    }

    #[tokio::test]
    async fn flush_without_start_fails() {
        let adapter = StorageAdapter::new(MemoryBlobStore::new());
        assert!(adapter.flush().await.is_err());
        // stop on a never-started adapter is a no-op
        adapter.stop().await.unwrap();
    }
}
