//! The synchronizer's mutable model
//!
//! One value owns everything the protocol state machine knows: channels,
//! peers, per-document channel states, and the ephemeral store. Only the
//! update core mutates it, and only on the dispatch task. The model never
//! holds live resources (documents, timers, senders); those belong to the
//! executor, keyed by the ids recorded here.

use folio_core::{
    AdapterType, ChannelId, ChannelKind, ChannelMeta, DocAwareness, DocId, LoadingState,
    PeerId, PeerIdentity, PermissionContext, PermissionPolicy, ReadyState, VersionVector,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Default cadence of the ephemeral heartbeat rebroadcast.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle phase of one channel
///
/// A channel moves `Connected -> Established` exactly once; removal from
/// either phase is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPhase {
    /// Link is up but the counterpart has not identified itself
    Connected,
    /// Handshake complete; full protocol permitted
    Established {
        /// The counterpart's stable id
        peer_id: PeerId,
    },
}

/// Everything known about one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Network or storage
    pub kind: ChannelKind,
    /// Owning adapter's tag
    pub adapter_type: AdapterType,
    /// Connected or established
    pub phase: ChannelPhase,
}

impl ChannelState {
    /// The counterpart peer id, once established
    pub fn peer_id(&self) -> Option<&PeerId> {
        match &self.phase {
            ChannelPhase::Established { peer_id } => Some(peer_id),
            ChannelPhase::Connected => None,
        }
    }

    /// True once the handshake completed
    pub fn is_established(&self) -> bool {
        matches!(self.phase, ChannelPhase::Established { .. })
    }
}

/// Aggregated state for one peer, across all of its channels
#[derive(Debug, Clone, PartialEq)]
pub struct PeerState {
    /// Identity from the establish handshake
    pub identity: PeerIdentity,
    /// Channels currently established for this peer (non-empty)
    pub channels: BTreeSet<ChannelId>,
    /// What the peer told us it holds, per document
    pub awareness: BTreeMap<DocId, DocAwareness>,
    /// Documents the peer asked us to stream
    pub subscriptions: BTreeSet<DocId>,
    /// Logical dispatch tick of the last message from this peer
    pub last_seen: u64,
}

impl PeerState {
    pub(crate) fn new(identity: PeerIdentity, tick: u64) -> Self {
        Self {
            identity,
            channels: BTreeSet::new(),
            awareness: BTreeMap::new(),
            subscriptions: BTreeSet::new(),
            last_seen: tick,
        }
    }

    /// Lowest-numbered established channel, used as the send target when
    /// one message per peer is wanted
    pub fn representative_channel(&self) -> Option<ChannelId> {
        self.channels.iter().next().copied()
    }
}

/// Per-channel view of one document
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDocState {
    /// What this channel's peer knows about the document
    pub awareness: DocAwareness,
    /// Loading progress over this channel
    pub loading: LoadingState,
    /// The peer asked to be streamed our commits
    pub wants_updates: bool,
}

impl Default for ChannelDocState {
    fn default() -> Self {
        Self {
            awareness: DocAwareness::Unknown,
            loading: LoadingState::Initial,
            wants_updates: false,
        }
    }
}

impl ChannelDocState {
    /// True when a fresh sync request toward this channel makes sense
    pub fn should_request(&self) -> bool {
        matches!(
            self.loading,
            LoadingState::Initial | LoadingState::NotFound
        )
    }
}

/// Model-side state for one locally held document
///
/// The live CRDT instance lives in the executor's registry; the model
/// mirrors its version so sync decisions stay pure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocModel {
    /// Per-channel sync state
    pub channels: BTreeMap<ChannelId, ChannelDocState>,
    /// Mirror of the live document's version
    pub local_version: VersionVector,
}

/// One writer's applied presence entry
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralEntry {
    /// Last applied value
    pub value: serde_json::Value,
    /// Writer's sequence number of that value
    pub seq: u64,
}

/// Presence state across all documents
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EphemeralModel {
    /// Per document, per writer: the latest applied entry
    pub docs: BTreeMap<DocId, BTreeMap<PeerId, EphemeralEntry>>,
    /// Our own per-document sequence counters
    pub own_seq: BTreeMap<DocId, u64>,
}

/// The synchronizer's complete mutable state
#[derive(Clone)]
pub struct Model {
    /// Our identity, as sent in establish handshakes
    pub identity: PeerIdentity,
    /// Synchronous policy hooks consulted by the update core
    pub permissions: Arc<dyn PermissionPolicy>,
    /// Heartbeat cadence; flows into `SetTimeout` commands as plain data
    pub heartbeat_interval: Duration,
    /// Logical dispatch counter, bumped per received message
    pub tick: u64,
    /// All live channels
    pub channels: BTreeMap<ChannelId, ChannelState>,
    /// All known peers (every entry has at least one channel)
    pub peers: BTreeMap<PeerId, PeerState>,
    /// All locally held documents
    pub docs: BTreeMap<DocId, DocModel>,
    /// Presence store
    pub ephemeral: EphemeralModel,
}

impl Model {
    /// Fresh model around an identity and policy
    pub fn new(
        identity: PeerIdentity,
        permissions: Arc<dyn PermissionPolicy>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            identity,
            permissions,
            heartbeat_interval,
            tick: 0,
            channels: BTreeMap::new(),
            peers: BTreeMap::new(),
            docs: BTreeMap::new(),
            ephemeral: EphemeralModel::default(),
        }
    }

    /// Our stable peer id
    pub fn peer_id(&self) -> &PeerId {
        &self.identity.peer_id
    }

    /// Peer behind an established channel
    pub fn peer_of_channel(&self, channel_id: ChannelId) -> Option<&PeerState> {
        let peer_id = self.channels.get(&channel_id)?.peer_id()?;
        self.peers.get(peer_id)
    }

    /// Build the permission context for one (channel, document) decision
    pub fn permission_ctx<'a>(
        &'a self,
        channel_id: ChannelId,
        doc_id: &'a DocId,
    ) -> Option<PermissionContext<'a>> {
        let channel = self.channels.get(&channel_id)?;
        let peer = channel.peer_id().and_then(|id| self.peers.get(id));
        Some(PermissionContext {
            channel_id,
            channel_kind: channel.kind,
            adapter_type: &channel.adapter_type,
            peer_id: channel.peer_id(),
            peer_name: peer.and_then(|p| p.identity.name.as_deref()),
            doc_id,
        })
    }

    /// Ready-state snapshot for one document
    pub fn ready_states(&self, doc_id: &DocId) -> Vec<ReadyState> {
        let Some(doc) = self.docs.get(doc_id) else {
            return Vec::new();
        };
        doc.channels
            .iter()
            .filter_map(|(channel_id, state)| {
                let channel = self.channels.get(channel_id)?;
                Some(ReadyState {
                    channel: ChannelMeta {
                        channel_id: *channel_id,
                        kind: channel.kind,
                        adapter_type: channel.adapter_type.clone(),
                        peer_id: channel.peer_id().cloned(),
                    },
                    loading: state.loading.clone(),
                })
            })
            .collect()
    }

    /// Reset to the initial state, keeping identity and policy
    pub fn clear(&mut self) {
        self.tick = 0;
        self.channels.clear();
        self.peers.clear();
        self.docs.clear();
        self.ephemeral = EphemeralModel::default();
    }
}

// Policies are configuration, not state: two models are the same state
// whenever everything else matches.
impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
            && self.heartbeat_interval == other.heartbeat_interval
            && self.tick == other.tick
            && self.channels == other.channels
            && self.peers == other.peers
            && self.docs == other.docs
            && self.ephemeral == other.ephemeral
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("identity", &self.identity)
            .field("tick", &self.tick)
            .field("channels", &self.channels)
            .field("peers", &self.peers)
            .field("docs", &self.docs)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}
