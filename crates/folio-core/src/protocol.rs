//! Protocol message union and wire codec
//!
//! Every message the synchronizer sends or receives is one of the
//! variants below. The wire form is the serde derive encoded with
//! `bincode`; in-process transports may pass the typed value directly.

use crate::identifiers::{DocId, PeerId, PeerIdentity};
use crate::version::VersionVector;
use serde::{Deserialize, Serialize};

/// Default hop budget for ephemeral broadcasts: enough for one relay
/// (hub-and-spoke), not for deeper meshes.
pub const DEFAULT_EPHEMERAL_HOPS: u8 = 1;

/// Payload of a sync response or update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transmission {
    /// Full document state; sent when the requester's version is empty
    Snapshot {
        /// Exported snapshot bytes
        data: Vec<u8>,
        /// Responder's version at export time
        version: VersionVector,
    },
    /// Delta since the requester's version
    Update {
        /// Exported incremental bytes
        data: Vec<u8>,
        /// Responder's version at export time
        version: VersionVector,
    },
    /// The requester already has everything
    UpToDate {
        /// Responder's version
        version: VersionVector,
    },
    /// The responder knows nothing of this document or failed to load it
    Unavailable,
}

impl Transmission {
    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::Update { .. } => "update",
            Self::UpToDate { .. } => "up-to-date",
            Self::Unavailable => "unavailable",
        }
    }

    /// Payload bytes, when the variant carries any
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Snapshot { data, .. } | Self::Update { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Responder version, when the variant carries one
    pub fn version(&self) -> Option<&VersionVector> {
        match self {
            Self::Snapshot { version, .. }
            | Self::Update { version, .. }
            | Self::UpToDate { version } => Some(version),
            Self::Unavailable => None,
        }
    }
}

/// Outcome of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteStatus {
    /// The receiver removed its copy (storage peers)
    Deleted,
    /// The receiver keeps its copy (network peers own their replicas)
    Ignored,
}

/// One writer's presence entry inside an ephemeral message
///
/// The value travels as JSON bytes: presence payloads are schemaless, and
/// the wire codec is not self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralBlip {
    /// The writer owning this entry
    pub peer_id: PeerId,
    /// Writer's per-document sequence number
    pub seq: u64,
    /// JSON-encoded value
    pub data: Vec<u8>,
}

impl EphemeralBlip {
    /// Encode a JSON value into a blip
    pub fn from_value(
        peer_id: PeerId,
        seq: u64,
        value: &serde_json::Value,
    ) -> Result<Self, WireError> {
        let data = serde_json::to_vec(value).map_err(|e| WireError::Encode(e.to_string()))?;
        Ok(Self { peer_id, seq, data })
    }

    /// Decode the JSON value
    pub fn value(&self) -> Result<serde_json::Value, WireError> {
        serde_json::from_slice(&self.data).map_err(|e| WireError::Decode(e.to_string()))
    }
}

/// The full protocol message union
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// First half of the establish handshake
    EstablishRequest {
        /// Sender's identity
        identity: PeerIdentity,
    },
    /// Second half of the establish handshake
    EstablishResponse {
        /// Sender's identity
        identity: PeerIdentity,
    },
    /// Ask which documents the peer holds, optionally filtered
    DirectoryRequest {
        /// Restrict the listing to these documents
        doc_ids: Option<Vec<DocId>>,
    },
    /// Listing of documents the sender is willing to reveal
    DirectoryResponse {
        /// Listed documents
        doc_ids: Vec<DocId>,
    },
    /// Unsolicited announcement of newly created documents
    NewDoc {
        /// Announced documents
        doc_ids: Vec<DocId>,
    },
    /// Version-aware state request; also subscribes the sender to updates
    SyncRequest {
        /// Requested document
        doc_id: DocId,
        /// Requester's current version (empty for a fresh copy)
        requester_version: VersionVector,
        /// Ask the responder to sync back in the same exchange
        bidirectional: bool,
    },
    /// Reply to a sync request
    SyncResponse {
        /// Requested document
        doc_id: DocId,
        /// Outcome payload
        transmission: Transmission,
    },
    /// Streamed incremental change for a subscribed document
    Update {
        /// Changed document
        doc_id: DocId,
        /// Snapshot or delta payload
        transmission: Transmission,
    },
    /// Ask the receiver to drop its copy of a document
    DeleteRequest {
        /// Document to delete
        doc_id: DocId,
    },
    /// Reply to a delete request
    DeleteResponse {
        /// Document the request named
        doc_id: DocId,
        /// Whether the receiver acted on it
        status: DeleteStatus,
    },
    /// Transient per-peer presence state
    Ephemeral {
        /// Document the presence belongs to
        doc_id: DocId,
        /// Remaining relay budget; decremented at each hop
        hops_remaining: u8,
        /// One entry per writer
        stores: Vec<EphemeralBlip>,
    },
    /// Several messages to one destination in one physical send.
    /// Never nested: flattening happens at construction.
    Batch {
        /// Inner messages, in order
        messages: Vec<ProtocolMessage>,
    },
}

impl ProtocolMessage {
    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EstablishRequest { .. } => "establish-request",
            Self::EstablishResponse { .. } => "establish-response",
            Self::DirectoryRequest { .. } => "directory-request",
            Self::DirectoryResponse { .. } => "directory-response",
            Self::NewDoc { .. } => "new-doc",
            Self::SyncRequest { .. } => "sync-request",
            Self::SyncResponse { .. } => "sync-response",
            Self::Update { .. } => "update",
            Self::DeleteRequest { .. } => "delete-request",
            Self::DeleteResponse { .. } => "delete-response",
            Self::Ephemeral { .. } => "ephemeral",
            Self::Batch { .. } => "batch",
        }
    }

    /// True for either establish handshake message
    pub fn is_establish(&self) -> bool {
        matches!(
            self,
            Self::EstablishRequest { .. } | Self::EstablishResponse { .. }
        )
    }

    /// The document this message is about, when it names exactly one
    pub fn doc_id(&self) -> Option<&DocId> {
        match self {
            Self::SyncRequest { doc_id, .. }
            | Self::SyncResponse { doc_id, .. }
            | Self::Update { doc_id, .. }
            | Self::DeleteRequest { doc_id }
            | Self::DeleteResponse { doc_id, .. }
            | Self::Ephemeral { doc_id, .. } => Some(doc_id),
            _ => None,
        }
    }

    /// The transmission payload, when the message carries one
    pub fn transmission(&self) -> Option<&Transmission> {
        match self {
            Self::SyncResponse { transmission, .. } | Self::Update { transmission, .. } => {
                Some(transmission)
            }
            _ => None,
        }
    }

    /// Combine messages destined for one channel into a single send
    ///
    /// Zero messages collapse to `None`, a single message passes through
    /// unwrapped, and two or more become one flat batch. Batches inside
    /// the input are flattened, so the result never nests.
    pub fn from_parts(messages: Vec<ProtocolMessage>) -> Option<ProtocolMessage> {
        let mut flat = Vec::with_capacity(messages.len());
        for message in messages {
            message.flatten_into(&mut flat);
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(ProtocolMessage::Batch { messages: flat }),
        }
    }

    /// Append this message to `out`, splicing batch contents in place
    pub fn flatten_into(self, out: &mut Vec<ProtocolMessage>) {
        match self {
            Self::Batch { messages } => {
                for inner in messages {
                    inner.flatten_into(out);
                }
            }
            other => out.push(other),
        }
    }
}

/// Wire codec errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Serialization failed
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// Deserialization failed
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Encode a message for a byte transport
pub fn encode_message(message: &ProtocolMessage) -> Result<Vec<u8>, WireError> {
    bincode::serialize(message).map_err(|e| WireError::Encode(e.to_string()))
}

/// Decode a message received from a byte transport
pub fn decode_message(bytes: &[u8]) -> Result<ProtocolMessage, WireError> {
    bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
}
