//! Identifier types used across the Folio runtime
//!
//! All identifiers are opaque newtypes. Peers are stable logical
//! participants, channels are transient per-repo links, documents are
//! globally named CRDT instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable opaque identifier for a logical peer
///
/// A peer keeps its id across reconnects; every channel established for it
/// aggregates under the same `PeerId`. Storage backends claim one as well,
/// persisted in their own key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generate a fresh random peer id
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Locally unique channel identifier
///
/// Monotonically assigned by the channel directory, never reused, scoped
/// to one repo instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Get the inner counter value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Opaque global document identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub String);

impl DocId {
    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Short tag grouping related channels (e.g. `"bridge"`, `"fs-storage"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdapterType(pub String);

impl AdapterType {
    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AdapterType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether a peer is an interactive user or an automated service
///
/// Storage backends and relay hubs present themselves as services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerKind {
    /// Human-driven participant
    User,
    /// Automated participant (storage backend, relay, bot)
    Service,
}

/// Peer identity exchanged in the establish handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Stable peer id
    pub peer_id: PeerId,
    /// Optional human-readable name
    pub name: Option<String>,
    /// User or service
    pub kind: PeerKind,
}

impl PeerIdentity {
    /// Identity for an interactive user peer
    pub fn user(peer_id: PeerId, name: impl Into<Option<String>>) -> Self {
        Self {
            peer_id,
            name: name.into(),
            kind: PeerKind::User,
        }
    }

    /// Identity for a service peer
    pub fn service(peer_id: PeerId, name: impl Into<Option<String>>) -> Self {
        Self {
            peer_id,
            name: name.into(),
            kind: PeerKind::Service,
        }
    }
}

/// Transport family of a channel
///
/// The distinction is visible to permission policies: storage channels are
/// conventionally always allowed to persist updates even when network
/// peers are denied visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// A link to a remote peer over some network transport
    Network,
    /// A storage backend masquerading as a peer
    Storage,
}

impl ChannelKind {
    /// True for storage channels
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
