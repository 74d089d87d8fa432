//! Ready-state model
//!
//! Applications never see channels directly; they observe, per document,
//! a vector of ready states describing how far each channel has gotten in
//! loading that document. "Ready" is whatever predicate the application
//! chooses over that vector ("any storage found it", "any network peer
//! found it", ...).

use crate::identifiers::{AdapterType, ChannelId, ChannelKind, PeerId};
use crate::version::VersionVector;
use serde::{Deserialize, Serialize};

/// What we believe a counterpart knows about a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocAwareness {
    /// The peer told us it holds the document
    HasDoc,
    /// The peer told us it does not hold the document
    NoDoc,
    /// No information yet
    Unknown,
}

/// Loading progress of one document over one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoadingState {
    /// Nothing requested yet
    Initial,
    /// A sync request is in flight
    Requesting,
    /// The counterpart delivered (or confirmed) state at this version
    Found {
        /// Counterpart's version at the time
        version: VersionVector,
    },
    /// The counterpart does not have the document
    NotFound,
}

impl LoadingState {
    /// True once the counterpart delivered or confirmed state
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// True once the channel has reached a terminal answer either way
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Found { .. } | Self::NotFound)
    }
}

/// Identity of the channel a ready state describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMeta {
    /// Channel id
    pub channel_id: ChannelId,
    /// Network or storage
    pub kind: ChannelKind,
    /// Owning adapter's tag
    pub adapter_type: AdapterType,
    /// Counterpart peer, once established
    pub peer_id: Option<PeerId>,
}

/// Loading status of a document with respect to a single channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyState {
    /// Which channel
    pub channel: ChannelMeta,
    /// How far loading has gotten
    pub loading: LoadingState,
}

impl ReadyState {
    /// True once this channel delivered or confirmed state
    pub fn is_found(&self) -> bool {
        self.loading.is_found()
    }
}

/// Any storage channel has the document
pub fn any_storage_found(states: &[ReadyState]) -> bool {
    states
        .iter()
        .any(|s| s.channel.kind == ChannelKind::Storage && s.is_found())
}

/// Any network channel has the document
pub fn any_network_found(states: &[ReadyState]) -> bool {
    states
        .iter()
        .any(|s| s.channel.kind == ChannelKind::Network && s.is_found())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(kind: ChannelKind, loading: LoadingState) -> ReadyState {
        ReadyState {
            channel: ChannelMeta {
                channel_id: ChannelId(1),
                kind,
                adapter_type: AdapterType::from("test"),
                peer_id: None,
            },
            loading,
        }
    }

    #[test]
    fn found_predicates_distinguish_kinds() {
        let found = LoadingState::Found {
            version: VersionVector::new(),
        };
        let states = vec![
            state(ChannelKind::Storage, found),
            state(ChannelKind::Network, LoadingState::Requesting),
        ];
        assert!(any_storage_found(&states));
        assert!(!any_network_found(&states));
    }

    #[test]
    fn not_found_is_resolved_but_not_found() {
        assert!(LoadingState::NotFound.is_resolved());
        assert!(!LoadingState::NotFound.is_found());
        assert!(!LoadingState::Requesting.is_resolved());
    }
}
