//! Shared scaffolding for update-core tests

use crate::command::Command;
use crate::message::Message;
use crate::model::{Model, DEFAULT_HEARTBEAT_INTERVAL};
use crate::update::update;
use folio_core::{
    AdapterType, ChannelId, ChannelKind, PeerId, PeerIdentity, PermissionPolicy,
    ProtocolMessage, SharedDoc, VersionVector,
};
use std::sync::Arc;
use yrs::Map;

/// A model plus helpers to drive it one message at a time
pub(crate) struct Harness {
    pub model: Model,
}

impl Harness {
    pub fn new(peer: &str) -> Self {
        Self::with_policy(peer, Arc::new(folio_core::AllowAll))
    }

    pub fn with_policy(peer: &str, policy: Arc<dyn PermissionPolicy>) -> Self {
        Self {
            model: Model::new(
                PeerIdentity::user(PeerId::from(peer), None),
                policy,
                DEFAULT_HEARTBEAT_INTERVAL,
            ),
        }
    }

    /// Dispatch one message and flatten the resulting command tree
    pub fn dispatch(&mut self, message: Message) -> Vec<Command> {
        flatten(update(&mut self.model, message))
    }

    /// Register a network channel with the given id
    pub fn add_network_channel(&mut self, id: u64) -> ChannelId {
        self.add_channel(id, ChannelKind::Network)
    }

    pub fn add_channel(&mut self, id: u64, kind: ChannelKind) -> ChannelId {
        let channel_id = ChannelId(id);
        self.dispatch(Message::ChannelAdded {
            channel_id,
            kind,
            adapter_type: AdapterType::from("test"),
        });
        channel_id
    }

    /// Drive the inbound half of the handshake for a remote peer
    pub fn establish(&mut self, channel_id: ChannelId, peer: &str) -> Vec<Command> {
        self.receive(
            channel_id,
            ProtocolMessage::EstablishRequest {
                identity: PeerIdentity::user(PeerId::from(peer), None),
            },
        )
    }

    /// Deliver one protocol message on a channel
    pub fn receive(&mut self, channel_id: ChannelId, message: ProtocolMessage) -> Vec<Command> {
        self.dispatch(Message::ChannelReceive {
            channel_id,
            message,
        })
    }
}

/// Expand batches into a flat leaf list, preserving order
pub(crate) fn flatten(command: Option<Command>) -> Vec<Command> {
    fn walk(command: Command, out: &mut Vec<Command>) {
        match command {
            Command::Batch(commands) => {
                for inner in commands {
                    walk(inner, out);
                }
            }
            leaf => out.push(leaf),
        }
    }
    let mut out = Vec::new();
    if let Some(command) = command {
        walk(command, &mut out);
    }
    out
}

/// Just the sends, as (destination, message) pairs
pub(crate) fn sends(commands: &[Command]) -> Vec<(ChannelId, ProtocolMessage)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Send { to, message } => Some((*to, message.clone())),
            _ => None,
        })
        .collect()
}

/// A real (non-empty) version vector, derived from an actual document
pub(crate) fn version_with_edits(edits: &[(&str, &str)]) -> VersionVector {
    let doc = SharedDoc::new();
    let map = doc.get_map("root");
    doc.with_transaction(|txn| {
        for (k, v) in edits {
            map.insert(txn, *k, *v);
        }
    });
    doc.version()
}
