//! The pure update core
//!
//! ```text
//! update: (Message, Model) -> (Model, Command?)
//! ```
//!
//! Every protocol state transition lives here as a total function: no
//! I/O, no clocks, no timer allocation, no adapter access. All side
//! effects come back as [`Command`] data for the executor. Fixed inputs
//! produce fixed outputs, which makes transitions replayable from a
//! recorded message trace and directly unit-testable.

mod channels;
mod docs;
mod ephemeral;

use crate::command::Command;
use crate::message::Message;
use crate::model::Model;
use folio_core::{ChannelId, ProtocolMessage};

/// Advance the model by one message, producing the effects to run
pub fn update(model: &mut Model, message: Message) -> Option<Command> {
    let commands = match message {
        Message::ChannelAdded {
            channel_id,
            kind,
            adapter_type,
        } => channels::channel_added(model, channel_id, kind, adapter_type),
        Message::ChannelRemoved { channel_id } => channels::channel_removed(model, channel_id),
        Message::ChannelReceive {
            channel_id,
            message,
        } => receive(model, channel_id, message),
        Message::DocEnsure { doc_id } => docs::doc_ensure(model, doc_id),
        Message::DocDelete { doc_id } => docs::doc_delete(model, doc_id),
        Message::LocalDocChange {
            doc_id,
            data,
            version,
        } => docs::local_doc_change(model, doc_id, data, version),
        Message::DocImported {
            doc_id,
            from_channel,
            data,
            outcome,
        } => docs::doc_imported(model, doc_id, from_channel, data, outcome),
        Message::Heartbeat => ephemeral::heartbeat(model),
        Message::EphemeralLocalChange { doc_id, value } => {
            ephemeral::local_change(model, doc_id, value)
        }
    };
    Command::from_vec(commands)
}

/// One inbound protocol message, possibly a batch
fn receive(model: &mut Model, channel_id: ChannelId, message: ProtocolMessage) -> Vec<Command> {
    model.tick += 1;
    if !model.channels.contains_key(&channel_id) {
        return vec![Command::warn(format!(
            "dropping {} on unknown {channel_id}",
            message.kind()
        ))];
    }
    let mut parts = Vec::new();
    message.flatten_into(&mut parts);
    let mut commands = Vec::new();
    for part in parts {
        commands.extend(receive_one(model, channel_id, part));
    }
    commands
}

/// One non-batch inbound message
///
/// Establish messages are legal in either channel phase; everything else
/// requires an established channel and is dropped with a warning
/// otherwise. The phase is re-read per message so an establish inside a
/// batch unlocks the rest of that same batch.
fn receive_one(model: &mut Model, channel_id: ChannelId, message: ProtocolMessage) -> Vec<Command> {
    let Some(channel) = model.channels.get(&channel_id) else {
        return vec![Command::warn(format!(
            "dropping {} on unknown {channel_id}",
            message.kind()
        ))];
    };
    if !message.is_establish() && !channel.is_established() {
        return vec![Command::warn(format!(
            "dropping {} on unestablished {channel_id}",
            message.kind()
        ))];
    }
    if let Some(peer_id) = channel.peer_id().cloned() {
        let tick = model.tick;
        if let Some(peer) = model.peers.get_mut(&peer_id) {
            peer.last_seen = tick;
        }
    }

    match message {
        ProtocolMessage::EstablishRequest { identity } => {
            channels::establish_request(model, channel_id, identity)
        }
        ProtocolMessage::EstablishResponse { identity } => {
            channels::establish_response(model, channel_id, identity)
        }
        ProtocolMessage::DirectoryRequest { doc_ids } => {
            docs::directory_request(model, channel_id, doc_ids)
        }
        ProtocolMessage::DirectoryResponse { doc_ids } => {
            docs::directory_response(model, channel_id, doc_ids)
        }
        ProtocolMessage::NewDoc { doc_ids } => docs::new_doc(model, channel_id, doc_ids),
        ProtocolMessage::SyncRequest {
            doc_id,
            requester_version,
            bidirectional,
        } => docs::sync_request(model, channel_id, doc_id, requester_version, bidirectional),
        ProtocolMessage::SyncResponse {
            doc_id,
            transmission,
        } => docs::sync_response(model, channel_id, doc_id, transmission),
        ProtocolMessage::Update {
            doc_id,
            transmission,
        } => docs::update_received(model, channel_id, doc_id, transmission),
        ProtocolMessage::DeleteRequest { doc_id } => {
            docs::delete_request(model, channel_id, doc_id)
        }
        ProtocolMessage::DeleteResponse { doc_id, status } => {
            docs::delete_response(model, channel_id, doc_id, status)
        }
        ProtocolMessage::Ephemeral {
            doc_id,
            hops_remaining,
            stores,
        } => ephemeral::received(model, channel_id, doc_id, hops_remaining, stores),
        // flatten_into never yields a batch
        ProtocolMessage::Batch { .. } => vec![Command::warn("dropping nested batch")],
    }
}

#[cfg(test)]
pub(crate) mod testing;
