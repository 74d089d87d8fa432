//! Channel lifecycle and the establish handshake

use crate::command::{Command, TimerKey};
use crate::model::{ChannelPhase, ChannelState, Model, PeerState};
use folio_core::{
    AdapterType, ChannelId, ChannelKind, DocAwareness, DocId, PeerIdentity, ProtocolMessage,
};

pub(super) fn channel_added(
    model: &mut Model,
    channel_id: ChannelId,
    kind: ChannelKind,
    adapter_type: AdapterType,
) -> Vec<Command> {
    if model.channels.contains_key(&channel_id) {
        return vec![Command::warn(format!("{channel_id} added twice"))];
    }
    model.channels.insert(
        channel_id,
        ChannelState {
            kind,
            adapter_type,
            phase: ChannelPhase::Connected,
        },
    );
    vec![
        Command::StartChannel { channel_id },
        Command::Send {
            to: channel_id,
            message: ProtocolMessage::EstablishRequest {
                identity: model.identity.clone(),
            },
        },
    ]
}

pub(super) fn channel_removed(model: &mut Model, channel_id: ChannelId) -> Vec<Command> {
    let Some(state) = model.channels.remove(&channel_id) else {
        return vec![Command::debug(format!(
            "removal of unknown {channel_id} (already gone)"
        ))];
    };
    let mut commands = vec![
        Command::StopChannel { channel_id },
        Command::ClearTimeout {
            key: TimerKey::Channel(channel_id),
        },
    ];
    if let ChannelPhase::Established { peer_id } = state.phase {
        let peer_gone = model
            .peers
            .get_mut(&peer_id)
            .map(|peer| {
                peer.channels.remove(&channel_id);
                peer.channels.is_empty()
            })
            .unwrap_or(false);
        if peer_gone {
            // Last channel gone: the peer itself goes, along with its
            // subscriptions and presence entries.
            model.peers.remove(&peer_id);
            for (doc_id, entries) in model.ephemeral.docs.iter_mut() {
                if entries.remove(&peer_id).is_some() {
                    commands.push(Command::EmitEphemeralChange {
                        doc_id: doc_id.clone(),
                        changes: vec![crate::command::EphemeralDelta {
                            peer_id: peer_id.clone(),
                            value: None,
                        }],
                    });
                }
            }
        }
    }
    for (doc_id, doc) in model.docs.iter_mut() {
        if doc.channels.remove(&channel_id).is_some() {
            commands.push(Command::EmitReadyStates {
                doc_id: doc_id.clone(),
            });
        }
    }
    commands
}

pub(super) fn establish_request(
    model: &mut Model,
    channel_id: ChannelId,
    identity: PeerIdentity,
) -> Vec<Command> {
    let Some(channel) = model.channels.get(&channel_id) else {
        return vec![Command::warn(format!("establish-request on unknown {channel_id}"))];
    };
    if channel.is_established() {
        // The handshake is idempotent; a duplicate carries no new state.
        return vec![Command::debug(format!(
            "duplicate establish-request on {channel_id}"
        ))];
    }
    let mut commands = vec![Command::Send {
        to: channel_id,
        message: ProtocolMessage::EstablishResponse {
            identity: model.identity.clone(),
        },
    }];
    commands.extend(note_established(model, channel_id, identity));
    commands
}

pub(super) fn establish_response(
    model: &mut Model,
    channel_id: ChannelId,
    identity: PeerIdentity,
) -> Vec<Command> {
    let Some(channel) = model.channels.get(&channel_id) else {
        return vec![Command::warn(format!(
            "establish-response on unknown {channel_id}"
        ))];
    };
    if channel.is_established() {
        return vec![Command::debug(format!(
            "duplicate establish-response on {channel_id}"
        ))];
    }
    note_established(model, channel_id, identity)
}

/// Transition Connected -> Established and kick off the directory walk
///
/// The new channel aggregates under its peer's state. Documents the peer
/// is already known to hold skip the directory round trip and get a
/// version-carrying sync request immediately (the reconnect fast path);
/// everything else is covered by one unfiltered directory request.
fn note_established(
    model: &mut Model,
    channel_id: ChannelId,
    identity: PeerIdentity,
) -> Vec<Command> {
    let peer_id = identity.peer_id.clone();
    if let Some(channel) = model.channels.get_mut(&channel_id) {
        channel.phase = ChannelPhase::Established {
            peer_id: peer_id.clone(),
        };
    }
    let tick = model.tick;
    let peer = model
        .peers
        .entry(peer_id.clone())
        .or_insert_with(|| PeerState::new(identity.clone(), tick));
    peer.identity = identity;
    peer.channels.insert(channel_id);
    peer.last_seen = tick;

    let known: Vec<(DocId, bool)> = {
        let awareness = &model.peers[&peer_id].awareness;
        model
            .docs
            .keys()
            .map(|doc_id| {
                (
                    doc_id.clone(),
                    awareness.get(doc_id) == Some(&DocAwareness::HasDoc),
                )
            })
            .collect()
    };

    let mut commands = vec![Command::Send {
        to: channel_id,
        message: ProtocolMessage::DirectoryRequest { doc_ids: None },
    }];
    for (doc_id, peer_has_doc) in known {
        // a version-carrying request reveals that we hold the document
        let may_request = model
            .permission_ctx(channel_id, &doc_id)
            .map_or(false, |ctx| model.permissions.may_reveal(&ctx));
        let Some(doc) = model.docs.get_mut(&doc_id) else {
            continue;
        };
        let state = doc.channels.entry(channel_id).or_default();
        if peer_has_doc {
            state.awareness = DocAwareness::HasDoc;
            if may_request && state.should_request() {
                state.loading = folio_core::LoadingState::Requesting;
                let requester_version = doc.local_version.clone();
                commands.push(Command::Send {
                    to: channel_id,
                    message: ProtocolMessage::SyncRequest {
                        doc_id: doc_id.clone(),
                        requester_version,
                        bidirectional: true,
                    },
                });
            }
        } else if may_request {
            // Documents that predate this channel were never announced
            // on it. Passive counterparts (storage peers) rely on the
            // announcement to come asking.
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::NewDoc {
                    doc_ids: vec![doc_id.clone()],
                },
            });
        }
        commands.push(Command::EmitReadyStates { doc_id });
    }
    commands
}
