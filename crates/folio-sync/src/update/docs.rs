//! Directory walk, version-aware sync, update fan-out, deletion

use crate::command::Command;
use crate::message::ImportResult;
use crate::model::Model;
use folio_core::{
    ChannelId, DeleteStatus, DocAwareness, DocId, EphemeralBlip, LoadingState, ProtocolMessage,
    Transmission, VersionVector,
};
use std::collections::BTreeSet;

/// The application wants this document; create it and go looking
pub(super) fn doc_ensure(model: &mut Model, doc_id: DocId) -> Vec<Command> {
    if model.docs.contains_key(&doc_id) {
        return Vec::new();
    }
    model.docs.insert(doc_id.clone(), crate::model::DocModel::default());
    let mut commands = vec![Command::EnsureDoc {
        doc_id: doc_id.clone(),
    }];

    // Every established channel tracks the document; requests go out once
    // per peer, over its representative channel.
    let established: Vec<ChannelId> = model
        .channels
        .iter()
        .filter(|(_, c)| c.is_established())
        .map(|(id, _)| *id)
        .collect();
    if let Some(doc) = model.docs.get_mut(&doc_id) {
        for channel_id in &established {
            doc.channels.entry(*channel_id).or_default();
        }
    }

    let peers: Vec<(ChannelId, bool)> = model
        .peers
        .values()
        .filter_map(|peer| {
            let channel = peer.representative_channel()?;
            let has_doc = peer.awareness.get(&doc_id) == Some(&DocAwareness::HasDoc);
            Some((channel, has_doc))
        })
        .collect();

    for (channel_id, peer_has_doc) in peers {
        // announcement, lookup and request all disclose the document
        let may_reveal = model
            .permission_ctx(channel_id, &doc_id)
            .map_or(false, |ctx| model.permissions.may_reveal(&ctx));
        if !may_reveal {
            continue;
        }
        commands.push(Command::Send {
            to: channel_id,
            message: ProtocolMessage::NewDoc {
                doc_ids: vec![doc_id.clone()],
            },
        });
        if peer_has_doc {
            if let Some(state) = model
                .docs
                .get_mut(&doc_id)
                .and_then(|d| d.channels.get_mut(&channel_id))
            {
                state.loading = LoadingState::Requesting;
            }
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version: VersionVector::new(),
                    bidirectional: true,
                },
            });
        } else {
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::DirectoryRequest {
                    doc_ids: Some(vec![doc_id.clone()]),
                },
            });
        }
    }
    commands.push(Command::EmitReadyStates { doc_id });
    commands
}

/// The application drops its copy and tells peers it did
pub(super) fn doc_delete(model: &mut Model, doc_id: DocId) -> Vec<Command> {
    if model.docs.remove(&doc_id).is_none() {
        return vec![Command::debug(format!("delete of unknown {doc_id}"))];
    }
    model.ephemeral.docs.remove(&doc_id);
    model.ephemeral.own_seq.remove(&doc_id);

    let mut commands = vec![Command::RemoveDoc {
        doc_id: doc_id.clone(),
    }];
    let peers: Vec<ChannelId> = model
        .peers
        .values_mut()
        .filter_map(|peer| {
            peer.subscriptions.remove(&doc_id);
            peer.awareness.remove(&doc_id);
            peer.representative_channel()
        })
        .collect();
    for channel_id in peers {
        let may_reveal = model
            .permission_ctx(channel_id, &doc_id)
            .map_or(false, |ctx| model.permissions.may_reveal(&ctx));
        if may_reveal {
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::DeleteRequest {
                    doc_id: doc_id.clone(),
                },
            });
        }
    }
    commands
}

/// A local commit: mirror the version and stream it to subscribers
pub(super) fn local_doc_change(
    model: &mut Model,
    doc_id: DocId,
    data: Vec<u8>,
    version: VersionVector,
) -> Vec<Command> {
    let Some(doc) = model.docs.get_mut(&doc_id) else {
        return vec![Command::debug(format!("local change on unknown {doc_id}"))];
    };
    doc.local_version = version.clone();
    let subscribers: Vec<ChannelId> = doc
        .channels
        .iter()
        .filter(|(_, state)| state.wants_updates)
        .map(|(id, _)| *id)
        .collect();
    forward_update(model, &doc_id, None, subscribers, data, version)
}

/// The executor finished importing; settle loading state and fan out
pub(super) fn doc_imported(
    model: &mut Model,
    doc_id: DocId,
    from_channel: ChannelId,
    data: Vec<u8>,
    outcome: ImportResult,
) -> Vec<Command> {
    let Some(doc) = model.docs.get_mut(&doc_id) else {
        return vec![Command::debug(format!(
            "import result for dropped {doc_id}"
        ))];
    };
    match outcome {
        ImportResult::Applied { version, changed } => {
            doc.local_version = version.clone();
            if let Some(state) = doc.channels.get_mut(&from_channel) {
                state.awareness = DocAwareness::HasDoc;
                state.loading = LoadingState::Found {
                    version: version.clone(),
                };
            }
            let mut commands = vec![Command::EmitReadyStates {
                doc_id: doc_id.clone(),
            }];
            if changed {
                // A state-changing import becomes our own transmission to
                // every other subscriber; no-op imports are not forwarded,
                // which is what terminates echo cycles.
                let subscribers: Vec<ChannelId> = doc
                    .channels
                    .iter()
                    .filter(|(id, state)| **id != from_channel && state.wants_updates)
                    .map(|(id, _)| *id)
                    .collect();
                commands.extend(forward_update(
                    model,
                    &doc_id,
                    Some(from_channel),
                    subscribers,
                    data,
                    version,
                ));
            }
            commands
        }
        ImportResult::Failed { reason } => {
            if let Some(state) = doc.channels.get_mut(&from_channel) {
                state.loading = LoadingState::NotFound;
            }
            vec![
                Command::warn(format!(
                    "import into {doc_id} from {from_channel} failed: {reason}"
                )),
                Command::EmitReadyStates { doc_id },
            ]
        }
    }
}

/// Send an update to each subscriber the policy allows
fn forward_update(
    model: &Model,
    doc_id: &DocId,
    source: Option<ChannelId>,
    subscribers: Vec<ChannelId>,
    data: Vec<u8>,
    version: VersionVector,
) -> Vec<Command> {
    let mut commands = Vec::new();
    for channel_id in subscribers {
        if Some(channel_id) == source {
            continue;
        }
        let established = model
            .channels
            .get(&channel_id)
            .map_or(false, |c| c.is_established());
        if !established {
            continue;
        }
        let allowed = model
            .permission_ctx(channel_id, doc_id)
            .map_or(false, |ctx| model.permissions.may_receive_update(&ctx));
        if !allowed {
            commands.push(Command::debug(format!(
                "update for {doc_id} withheld from {channel_id} by policy"
            )));
            continue;
        }
        commands.push(Command::Send {
            to: channel_id,
            message: ProtocolMessage::Update {
                doc_id: doc_id.clone(),
                transmission: Transmission::Update {
                    data: data.clone(),
                    version: version.clone(),
                },
            },
        });
    }
    commands
}

/// Answer a directory request with whatever the policy lets us list
pub(super) fn directory_request(
    model: &mut Model,
    channel_id: ChannelId,
    filter: Option<Vec<DocId>>,
) -> Vec<Command> {
    let doc_ids: Vec<DocId> = model
        .docs
        .keys()
        .filter(|doc_id| filter.as_ref().map_or(true, |f| f.contains(doc_id)))
        .filter(|doc_id| {
            model
                .permission_ctx(channel_id, doc_id)
                .map_or(false, |ctx| model.permissions.may_list(&ctx))
        })
        .cloned()
        .collect();
    vec![Command::Send {
        to: channel_id,
        message: ProtocolMessage::DirectoryResponse { doc_ids },
    }]
}

/// Digest a directory listing: mark awareness, request what we hold
pub(super) fn directory_response(
    model: &mut Model,
    channel_id: ChannelId,
    doc_ids: Vec<DocId>,
) -> Vec<Command> {
    let Some(peer_id) = model
        .channels
        .get(&channel_id)
        .and_then(|c| c.peer_id())
        .cloned()
    else {
        return vec![Command::warn(format!(
            "directory-response on unestablished {channel_id}"
        ))];
    };
    let listed: BTreeSet<DocId> = doc_ids.iter().cloned().collect();
    if let Some(peer) = model.peers.get_mut(&peer_id) {
        for doc_id in &doc_ids {
            peer.awareness.insert(doc_id.clone(), DocAwareness::HasDoc);
        }
    }

    let mut commands = Vec::new();
    let mut absent = Vec::new();
    let held: Vec<DocId> = model.docs.keys().cloned().collect();
    for doc_id in held {
        // catching up reveals that we track the document
        let may_request = model
            .permission_ctx(channel_id, &doc_id)
            .map_or(false, |ctx| model.permissions.may_reveal(&ctx));
        let Some(doc) = model.docs.get_mut(&doc_id) else {
            continue;
        };
        let state = doc.channels.entry(channel_id).or_default();
        if listed.contains(&doc_id) {
            state.awareness = DocAwareness::HasDoc;
            if may_request && state.should_request() {
                state.loading = LoadingState::Requesting;
                let requester_version = doc.local_version.clone();
                commands.push(Command::Send {
                    to: channel_id,
                    message: ProtocolMessage::SyncRequest {
                        doc_id: doc_id.clone(),
                        requester_version,
                        bidirectional: true,
                    },
                });
                commands.push(Command::EmitReadyStates { doc_id });
            }
        } else if state.awareness == DocAwareness::Unknown
            && state.loading == LoadingState::Initial
        {
            // Absence in a listing downgrades "unknown" to "no doc".
            // Filtered listings only omit docs that were not asked for,
            // and those have resolved or in-flight states by then.
            state.awareness = DocAwareness::NoDoc;
            state.loading = LoadingState::NotFound;
            absent.push(doc_id.clone());
            commands.push(Command::EmitReadyStates { doc_id });
        }
    }
    if let Some(peer) = model.peers.get_mut(&peer_id) {
        for doc_id in absent {
            peer.awareness.entry(doc_id).or_insert(DocAwareness::NoDoc);
        }
    }
    commands
}

/// An unsolicited announcement: note it, and catch up if we hold the doc
pub(super) fn new_doc(
    model: &mut Model,
    channel_id: ChannelId,
    doc_ids: Vec<DocId>,
) -> Vec<Command> {
    let Some(peer_id) = model
        .channels
        .get(&channel_id)
        .and_then(|c| c.peer_id())
        .cloned()
    else {
        return vec![Command::warn(format!("new-doc on unestablished {channel_id}"))];
    };
    if let Some(peer) = model.peers.get_mut(&peer_id) {
        for doc_id in &doc_ids {
            peer.awareness.insert(doc_id.clone(), DocAwareness::HasDoc);
        }
    }
    let mut commands = Vec::new();
    for doc_id in doc_ids {
        let may_request = model
            .permission_ctx(channel_id, &doc_id)
            .map_or(false, |ctx| model.permissions.may_reveal(&ctx));
        let Some(doc) = model.docs.get_mut(&doc_id) else {
            continue;
        };
        let state = doc.channels.entry(channel_id).or_default();
        state.awareness = DocAwareness::HasDoc;
        if may_request && state.should_request() {
            state.loading = LoadingState::Requesting;
            let requester_version = doc.local_version.clone();
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::SyncRequest {
                    doc_id: doc_id.clone(),
                    requester_version,
                    bidirectional: true,
                },
            });
            commands.push(Command::EmitReadyStates { doc_id });
        }
    }
    commands
}

/// Version-aware answer to a sync request; also subscribes the sender
pub(super) fn sync_request(
    model: &mut Model,
    channel_id: ChannelId,
    doc_id: DocId,
    requester_version: VersionVector,
    bidirectional: bool,
) -> Vec<Command> {
    // Serving a sync request is subject to the same visibility policy as
    // listing: a denied document answers exactly like an absent one, so
    // guessed ids cannot bypass the directory gate.
    if model.docs.contains_key(&doc_id) {
        let allowed = model
            .permission_ctx(channel_id, &doc_id)
            .map_or(false, |ctx| model.permissions.may_list(&ctx));
        if !allowed {
            return vec![
                Command::debug(format!(
                    "sync-request for {doc_id} on {channel_id} denied by policy"
                )),
                Command::Send {
                    to: channel_id,
                    message: ProtocolMessage::SyncResponse {
                        doc_id,
                        transmission: Transmission::Unavailable,
                    },
                },
            ];
        }
    }

    let peer_id = model
        .channels
        .get(&channel_id)
        .and_then(|c| c.peer_id())
        .cloned();
    if let Some(peer) = peer_id.as_ref().and_then(|id| model.peers.get_mut(id)) {
        peer.subscriptions.insert(doc_id.clone());
        peer.awareness.insert(doc_id.clone(), DocAwareness::HasDoc);
    }

    let Some(doc) = model.docs.get_mut(&doc_id) else {
        return vec![
            Command::debug(format!("sync-request for unknown {doc_id}")),
            Command::Send {
                to: channel_id,
                message: ProtocolMessage::SyncResponse {
                    doc_id,
                    transmission: Transmission::Unavailable,
                },
            },
        ];
    };
    let state = doc.channels.entry(channel_id).or_default();
    state.wants_updates = true;
    state.awareness = DocAwareness::HasDoc;
    let local_version = doc.local_version.clone();

    let mut commands = Vec::new();
    if requester_version.covers(&local_version) {
        // Equal or ahead of us either way: nothing to transmit.
        commands.push(Command::Send {
            to: channel_id,
            message: ProtocolMessage::SyncResponse {
                doc_id: doc_id.clone(),
                transmission: Transmission::UpToDate {
                    version: local_version.clone(),
                },
            },
        });
    } else if requester_version.is_empty() {
        commands.push(Command::ExportAndSend {
            doc_id: doc_id.clone(),
            to: channel_id,
            since: None,
        });
    } else {
        commands.push(Command::ExportAndSend {
            doc_id: doc_id.clone(),
            to: channel_id,
            since: Some(requester_version.clone()),
        });
    }

    if bidirectional {
        if let Some(state) = model
            .docs
            .get_mut(&doc_id)
            .and_then(|d| d.channels.get_mut(&channel_id))
        {
            if state.should_request() {
                state.loading = LoadingState::Requesting;
                commands.push(Command::Send {
                    to: channel_id,
                    message: ProtocolMessage::SyncRequest {
                        doc_id: doc_id.clone(),
                        requester_version: local_version,
                        bidirectional: false,
                    },
                });
                commands.push(Command::EmitReadyStates {
                    doc_id: doc_id.clone(),
                });
            }
        }
    }

    // Late joiner: hand over the presence the new subscriber cannot have
    // seen, so it does not wait a full heartbeat interval.
    if let Some(entries) = model.ephemeral.docs.get(&doc_id) {
        let stores: Vec<EphemeralBlip> = entries
            .iter()
            .filter(|(writer, _)| Some(*writer) != peer_id.as_ref())
            .filter_map(|(writer, entry)| {
                EphemeralBlip::from_value(writer.clone(), entry.seq, &entry.value).ok()
            })
            .collect();
        if !stores.is_empty() {
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::Ephemeral {
                    doc_id,
                    hops_remaining: 0,
                    stores,
                },
            });
        }
    }
    commands
}

/// Digest a sync response; data payloads go through the import path
pub(super) fn sync_response(
    model: &mut Model,
    channel_id: ChannelId,
    doc_id: DocId,
    transmission: Transmission,
) -> Vec<Command> {
    let Some(doc) = model.docs.get_mut(&doc_id) else {
        return vec![Command::warn(format!(
            "sync-response for unknown {doc_id} from {channel_id}"
        ))];
    };
    let state = doc.channels.entry(channel_id).or_default();
    match transmission {
        Transmission::UpToDate { version } => {
            state.awareness = DocAwareness::HasDoc;
            state.loading = LoadingState::Found { version };
            vec![Command::EmitReadyStates { doc_id }]
        }
        Transmission::Unavailable => {
            state.awareness = DocAwareness::NoDoc;
            state.loading = LoadingState::NotFound;
            let peer_id = model
                .channels
                .get(&channel_id)
                .and_then(|c| c.peer_id())
                .cloned();
            if let Some(peer) = peer_id.and_then(|id| model.peers.get_mut(&id)) {
                peer.awareness.insert(doc_id.clone(), DocAwareness::NoDoc);
            }
            vec![Command::EmitReadyStates { doc_id }]
        }
        Transmission::Snapshot { data, .. } | Transmission::Update { data, .. } => {
            state.awareness = DocAwareness::HasDoc;
            vec![Command::ImportDoc {
                doc_id,
                from_channel: channel_id,
                data,
            }]
        }
    }
}

/// A streamed update for a subscribed document
pub(super) fn update_received(
    model: &mut Model,
    channel_id: ChannelId,
    doc_id: DocId,
    transmission: Transmission,
) -> Vec<Command> {
    if !model.docs.contains_key(&doc_id) {
        return vec![Command::warn(format!(
            "update for unknown {doc_id} from {channel_id}"
        ))];
    }
    match transmission {
        Transmission::Snapshot { data, .. } | Transmission::Update { data, .. } => {
            vec![Command::ImportDoc {
                doc_id,
                from_channel: channel_id,
                data,
            }]
        }
        other => vec![Command::warn(format!(
            "update for {doc_id} carried {} instead of data",
            other.kind()
        ))],
    }
}

/// A peer wants us to drop a document; replicas answer for themselves
///
/// Network peers own their copies, so the answer is `Ignored`; only
/// storage peers act on deletion, inside the storage adapter.
pub(super) fn delete_request(
    _model: &mut Model,
    channel_id: ChannelId,
    doc_id: DocId,
) -> Vec<Command> {
    vec![
        Command::debug(format!("ignoring delete-request for {doc_id}")),
        Command::Send {
            to: channel_id,
            message: ProtocolMessage::DeleteResponse {
                doc_id,
                status: DeleteStatus::Ignored,
            },
        },
    ]
}

pub(super) fn delete_response(
    model: &mut Model,
    channel_id: ChannelId,
    doc_id: DocId,
    status: DeleteStatus,
) -> Vec<Command> {
    if status == DeleteStatus::Deleted {
        let peer_id = model
            .channels
            .get(&channel_id)
            .and_then(|c| c.peer_id())
            .cloned();
        if let Some(peer) = peer_id.and_then(|id| model.peers.get_mut(&id)) {
            peer.awareness.insert(doc_id.clone(), DocAwareness::NoDoc);
        }
    }
    vec![Command::debug(format!(
        "{doc_id} delete answered {status:?} by {channel_id}"
    ))]
}
