//! Presence: set-self, dedup-and-relay, heartbeat

use crate::command::{Command, EphemeralDelta, TimerKey};
use crate::model::{EphemeralEntry, Model};
use folio_core::protocol::DEFAULT_EPHEMERAL_HOPS;
use folio_core::{ChannelId, DocId, EphemeralBlip, ProtocolMessage};

/// Replace our own presence entry and broadcast it
pub(super) fn local_change(
    model: &mut Model,
    doc_id: DocId,
    value: serde_json::Value,
) -> Vec<Command> {
    if !model.docs.contains_key(&doc_id) {
        return vec![Command::warn(format!(
            "ephemeral change for unknown {doc_id}"
        ))];
    }
    let seq = {
        let counter = model.ephemeral.own_seq.entry(doc_id.clone()).or_insert(0);
        *counter += 1;
        *counter
    };
    let me = model.identity.peer_id.clone();
    model
        .ephemeral
        .docs
        .entry(doc_id.clone())
        .or_default()
        .insert(
            me.clone(),
            EphemeralEntry {
                value: value.clone(),
                seq,
            },
        );

    let mut commands = Vec::new();
    match EphemeralBlip::from_value(me.clone(), seq, &value) {
        Ok(blip) => {
            for peer in model.peers.values() {
                if !peer.subscriptions.contains(&doc_id) {
                    continue;
                }
                let Some(channel_id) = peer.representative_channel() else {
                    continue;
                };
                commands.push(Command::Send {
                    to: channel_id,
                    message: ProtocolMessage::Ephemeral {
                        doc_id: doc_id.clone(),
                        hops_remaining: DEFAULT_EPHEMERAL_HOPS,
                        stores: vec![blip.clone()],
                    },
                });
            }
        }
        Err(e) => commands.push(Command::warn(format!(
            "unencodable ephemeral value for {doc_id}: {e}"
        ))),
    }
    commands.push(Command::EmitEphemeralChange {
        doc_id,
        changes: vec![EphemeralDelta {
            peer_id: me,
            value: Some(value),
        }],
    });
    commands
}

/// Apply incoming presence entries and relay what was actually fresh
///
/// Sequence numbers give O(1) dedup per (doc, writer) and make replays
/// (heartbeats, out-of-order delivery) harmless. Only entries that were
/// fresh here are relayed further; stale entries die at this hop, which
/// is what keeps relay cycles finite.
pub(super) fn received(
    model: &mut Model,
    channel_id: ChannelId,
    doc_id: DocId,
    hops_remaining: u8,
    stores: Vec<EphemeralBlip>,
) -> Vec<Command> {
    if !model.docs.contains_key(&doc_id) {
        return vec![Command::debug(format!(
            "ephemeral for unknown {doc_id} from {channel_id}"
        ))];
    }
    let source_peer = model
        .channels
        .get(&channel_id)
        .and_then(|c| c.peer_id())
        .cloned();
    let me = model.identity.peer_id.clone();

    let mut commands = Vec::new();
    let mut fresh = Vec::new();
    let mut deltas = Vec::new();
    let entries = model.ephemeral.docs.entry(doc_id.clone()).or_default();
    for blip in stores {
        if blip.peer_id == me {
            // our own entry bounced back
            continue;
        }
        let newer = entries
            .get(&blip.peer_id)
            .map_or(true, |entry| blip.seq > entry.seq);
        if !newer {
            continue;
        }
        match blip.value() {
            Ok(value) => {
                entries.insert(
                    blip.peer_id.clone(),
                    EphemeralEntry {
                        value: value.clone(),
                        seq: blip.seq,
                    },
                );
                deltas.push(EphemeralDelta {
                    peer_id: blip.peer_id.clone(),
                    value: Some(value),
                });
                fresh.push(blip);
            }
            Err(e) => commands.push(Command::warn(format!(
                "undecodable ephemeral entry from {} for {doc_id}: {e}",
                blip.peer_id
            ))),
        }
    }

    if !deltas.is_empty() {
        commands.push(Command::EmitEphemeralChange {
            doc_id: doc_id.clone(),
            changes: deltas,
        });
    }

    if hops_remaining > 0 && !fresh.is_empty() {
        for (peer_id, peer) in &model.peers {
            if Some(peer_id) == source_peer.as_ref() {
                continue;
            }
            if !peer.subscriptions.contains(&doc_id) {
                continue;
            }
            let Some(relay_channel) = peer.representative_channel() else {
                continue;
            };
            // never hand a writer its own entries back
            let stores: Vec<EphemeralBlip> = fresh
                .iter()
                .filter(|blip| &blip.peer_id != peer_id)
                .cloned()
                .collect();
            if stores.is_empty() {
                continue;
            }
            commands.push(Command::Send {
                to: relay_channel,
                message: ProtocolMessage::Ephemeral {
                    doc_id: doc_id.clone(),
                    hops_remaining: hops_remaining - 1,
                    stores,
                },
            });
        }
    }
    commands
}

/// Full rebroadcast, one batch of messages per destination peer
///
/// Heartbeats are the only recovery path for missed presence updates;
/// monotonic sequence numbers make the replay harmless on the far side.
pub(super) fn heartbeat(model: &mut Model) -> Vec<Command> {
    let mut commands = Vec::new();
    for (peer_id, peer) in &model.peers {
        let Some(channel_id) = peer.representative_channel() else {
            continue;
        };
        for doc_id in &peer.subscriptions {
            let Some(entries) = model.ephemeral.docs.get(doc_id) else {
                continue;
            };
            let stores: Vec<EphemeralBlip> = entries
                .iter()
                .filter(|(writer, _)| *writer != peer_id)
                .filter_map(|(writer, entry)| {
                    EphemeralBlip::from_value(writer.clone(), entry.seq, &entry.value).ok()
                })
                .collect();
            if stores.is_empty() {
                continue;
            }
            commands.push(Command::Send {
                to: channel_id,
                message: ProtocolMessage::Ephemeral {
                    doc_id: doc_id.clone(),
                    hops_remaining: DEFAULT_EPHEMERAL_HOPS,
                    stores,
                },
            });
        }
    }
    commands.push(Command::SetTimeout {
        key: TimerKey::Heartbeat,
        delay: model.heartbeat_interval,
    });
    commands
}
