//! Command executor and send batcher
//!
//! The executor interprets the command data the update core returns. It
//! owns everything the model must not: live documents (via the
//! registry), the channel directory's outbound senders, the timer
//! registry, and the per-channel send buffers.
//!
//! Send batching: every `Send` and `ExportAndSend` produced in one
//! dispatch cycle lands in a per-destination buffer. `flush` then emits
//! at most one physical message per destination - two or more buffered
//! messages collapse into a single flat batch envelope. Batching never
//! crosses channels.

use crate::command::{Command, LogLevel, TimerKey};
use crate::message::{ImportResult, Message};
use crate::model::Model;
use crate::registry::DocRegistry;
use crate::synchronizer::Input;
use folio_core::{AdapterType, ChannelId, ChannelKind, ProtocolMessage, Transmission};
use folio_transport::ChannelSender;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Directory entry for one channel's outbound half
pub(crate) struct ChannelPort {
    pub kind: ChannelKind,
    pub adapter_type: AdapterType,
    pub sender: Arc<dyn ChannelSender>,
}

pub(crate) struct Executor {
    registry: DocRegistry,
    ports: Arc<RwLock<HashMap<ChannelId, ChannelPort>>>,
    mailbox: mpsc::UnboundedSender<Input>,
    timers: HashMap<TimerKey, JoinHandle<()>>,
    buffers: BTreeMap<ChannelId, Vec<ProtocolMessage>>,
}

impl Executor {
    pub fn new(
        registry: DocRegistry,
        ports: Arc<RwLock<HashMap<ChannelId, ChannelPort>>>,
        mailbox: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            registry,
            ports,
            mailbox,
            timers: HashMap::new(),
            buffers: BTreeMap::new(),
        }
    }

    /// Interpret one command tree; batches run in declaration order
    pub fn run(&mut self, command: Command, model: &Model) {
        match command {
            Command::Batch(commands) => {
                for inner in commands {
                    self.run(inner, model);
                }
            }
            Command::Send { to, message } => {
                self.buffers.entry(to).or_default().push(message);
            }
            Command::ExportAndSend { doc_id, to, since } => {
                let Some(shared) = self.registry.get(&doc_id) else {
                    tracing::warn!(target: "folio::sync", doc = %doc_id, "export for unknown document");
                    return;
                };
                let (data, version) = shared.doc.export_with_version(since.as_ref());
                let transmission = if since.is_none() {
                    Transmission::Snapshot { data, version }
                } else {
                    Transmission::Update { data, version }
                };
                self.buffers.entry(to).or_default().push(
                    ProtocolMessage::SyncResponse {
                        doc_id,
                        transmission,
                    },
                );
            }
            Command::ImportDoc {
                doc_id,
                from_channel,
                data,
            } => {
                let Some(shared) = self.registry.get(&doc_id) else {
                    tracing::warn!(target: "folio::sync", doc = %doc_id, "import for unknown document");
                    return;
                };
                let outcome = match shared.doc.import(&data) {
                    Ok(outcome) => ImportResult::Applied {
                        version: outcome.version,
                        changed: outcome.changed,
                    },
                    Err(e) => ImportResult::Failed {
                        reason: e.to_string(),
                    },
                };
                // enqueued, never recursed: the model settles between cycles
                let _ = self.mailbox.send(Input::Message(Message::DocImported {
                    doc_id,
                    from_channel,
                    data,
                    outcome,
                }));
            }
            Command::EnsureDoc { doc_id } => {
                self.registry.ensure(&doc_id, self.mailbox.clone());
            }
            Command::RemoveDoc { doc_id } => {
                self.registry.remove(&doc_id);
            }
            Command::StartChannel { channel_id } => {
                tracing::debug!(target: "folio::sync", channel = %channel_id, "channel started");
            }
            Command::StopChannel { channel_id } => {
                if let Some(port) = self.ports.write().remove(&channel_id) {
                    port.sender.stop();
                }
                self.buffers.remove(&channel_id);
            }
            Command::SetTimeout { key, delay } => {
                let Some(message) = timer_message(key) else {
                    tracing::debug!(target: "folio::sync", ?key, "timer key carries no message");
                    return;
                };
                let mailbox = self.mailbox.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = mailbox.send(Input::Message(message));
                });
                if let Some(previous) = self.timers.insert(key, task) {
                    previous.abort();
                }
            }
            Command::ClearTimeout { key } => {
                if let Some(task) = self.timers.remove(&key) {
                    task.abort();
                }
            }
            Command::EmitReadyStates { doc_id } => {
                if let Some(shared) = self.registry.get(&doc_id) {
                    shared.publish_ready(model.ready_states(&doc_id));
                }
            }
            Command::EmitEphemeralChange { doc_id, changes } => {
                if let Some(shared) = self.registry.get(&doc_id) {
                    shared.publish_ephemeral(
                        &doc_id,
                        changes
                            .into_iter()
                            .map(|delta| (delta.peer_id, delta.value))
                            .collect(),
                    );
                }
            }
            Command::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!(target: "folio::sync", "{message}"),
                LogLevel::Warn => tracing::warn!(target: "folio::sync", "{message}"),
                LogLevel::Error => tracing::error!(target: "folio::sync", "{message}"),
            },
        }
    }

    /// End of one dispatch cycle: at most one physical send per channel
    pub fn flush(&mut self) {
        let buffers = std::mem::take(&mut self.buffers);
        for (channel_id, messages) in buffers {
            let count = messages.len();
            let Some(message) = ProtocolMessage::from_parts(messages) else {
                continue;
            };
            let sender = self
                .ports
                .read()
                .get(&channel_id)
                .map(|port| port.sender.clone());
            let Some(sender) = sender else {
                tracing::debug!(
                    target: "folio::sync",
                    channel = %channel_id,
                    "dropping {count} buffered messages for removed channel"
                );
                continue;
            };
            if let Err(e) = sender.send(message) {
                tracing::warn!(
                    target: "folio::sync",
                    channel = %channel_id,
                    error = %e,
                    "send failed; removing channel"
                );
                let _ = self
                    .mailbox
                    .send(Input::Message(Message::ChannelRemoved { channel_id }));
            }
        }
    }

    /// Drop timers and buffered output (reset and shutdown paths)
    pub fn reset(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
        self.buffers.clear();
        for (_, port) in self.ports.write().drain() {
            port.sender.stop();
        }
    }
}

fn timer_message(key: TimerKey) -> Option<Message> {
    match key {
        TimerKey::Heartbeat => Some(Message::Heartbeat),
        TimerKey::Channel(_) => None,
    }
}
