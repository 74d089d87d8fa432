//! The synchronizer task
//!
//! One task owns the model. Adapters, handles, and timers feed it
//! through an unbounded mailbox; each input is one dispatch cycle:
//! middleware gate (inbound protocol messages only), pure update,
//! command execution, send-buffer flush. Inputs that arrive while a
//! cycle runs are queued, never recursed into, so the model is always
//! consistent between dispatches.

use crate::executor::{ChannelPort, Executor};
use crate::message::Message;
use crate::middleware::{ChannelFacts, MiddlewarePipeline};
use crate::model::Model;
use crate::registry::DocRegistry;
use crate::update::update;
use folio_core::ChannelId;
use folio_transport::{AdapterHost, ChannelHandle, ChannelSpec, InboundSink};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Everything that can arrive in the synchronizer's mailbox
#[derive(Debug)]
pub(crate) enum Input {
    /// A dispatchable message
    Message(Message),
    /// A runtime control request
    Control(Control),
}

/// Runtime control requests from the repo
#[derive(Debug)]
pub(crate) enum Control {
    /// Clear the model, timers, and registry; keep identity and policy
    Reset {
        /// Acknowledged once the model is back at its initial state
        ack: oneshot::Sender<()>,
    },
    /// Stop the task
    Shutdown {
        /// Acknowledged just before the task exits
        ack: oneshot::Sender<()>,
    },
}

/// Structured summary of one model transition, for the debug sink
#[derive(Debug, Clone)]
pub struct ModelPatch {
    /// Kind of the message that drove the transition
    pub message: &'static str,
    /// Channel count after the transition
    pub channels: usize,
    /// Peer count after the transition
    pub peers: usize,
    /// Document count after the transition
    pub docs: usize,
    /// Leaf commands the transition produced
    pub commands: usize,
}

/// Debug sink receiving a patch per transition
pub type UpdateSink = Arc<dyn Fn(ModelPatch) + Send + Sync>;

pub(crate) struct Synchronizer {
    pub model: Model,
    pub executor: Executor,
    pub middleware: MiddlewarePipeline,
    pub inputs: mpsc::UnboundedReceiver<Input>,
    pub registry: DocRegistry,
    pub on_update: Option<UpdateSink>,
}

impl Synchronizer {
    pub async fn run(mut self) {
        while let Some(input) = self.inputs.recv().await {
            match input {
                Input::Message(message) => self.dispatch(message).await,
                Input::Control(Control::Reset { ack }) => {
                    self.model.clear();
                    self.executor.reset();
                    self.registry.clear();
                    let _ = ack.send(());
                }
                Input::Control(Control::Shutdown { ack }) => {
                    self.executor.reset();
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }

    /// One dispatch cycle
    async fn dispatch(&mut self, message: Message) {
        // Middleware is the only async boundary on the inbound path;
        // everything after it is synchronous until the flush.
        let message = match message {
            Message::ChannelReceive {
                channel_id,
                message: protocol,
            } if !self.middleware.is_empty() => {
                let Some(facts) = self.channel_facts(channel_id) else {
                    // unknown channel; let the core log the violation
                    self.dispatch_gated(Message::ChannelReceive {
                        channel_id,
                        message: protocol,
                    });
                    return;
                };
                match self.middleware.filter_inbound(&facts, protocol).await {
                    Some(survivor) => Message::ChannelReceive {
                        channel_id,
                        message: survivor,
                    },
                    None => return,
                }
            }
            other => other,
        };
        self.dispatch_gated(message);
    }

    /// The synchronous tail of a dispatch cycle
    fn dispatch_gated(&mut self, message: Message) {
        let kind = message.kind();
        let command = update(&mut self.model, message);
        if let Some(sink) = &self.on_update {
            sink(ModelPatch {
                message: kind,
                channels: self.model.channels.len(),
                peers: self.model.peers.len(),
                docs: self.model.docs.len(),
                commands: command.as_ref().map_or(0, |c| c.leaf_count()),
            });
        }
        if let Some(command) = command {
            self.executor.run(command, &self.model);
        }
        self.executor.flush();
    }

    fn channel_facts(&self, channel_id: ChannelId) -> Option<ChannelFacts> {
        let channel = self.model.channels.get(&channel_id)?;
        let peer = channel
            .peer_id()
            .and_then(|id| self.model.peers.get(id))
            .map(|p| p.identity.clone());
        Some(ChannelFacts {
            channel_id,
            channel_kind: channel.kind,
            adapter_type: channel.adapter_type.clone(),
            peer,
        })
    }
}

/// Shared handle into the running synchronizer
///
/// Implements the adapter host (channel registration) and the inbound
/// sink (message delivery); both only enqueue into the mailbox.
#[derive(Clone)]
pub(crate) struct SyncHandle {
    pub mailbox: mpsc::UnboundedSender<Input>,
    pub registry: DocRegistry,
    pub ports: Arc<RwLock<HashMap<ChannelId, ChannelPort>>>,
    next_channel: Arc<AtomicU64>,
}

impl SyncHandle {
    pub fn new(
        mailbox: mpsc::UnboundedSender<Input>,
        registry: DocRegistry,
        ports: Arc<RwLock<HashMap<ChannelId, ChannelPort>>>,
    ) -> Self {
        Self {
            mailbox,
            registry,
            ports,
            next_channel: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl AdapterHost for SyncHandle {
    fn add_channel(&self, spec: ChannelSpec) -> ChannelHandle {
        // ids are monotonically assigned and never reused
        let channel_id = ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst) + 1);
        self.ports.write().insert(
            channel_id,
            ChannelPort {
                kind: spec.kind,
                adapter_type: spec.adapter_type.clone(),
                sender: spec.sender,
            },
        );
        let _ = self.mailbox.send(Input::Message(Message::ChannelAdded {
            channel_id,
            kind: spec.kind,
            adapter_type: spec.adapter_type,
        }));
        ChannelHandle::new(channel_id, Arc::new(self.clone()))
    }

    fn remove_channel(&self, channel_id: ChannelId) {
        let _ = self
            .mailbox
            .send(Input::Message(Message::ChannelRemoved { channel_id }));
    }
}

impl InboundSink for SyncHandle {
    fn channel_received(&self, channel_id: ChannelId, message: folio_core::ProtocolMessage) {
        let _ = self.mailbox.send(Input::Message(Message::ChannelReceive {
            channel_id,
            message,
        }));
    }

    fn channel_closed(&self, channel_id: ChannelId) {
        let _ = self
            .mailbox
            .send(Input::Message(Message::ChannelRemoved { channel_id }));
    }
}
