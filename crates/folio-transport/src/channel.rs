//! Channel contracts
//!
//! A channel has two halves. The outbound half ([`ChannelSender`]) is
//! implemented by the adapter and consumed by the synchronizer's channel
//! directory. The inbound half ([`ChannelHandle`]) is handed to the
//! adapter at registration; the adapter pushes received messages and the
//! eventual close through it, and the synchronizer enqueues them into its
//! dispatch loop. Neither half ever blocks the other.

use folio_core::{ChannelId, ProtocolMessage};
use std::sync::Arc;

/// Transport-level failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The counterpart is gone; the channel is terminally dead
    #[error("channel closed")]
    ChannelClosed,
    /// Adapter could not be started or stopped
    #[error("adapter lifecycle error: {0}")]
    Lifecycle(String),
    /// Sending failed for a transport-specific reason
    #[error("send failed: {0}")]
    Send(String),
    /// Underlying I/O failure
    #[error("transport i/o error: {0}")]
    Io(String),
}

/// Outbound half of a channel, implemented by adapters
pub trait ChannelSender: Send + Sync {
    /// Deliver one protocol message to the counterpart
    fn send(&self, message: ProtocolMessage) -> Result<(), TransportError>;

    /// Tear the link down; further sends fail with `ChannelClosed`
    fn stop(&self);
}

/// Inbound half of a channel, implemented by the synchronizer
///
/// Implementations enqueue; they never process a message inline, so an
/// adapter replying synchronously during a send cannot re-enter the model
/// mid-transition.
pub trait InboundSink: Send + Sync {
    /// A message arrived on the given channel
    fn channel_received(&self, channel_id: ChannelId, message: ProtocolMessage);

    /// The transport reports the channel gone
    fn channel_closed(&self, channel_id: ChannelId);
}

/// Adapter-side handle for one registered channel
#[derive(Clone)]
pub struct ChannelHandle {
    channel_id: ChannelId,
    sink: Arc<dyn InboundSink>,
}

impl ChannelHandle {
    /// Wrap a sink for one channel id
    pub fn new(channel_id: ChannelId, sink: Arc<dyn InboundSink>) -> Self {
        Self { channel_id, sink }
    }

    /// The directory-assigned channel id
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Push one received message toward the dispatch loop
    pub fn receive(&self, message: ProtocolMessage) {
        self.sink.channel_received(self.channel_id, message);
    }

    /// Report the channel terminally closed
    pub fn close(&self) {
        self.sink.channel_closed(self.channel_id);
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}
