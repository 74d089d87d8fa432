//! Adapter lifecycle contract
//!
//! Adapters create channels only between `start` and `stop`. The host
//! (implemented by the synchronizer) assigns channel ids and wires each
//! new channel into the dispatch loop; the adapter supervises the
//! transport side and reports closure through the channel's handle.
//! Reconnection is an adapter concern: a reconnect shows up as a brand
//! new channel, possibly carrying the same peer identity.

use crate::channel::{ChannelHandle, ChannelSender, TransportError};
use async_trait::async_trait;
use folio_core::{AdapterType, ChannelId, ChannelKind};
use std::sync::Arc;

/// Everything the host needs to register one channel
pub struct ChannelSpec {
    /// Network or storage
    pub kind: ChannelKind,
    /// Owning adapter's tag
    pub adapter_type: AdapterType,
    /// Outbound half of the new channel
    pub sender: Arc<dyn ChannelSender>,
}

impl std::fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("kind", &self.kind)
            .field("adapter_type", &self.adapter_type)
            .finish()
    }
}

/// Registration surface offered to adapters by the synchronizer
pub trait AdapterHost: Send + Sync {
    /// Register a channel; the returned handle carries its assigned id
    fn add_channel(&self, spec: ChannelSpec) -> ChannelHandle;

    /// Deregister a channel the adapter tore down itself
    fn remove_channel(&self, channel_id: ChannelId);
}

/// Factory and supervisor for a family of channels over one transport
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Tag grouping this adapter's channels
    fn adapter_type(&self) -> AdapterType;

    /// Bring the transport up; may register channels from here on
    async fn start(&self, host: Arc<dyn AdapterHost>) -> Result<(), TransportError>;

    /// Tear the transport down and close all of its channels
    async fn stop(&self) -> Result<(), TransportError>;
}
