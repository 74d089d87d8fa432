//! # Folio Transport - channels, adapters, and storage-as-peer
//!
//! A *channel* is one bidirectional message link to a single counterpart;
//! an *adapter* is the factory and supervisor for a family of channels
//! over one transport. This crate defines the contracts the synchronizer
//! consumes ([`channel`], [`adapter`]) plus two concrete adapters:
//!
//! - [`bridge`]: an in-process byte link, used to wire repos together in
//!   tests and single-process topologies.
//! - [`storage`]: a base adapter that lets any key/blob store masquerade
//!   as a peer speaking the full sync protocol.

pub mod adapter;
pub mod bridge;
pub mod channel;
pub mod storage;

pub use adapter::{Adapter, AdapterHost, ChannelSpec};
pub use bridge::{bridge_pair, BridgeAdapter};
pub use channel::{ChannelHandle, ChannelSender, InboundSink, TransportError};
pub use storage::{
    BlobStore, FsBlobStore, MemoryBlobStore, StorageAdapter, StorageChunk, StorageError,
    StorageKey,
};
