//! # Folio Core - shared types for the synchronization runtime
//!
//! This crate holds everything the rest of the workspace agrees on:
//!
//! - Identifier newtypes and peer identity ([`identifiers`])
//! - Version vectors and their partial order ([`version`])
//! - The protocol message union and wire codec ([`protocol`])
//! - Per-channel ready states observed by applications ([`ready`])
//! - Synchronous permission policy hooks ([`permissions`])
//! - The CRDT engine wrapper over `yrs` ([`doc`])
//!
//! Nothing in this crate performs I/O; transports and the synchronizer
//! build on these types from the other workspace crates.

pub mod doc;
pub mod identifiers;
pub mod permissions;
pub mod protocol;
pub mod ready;
pub mod version;

pub use doc::{DocError, DocSubscription, ImportOutcome, LocalUpdate, SharedDoc};
pub use identifiers::{AdapterType, ChannelId, ChannelKind, DocId, PeerId, PeerIdentity, PeerKind};
pub use permissions::{AllowAll, FnPolicy, PermissionContext, PermissionPolicy};
pub use protocol::{DeleteStatus, EphemeralBlip, ProtocolMessage, Transmission, WireError};
pub use ready::{ChannelMeta, DocAwareness, LoadingState, ReadyState};
pub use version::{VersionOrdering, VersionVector};
