//! # Folio Sync - the document synchronization runtime
//!
//! The synchronizer keeps a set of named CRDT documents consistent
//! across peers connected through heterogeneous transports, and
//! propagates transient per-peer presence alongside.
//!
//! The heart of the crate is a pure update core in the
//! message/model/command style:
//!
//! - [`message::Message`] is the union of external events
//! - [`model::Model`] is the synchronizer's complete mutable state
//! - [`update::update`] is the total transition function; it performs no
//!   I/O and returns [`command::Command`] data describing every effect
//! - the executor interprets commands, batching all sends of one
//!   dispatch cycle into at most one physical message per destination
//!
//! Applications use the [`repo::Repo`] and per-document
//! [`handle::DocHandle`] surfaces; transports plug in through the
//! adapter contracts of `folio-transport`.

pub mod command;
pub mod handle;
pub mod message;
pub mod middleware;
pub mod model;
pub mod repo;
pub mod update;

mod executor;
mod registry;
mod synchronizer;

pub use command::{Command, EphemeralDelta, LogLevel, TimerKey};
pub use handle::{DocHandle, EphemeralScope, WaitTimeout};
pub use message::{ImportResult, Message};
pub use middleware::{
    ContextRequirement, Middleware, MiddlewareContext, MiddlewareError, Verdict,
};
pub use model::{Model, DEFAULT_HEARTBEAT_INTERVAL};
pub use registry::EphemeralEvent;
pub use repo::{Repo, RepoConfig, RepoError};
pub use synchronizer::{ModelPatch, UpdateSink};
pub use update::update;
