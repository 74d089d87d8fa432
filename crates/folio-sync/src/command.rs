//! Commands: effects described as data
//!
//! The update core returns these instead of performing I/O. The executor
//! interprets them after each dispatch; command order inside a batch is
//! execution order.

use folio_core::{ChannelId, DocId, PeerId, ProtocolMessage, VersionVector};
use std::time::Duration;

/// Logical timer names; setting a key cancels its previous timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Periodic ephemeral rebroadcast
    Heartbeat,
    /// Per-channel timers, cleared wholesale on channel removal
    Channel(ChannelId),
}

/// Severity for log commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Routine detail
    Debug,
    /// Dropped messages, protocol violations
    Warn,
    /// Failures worth operator attention
    Error,
}

/// One observed presence change, for local subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralDelta {
    /// Whose entry changed
    pub peer_id: PeerId,
    /// New value; `None` means the entry was removed
    pub value: Option<serde_json::Value>,
}

/// The full union of effects
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Append one message to the channel's per-cycle send buffer
    Send {
        /// Destination channel
        to: ChannelId,
        /// Message to deliver
        message: ProtocolMessage,
    },
    /// Run the channel's side-effectful startup, if it has any
    StartChannel {
        /// Target channel
        channel_id: ChannelId,
    },
    /// Stop the channel and release its directory entry
    StopChannel {
        /// Target channel
        channel_id: ChannelId,
    },
    /// Make sure a live document exists for this id
    EnsureDoc {
        /// Target document
        doc_id: DocId,
    },
    /// Drop the live document and its publishers
    RemoveDoc {
        /// Target document
        doc_id: DocId,
    },
    /// Import received bytes into the live document; the outcome comes
    /// back as a `DocImported` message
    ImportDoc {
        /// Target document
        doc_id: DocId,
        /// Source channel, for loading-state bookkeeping and forwarding
        from_channel: ChannelId,
        /// Snapshot or delta bytes
        data: Vec<u8>,
    },
    /// Export from the live document and buffer a sync response
    ///
    /// `since = None` exports a snapshot, `since = Some(v)` the delta a
    /// replica at `v` is missing. Goes through the same per-cycle send
    /// buffer as `Send`, so batching still collapses the cycle's output.
    ExportAndSend {
        /// Source document
        doc_id: DocId,
        /// Destination channel
        to: ChannelId,
        /// Requester's version, when known and non-empty
        since: Option<VersionVector>,
    },
    /// Arm (or re-arm) a single-shot timer
    SetTimeout {
        /// Logical timer name
        key: TimerKey,
        /// Delay until it fires
        delay: Duration,
    },
    /// Cancel a timer if armed
    ClearTimeout {
        /// Logical timer name
        key: TimerKey,
    },
    /// Notify local presence subscribers
    EmitEphemeralChange {
        /// Document whose presence changed
        doc_id: DocId,
        /// The applied changes, in order
        changes: Vec<EphemeralDelta>,
    },
    /// Publish a fresh ready-state snapshot for the document
    EmitReadyStates {
        /// Target document
        doc_id: DocId,
    },
    /// Emit a log line at the runtime boundary
    Log {
        /// Severity
        level: LogLevel,
        /// Preformatted text
        message: String,
    },
    /// Execute several commands in declaration order
    Batch(Vec<Command>),
}

impl Command {
    /// Collapse a command list: none, one, or a batch
    pub fn from_vec(mut commands: Vec<Command>) -> Option<Command> {
        match commands.len() {
            0 => None,
            1 => commands.pop(),
            _ => Some(Command::Batch(commands)),
        }
    }

    /// Convenience for warn-level log commands
    pub fn warn(message: impl Into<String>) -> Command {
        Command::Log {
            level: LogLevel::Warn,
            message: message.into(),
        }
    }

    /// Convenience for debug-level log commands
    pub fn debug(message: impl Into<String>) -> Command {
        Command::Log {
            level: LogLevel::Debug,
            message: message.into(),
        }
    }

    /// Count the leaf commands, looking through batches
    pub fn leaf_count(&self) -> usize {
        match self {
            Command::Batch(commands) => commands.iter().map(Command::leaf_count).sum(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_collapses() {
        assert_eq!(Command::from_vec(vec![]), None);
        let single = Command::from_vec(vec![Command::warn("x")]).unwrap();
        assert_eq!(single, Command::warn("x"));
        let batch = Command::from_vec(vec![Command::warn("x"), Command::debug("y")]).unwrap();
        assert_eq!(batch.leaf_count(), 2);
    }

    #[test]
    fn leaf_count_sees_through_nesting() {
        let nested = Command::Batch(vec![
            Command::warn("a"),
            Command::Batch(vec![Command::warn("b"), Command::warn("c")]),
        ]);
        assert_eq!(nested.leaf_count(), 3);
    }
}
