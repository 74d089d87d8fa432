//! Messages: every external event the update core can see
//!
//! Adapters, timers, the executor, and application handles all talk to
//! the model exclusively through these values, one dispatch at a time.

use folio_core::{AdapterType, ChannelId, ChannelKind, DocId, ProtocolMessage, VersionVector};

/// Outcome reported back after the executor ran an import
#[derive(Debug, Clone, PartialEq)]
pub enum ImportResult {
    /// Bytes applied (or found already known)
    Applied {
        /// Document version after the import
        version: VersionVector,
        /// False when the import was a no-op
        changed: bool,
    },
    /// Bytes were rejected by the engine
    Failed {
        /// Engine's reason
        reason: String,
    },
}

/// The full union of external events
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An adapter registered a new channel
    ChannelAdded {
        /// Directory-assigned id
        channel_id: ChannelId,
        /// Network or storage
        kind: ChannelKind,
        /// Owning adapter's tag
        adapter_type: AdapterType,
    },
    /// A channel is terminally gone (transport error or adapter stop)
    ChannelRemoved {
        /// The dead channel
        channel_id: ChannelId,
    },
    /// A protocol message arrived on a channel
    ChannelReceive {
        /// Source channel
        channel_id: ChannelId,
        /// The message (already past the middleware gate)
        message: ProtocolMessage,
    },
    /// The application wants this document to exist locally
    DocEnsure {
        /// Requested document
        doc_id: DocId,
    },
    /// The application deletes this document
    DocDelete {
        /// Deleted document
        doc_id: DocId,
    },
    /// A local commit happened on a live document
    LocalDocChange {
        /// Changed document
        doc_id: DocId,
        /// Incremental bytes of the commit
        data: Vec<u8>,
        /// Version after the commit
        version: VersionVector,
    },
    /// The executor finished an import requested by a command
    DocImported {
        /// Target document
        doc_id: DocId,
        /// Channel the bytes came from
        from_channel: ChannelId,
        /// The imported bytes, for forwarding to other subscribers
        data: Vec<u8>,
        /// What the engine said
        outcome: ImportResult,
    },
    /// The heartbeat timer fired
    Heartbeat,
    /// The application set its own presence value for a document
    EphemeralLocalChange {
        /// Target document
        doc_id: DocId,
        /// New presence value
        value: serde_json::Value,
    },
}

impl Message {
    /// Short tag for logging and the patch sink
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelAdded { .. } => "channel-added",
            Self::ChannelRemoved { .. } => "channel-removed",
            Self::ChannelReceive { .. } => "channel-receive",
            Self::DocEnsure { .. } => "doc-ensure",
            Self::DocDelete { .. } => "doc-delete",
            Self::LocalDocChange { .. } => "local-doc-change",
            Self::DocImported { .. } => "doc-imported",
            Self::Heartbeat => "heartbeat",
            Self::EphemeralLocalChange { .. } => "ephemeral-local-change",
        }
    }
}
