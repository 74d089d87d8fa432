//! Middleware: the async inbound gate
//!
//! An ordered list of access checks runs at the async boundary, before
//! any inbound protocol message reaches the update core. Checks
//! short-circuit on the first deny, and a failing check denies (fail
//! closed). Batched messages are checked per inner message; survivors are
//! reassembled into a single message or a smaller batch.
//!
//! This is the place for rate limiting, payload caps, external auth and
//! audit logging. Synchronous per-document policy belongs to
//! [`folio_core::PermissionPolicy`] instead, consulted inside the core.

use async_trait::async_trait;
use folio_core::{
    AdapterType, ChannelId, ChannelKind, DocId, PeerIdentity, ProtocolMessage, Transmission,
};
use std::sync::Arc;

/// Context a middleware may declare it cannot run without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRequirement {
    /// The channel must be established (peer identity present)
    Peer,
    /// The message must name a document
    Document,
    /// The message must carry a transmission payload
    Transmission,
}

/// Decision of one middleware over one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the message through to the next check
    Allow,
    /// Drop the message
    Deny {
        /// Reason, for the debug log
        reason: String,
    },
}

impl Verdict {
    /// Shorthand for a deny with a reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }
}

/// A middleware failure; treated as a deny
#[derive(Debug, Clone, thiserror::Error)]
#[error("middleware failure: {0}")]
pub struct MiddlewareError(pub String);

/// What a check gets to look at
#[derive(Debug, Clone, Copy)]
pub struct MiddlewareContext<'a> {
    /// Source channel
    pub channel_id: ChannelId,
    /// Network or storage
    pub channel_kind: ChannelKind,
    /// Owning adapter's tag
    pub adapter_type: &'a AdapterType,
    /// Counterpart identity, once established
    pub peer: Option<&'a PeerIdentity>,
    /// Document the message names, when it names one
    pub doc_id: Option<&'a DocId>,
    /// Transmission payload, when the message carries one
    pub transmission: Option<&'a Transmission>,
    /// The message under scrutiny
    pub message: &'a ProtocolMessage,
}

/// One ordered, possibly async access check
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Context this check cannot run without; it is skipped when the
    /// context is unavailable (e.g. a transmission-requiring check on a
    /// directory request)
    fn requires(&self) -> &[ContextRequirement] {
        &[]
    }

    /// Inspect one message
    async fn check(&self, ctx: &MiddlewareContext<'_>) -> Result<Verdict, MiddlewareError>;
}

/// Cloned channel facts used to build per-message contexts
#[derive(Debug, Clone)]
pub(crate) struct ChannelFacts {
    pub channel_id: ChannelId,
    pub channel_kind: ChannelKind,
    pub adapter_type: AdapterType,
    pub peer: Option<PeerIdentity>,
}

/// The ordered pipeline
pub(crate) struct MiddlewarePipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Gate one inbound message; returns what survives, if anything
    pub async fn filter_inbound(
        &self,
        facts: &ChannelFacts,
        message: ProtocolMessage,
    ) -> Option<ProtocolMessage> {
        if self.stages.is_empty() {
            return Some(message);
        }
        let mut parts = Vec::new();
        message.flatten_into(&mut parts);
        let mut kept = Vec::new();
        for part in parts {
            if self.admit(facts, &part).await {
                kept.push(part);
            }
        }
        ProtocolMessage::from_parts(kept)
    }

    async fn admit(&self, facts: &ChannelFacts, message: &ProtocolMessage) -> bool {
        for stage in &self.stages {
            let ctx = MiddlewareContext {
                channel_id: facts.channel_id,
                channel_kind: facts.channel_kind,
                adapter_type: &facts.adapter_type,
                peer: facts.peer.as_ref(),
                doc_id: message.doc_id(),
                transmission: message.transmission(),
                message,
            };
            let unavailable = stage.requires().iter().any(|req| match req {
                ContextRequirement::Peer => ctx.peer.is_none(),
                ContextRequirement::Document => ctx.doc_id.is_none(),
                ContextRequirement::Transmission => ctx.transmission.is_none(),
            });
            if unavailable {
                tracing::trace!(
                    target: "folio::sync",
                    middleware = stage.name(),
                    kind = message.kind(),
                    "skipping middleware; required context unavailable"
                );
                continue;
            }
            match stage.check(&ctx).await {
                Ok(Verdict::Allow) => {}
                Ok(Verdict::Deny { reason }) => {
                    tracing::warn!(
                        target: "folio::sync",
                        middleware = stage.name(),
                        channel = %facts.channel_id,
                        kind = message.kind(),
                        reason = %reason,
                        "middleware denied message"
                    );
                    return false;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "folio::sync",
                        middleware = stage.name(),
                        channel = %facts.channel_id,
                        kind = message.kind(),
                        error = %e,
                        "middleware failed; denying message"
                    );
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{DocId, PeerId, VersionVector};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DenyDoc {
        doc: DocId,
    }

    #[async_trait]
    impl Middleware for DenyDoc {
        fn name(&self) -> &str {
            "deny-doc"
        }
        fn requires(&self) -> &[ContextRequirement] {
            &[ContextRequirement::Document]
        }
        async fn check(&self, ctx: &MiddlewareContext<'_>) -> Result<Verdict, MiddlewareError> {
            if ctx.doc_id == Some(&self.doc) {
                Ok(Verdict::deny("blocked document"))
            } else {
                Ok(Verdict::Allow)
            }
        }
    }

    struct Exploding;

    #[async_trait]
    impl Middleware for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }
        async fn check(&self, _ctx: &MiddlewareContext<'_>) -> Result<Verdict, MiddlewareError> {
            Err(MiddlewareError("boom".to_string()))
        }
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        async fn check(&self, _ctx: &MiddlewareContext<'_>) -> Result<Verdict, MiddlewareError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Verdict::Allow)
        }
    }

    fn facts() -> ChannelFacts {
        ChannelFacts {
            channel_id: ChannelId(1),
            channel_kind: ChannelKind::Network,
            adapter_type: "test".into(),
            peer: Some(PeerIdentity::user(PeerId::from("p"), None)),
        }
    }

    fn sync_request(doc: &str) -> ProtocolMessage {
        ProtocolMessage::SyncRequest {
            doc_id: DocId::from(doc),
            requester_version: VersionVector::new(),
            bidirectional: false,
        }
    }

    #[tokio::test]
    async fn empty_pipeline_passes_everything() {
        let pipeline = MiddlewarePipeline::new(vec![]);
        let message = sync_request("d");
        assert_eq!(
            pipeline.filter_inbound(&facts(), message.clone()).await,
            Some(message)
        );
    }

    #[tokio::test]
    async fn deny_drops_the_message() {
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(DenyDoc {
            doc: DocId::from("blocked"),
        })]);
        assert_eq!(
            pipeline.filter_inbound(&facts(), sync_request("blocked")).await,
            None
        );
        assert!(pipeline
            .filter_inbound(&facts(), sync_request("open"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn requirements_skip_inapplicable_checks() {
        // a document-requiring check cannot block a directory request
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(DenyDoc {
            doc: DocId::from("blocked"),
        })]);
        let message = ProtocolMessage::DirectoryRequest { doc_ids: None };
        assert_eq!(
            pipeline.filter_inbound(&facts(), message.clone()).await,
            Some(message)
        );
    }

    #[tokio::test]
    async fn errors_fail_closed() {
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(Exploding)]);
        assert_eq!(
            pipeline.filter_inbound(&facts(), sync_request("d")).await,
            None
        );
    }

    #[tokio::test]
    async fn first_deny_short_circuits_later_stages() {
        let counter = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let pipeline = MiddlewarePipeline::new(vec![
            Arc::new(DenyDoc {
                doc: DocId::from("blocked"),
            }),
            counter.clone(),
        ]);
        pipeline
            .filter_inbound(&facts(), sync_request("blocked"))
            .await;
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batches_are_filtered_per_inner_message() {
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(DenyDoc {
            doc: DocId::from("blocked"),
        })]);
        let batch = ProtocolMessage::Batch {
            messages: vec![
                sync_request("open"),
                sync_request("blocked"),
                sync_request("also-open"),
            ],
        };
        match pipeline.filter_inbound(&facts(), batch).await {
            Some(ProtocolMessage::Batch { messages }) => {
                assert_eq!(messages.len(), 2);
            }
            other => panic!("expected smaller batch, got {other:?}"),
        }

        // a single survivor comes back unwrapped
        let batch = ProtocolMessage::Batch {
            messages: vec![sync_request("open"), sync_request("blocked")],
        };
        assert_eq!(
            pipeline.filter_inbound(&facts(), batch).await,
            Some(sync_request("open"))
        );
    }
}
