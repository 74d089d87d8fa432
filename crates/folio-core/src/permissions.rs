//! Synchronous permission hooks
//!
//! Three predicates, consulted inside the update core for every decision
//! that reveals or streams document state. They are deliberately
//! synchronous and side-effect free; anything that needs I/O (external
//! auth, rate limits) belongs in the middleware pipeline instead.
//!
//! The context exposes the channel kind so policies can keep storage
//! channels allowed while restricting network visibility; a storage
//! backend that cannot receive updates cannot persist them.

use crate::identifiers::{AdapterType, ChannelId, ChannelKind, DocId, PeerId};

/// Everything a policy gets to look at
#[derive(Debug, Clone, Copy)]
pub struct PermissionContext<'a> {
    /// Channel the decision concerns
    pub channel_id: ChannelId,
    /// Network or storage
    pub channel_kind: ChannelKind,
    /// Owning adapter's tag
    pub adapter_type: &'a AdapterType,
    /// Counterpart peer, once established
    pub peer_id: Option<&'a PeerId>,
    /// Counterpart's advertised name, if any
    pub peer_name: Option<&'a str>,
    /// Document the decision concerns
    pub doc_id: &'a DocId,
}

/// Policy hooks; every method defaults to allow
pub trait PermissionPolicy: Send + Sync {
    /// May this channel see the document in a directory response?
    fn may_list(&self, _ctx: &PermissionContext<'_>) -> bool {
        true
    }

    /// May this channel receive an unsolicited new-doc announcement?
    fn may_reveal(&self, _ctx: &PermissionContext<'_>) -> bool {
        true
    }

    /// May this channel be forwarded local changes it subscribed to?
    fn may_receive_update(&self, _ctx: &PermissionContext<'_>) -> bool {
        true
    }
}

/// The default policy: everything allowed
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPolicy for AllowAll {}

type Hook = Box<dyn Fn(&PermissionContext<'_>) -> bool + Send + Sync>;

/// Closure-based policy for configuration without a dedicated type
///
/// Unset hooks allow. Storage channels can be exempted inside a hook by
/// checking `ctx.channel_kind`.
#[derive(Default)]
pub struct FnPolicy {
    may_list: Option<Hook>,
    may_reveal: Option<Hook>,
    may_receive_update: Option<Hook>,
}

impl FnPolicy {
    /// Start from all-allow
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a `may_list` hook
    pub fn with_may_list(
        mut self,
        hook: impl Fn(&PermissionContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.may_list = Some(Box::new(hook));
        self
    }

    /// Install a `may_reveal` hook
    pub fn with_may_reveal(
        mut self,
        hook: impl Fn(&PermissionContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.may_reveal = Some(Box::new(hook));
        self
    }

    /// Install a `may_receive_update` hook
    pub fn with_may_receive_update(
        mut self,
        hook: impl Fn(&PermissionContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.may_receive_update = Some(Box::new(hook));
        self
    }
}

impl PermissionPolicy for FnPolicy {
    fn may_list(&self, ctx: &PermissionContext<'_>) -> bool {
        self.may_list.as_ref().map_or(true, |hook| hook(ctx))
    }

    fn may_reveal(&self, ctx: &PermissionContext<'_>) -> bool {
        self.may_reveal.as_ref().map_or(true, |hook| hook(ctx))
    }

    fn may_receive_update(&self, ctx: &PermissionContext<'_>) -> bool {
        self.may_receive_update
            .as_ref()
            .map_or(true, |hook| hook(ctx))
    }
}

impl std::fmt::Debug for FnPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPolicy")
            .field("may_list", &self.may_list.is_some())
            .field("may_reveal", &self.may_reveal.is_some())
            .field("may_receive_update", &self.may_receive_update.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(kind: ChannelKind, adapter: &'a AdapterType, doc: &'a DocId) -> PermissionContext<'a> {
        PermissionContext {
            channel_id: ChannelId(1),
            channel_kind: kind,
            adapter_type: adapter,
            peer_id: None,
            peer_name: None,
            doc_id: doc,
        }
    }

    #[test]
    fn defaults_allow_everything() {
        let adapter = AdapterType::from("test");
        let doc = DocId::from("d");
        let context = ctx(ChannelKind::Network, &adapter, &doc);
        let policy = AllowAll;
        assert!(policy.may_list(&context));
        assert!(policy.may_reveal(&context));
        assert!(policy.may_receive_update(&context));
    }

    #[test]
    fn storage_stays_allowed_under_a_network_deny() {
        let policy = FnPolicy::new()
            .with_may_reveal(|ctx| ctx.channel_kind.is_storage())
            .with_may_receive_update(|ctx| ctx.channel_kind.is_storage());

        let adapter = AdapterType::from("test");
        let doc = DocId::from("d");
        let network = ctx(ChannelKind::Network, &adapter, &doc);
        let storage = ctx(ChannelKind::Storage, &adapter, &doc);

        assert!(!policy.may_reveal(&network));
        assert!(!policy.may_receive_update(&network));
        assert!(policy.may_reveal(&storage));
        assert!(policy.may_receive_update(&storage));
        // unset hook falls back to allow
        assert!(policy.may_list(&network));
    }
}
