//! # Folio Testkit - fixtures for multi-repo scenarios
//!
//! Helpers shared by the integration suites under `tests/`: bridged repo
//! pairs, a capture adapter that records every physical send, a
//! transmission-recording middleware, and small polling utilities.

use async_trait::async_trait;
use folio_core::{AdapterType, ChannelKind, PeerId, PeerIdentity, ProtocolMessage};
use folio_sync::{
    ContextRequirement, Middleware, MiddlewareContext, MiddlewareError, Repo, RepoConfig, Verdict,
};
use folio_transport::{
    bridge_pair, Adapter, AdapterHost, ChannelHandle, ChannelSender, ChannelSpec, TransportError,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Install a test subscriber once; respects `RUST_LOG`
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A short heartbeat so presence recovery is visible inside test budgets
pub const TEST_HEARTBEAT: Duration = Duration::from_millis(200);

/// Two repos joined by an in-process bridge
pub async fn bridged_repos(a: RepoConfig, b: RepoConfig) -> (Repo, Repo) {
    let (left, right) = bridge_pair();
    let a = Repo::new(a.with_adapter(Arc::new(left)))
        .await
        .unwrap_or_else(|e| panic!("repo a failed to start: {e}"));
    let b = Repo::new(b.with_adapter(Arc::new(right)))
        .await
        .unwrap_or_else(|e| panic!("repo b failed to start: {e}"));
    (a, b)
}

/// Poll a condition until it holds or the budget runs out
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let budget = Duration::from_secs(5);
    let started = std::time::Instant::now();
    loop {
        if condition() {
            return;
        }
        if started.elapsed() > budget {
            panic!("condition never held: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give in-flight dispatches a moment to drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Adapter that records every physical send and lets tests inject
/// inbound messages as if a remote peer sent them
pub struct CaptureAdapter {
    adapter_type: AdapterType,
    kind: ChannelKind,
    identity: PeerIdentity,
    sent: Arc<Mutex<Vec<ProtocolMessage>>>,
    handle: Mutex<Option<ChannelHandle>>,
}

struct CaptureSender {
    sent: Arc<Mutex<Vec<ProtocolMessage>>>,
}

impl ChannelSender for CaptureSender {
    fn send(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message);
        Ok(())
    }
    fn stop(&self) {}
}

impl CaptureAdapter {
    /// A network-kind capture adapter posing as peer `peer`
    pub fn new(peer: &str) -> Arc<Self> {
        Arc::new(Self {
            adapter_type: AdapterType::from("capture"),
            kind: ChannelKind::Network,
            identity: PeerIdentity::user(PeerId::from(peer), None),
            sent: Arc::new(Mutex::new(Vec::new())),
            handle: Mutex::new(None),
        })
    }

    /// Snapshot of every physical send so far
    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().clone()
    }

    /// Forget recorded sends
    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Deliver one message as if the fake peer sent it
    pub fn inject(&self, message: ProtocolMessage) {
        self.handle
            .lock()
            .as_ref()
            .unwrap_or_else(|| panic!("capture adapter not started"))
            .receive(message);
    }

    /// Complete the handshake as the fake peer
    pub async fn establish(&self) {
        self.inject(ProtocolMessage::EstablishRequest {
            identity: self.identity.clone(),
        });
        let sent = self.sent.clone();
        eventually("capture channel established", move || {
            sent.lock().iter().any(|m| {
                message_contains(m, &|inner| {
                    matches!(inner, ProtocolMessage::EstablishResponse { .. })
                })
            })
        })
        .await;
    }
}

#[async_trait]
impl Adapter for CaptureAdapter {
    fn adapter_type(&self) -> AdapterType {
        self.adapter_type.clone()
    }

    async fn start(&self, host: Arc<dyn AdapterHost>) -> Result<(), TransportError> {
        let handle = host.add_channel(ChannelSpec {
            kind: self.kind,
            adapter_type: self.adapter_type.clone(),
            sender: Arc::new(CaptureSender {
                sent: self.sent.clone(),
            }),
        });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.handle.lock().take() {
            handle.close();
        }
        Ok(())
    }
}

/// One observed inbound transmission
#[derive(Debug, Clone)]
pub struct SeenTransmission {
    /// `snapshot`, `update`, `up-to-date`, or `unavailable`
    pub kind: &'static str,
    /// Payload size, when the transmission carried data
    pub data_len: Option<usize>,
}

/// Middleware that records every inbound transmission and allows all
pub struct TransmissionRecorder {
    seen: Mutex<Vec<SeenTransmission>>,
}

impl TransmissionRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Snapshot of recorded transmissions
    pub fn seen(&self) -> Vec<SeenTransmission> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Middleware for TransmissionRecorder {
    fn name(&self) -> &str {
        "transmission-recorder"
    }

    fn requires(&self) -> &[ContextRequirement] {
        &[ContextRequirement::Transmission]
    }

    async fn check(&self, ctx: &MiddlewareContext<'_>) -> Result<Verdict, MiddlewareError> {
        if let Some(transmission) = ctx.transmission {
            self.seen.lock().push(SeenTransmission {
                kind: transmission.kind(),
                data_len: transmission.data().map(<[u8]>::len),
            });
        }
        Ok(Verdict::Allow)
    }
}

/// True when the message, or any message inside a batch, matches
pub fn message_contains(
    message: &ProtocolMessage,
    predicate: &dyn Fn(&ProtocolMessage) -> bool,
) -> bool {
    match message {
        ProtocolMessage::Batch { messages } => {
            messages.iter().any(|m| message_contains(m, predicate))
        }
        other => predicate(other),
    }
}

/// Assert helper: find sync responses for a doc inside one message
pub fn sync_response_kinds(message: &ProtocolMessage) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    let mut stack = vec![message];
    while let Some(current) = stack.pop() {
        match current {
            ProtocolMessage::Batch { messages } => stack.extend(messages.iter()),
            ProtocolMessage::SyncResponse { transmission, .. } => kinds.push(transmission.kind()),
            _ => {}
        }
    }
    kinds
}
