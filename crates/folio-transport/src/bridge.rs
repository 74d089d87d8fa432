//! In-process bridge adapter
//!
//! A bridge pair is two adapters joined by crossed byte queues. Each side
//! registers exactly one network channel when started. Messages go
//! through the wire codec, so the bridge exercises the same encode and
//! decode path a socket transport would, and delivery is always
//! asynchronous: a reply produced while handling a send lands in the
//! queue, never recurses into the sender.

use crate::adapter::{Adapter, AdapterHost, ChannelSpec};
use crate::channel::{ChannelHandle, ChannelSender, TransportError};
use async_trait::async_trait;
use folio_core::protocol::{decode_message, encode_message};
use folio_core::{AdapterType, ChannelKind, ProtocolMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Create two linked bridge adapters
///
/// Bytes sent by one side arrive at the other. Each adapter is
/// single-use: once stopped, the link is gone for both sides.
pub fn bridge_pair() -> (BridgeAdapter, BridgeAdapter) {
    let (a_to_b, from_a) = mpsc::unbounded_channel();
    let (b_to_a, from_b) = mpsc::unbounded_channel();
    (
        BridgeAdapter::new(a_to_b, from_b),
        BridgeAdapter::new(b_to_a, from_a),
    )
}

/// One side of an in-process byte link
pub struct BridgeAdapter {
    adapter_type: AdapterType,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    handle: ChannelHandle,
    pump: JoinHandle<()>,
}

struct BridgeSender {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSender for BridgeSender {
    fn send(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        let bytes = encode_message(&message).map_err(|e| TransportError::Send(e.to_string()))?;
        self.outbound
            .send(bytes)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn stop(&self) {}
}

impl BridgeAdapter {
    fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            adapter_type: AdapterType::from("bridge"),
            outbound,
            inbound: Mutex::new(Some(inbound)),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Adapter for BridgeAdapter {
    fn adapter_type(&self) -> AdapterType {
        self.adapter_type.clone()
    }

    async fn start(&self, host: Arc<dyn AdapterHost>) -> Result<(), TransportError> {
        let Some(mut inbound) = self.inbound.lock().take() else {
            return Err(TransportError::Lifecycle(
                "bridge adapter already started".to_string(),
            ));
        };

        let handle = host.add_channel(ChannelSpec {
            kind: ChannelKind::Network,
            adapter_type: self.adapter_type.clone(),
            sender: Arc::new(BridgeSender {
                outbound: self.outbound.clone(),
            }),
        });

        let pump_handle = handle.clone();
        let pump = tokio::spawn(async move {
            while let Some(bytes) = inbound.recv().await {
                match decode_message(&bytes) {
                    Ok(message) => pump_handle.receive(message),
                    Err(e) => {
                        tracing::warn!(
                            target: "folio::transport",
                            channel = %pump_handle.channel_id(),
                            error = %e,
                            "dropping undecodable bridge frame"
                        );
                    }
                }
            }
            pump_handle.close();
        });

        *self.running.lock() = Some(Running { handle, pump });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(running) = self.running.lock().take() {
            running.pump.abort();
            running.handle.close();
        }
        Ok(())
    }
}

impl std::fmt::Debug for BridgeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeAdapter")
            .field("adapter_type", &self.adapter_type)
            .field("started", &self.running.lock().is_some())
            .finish()
    }
}
