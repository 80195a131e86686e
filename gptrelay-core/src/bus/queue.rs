//! Async message queue implementation

use super::events::{InboundMessage, OutboundMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Async message bus that decouples chat channels from the conversation core
///
/// Channels push messages to the inbound queue; the conversation loop
/// consumes them and pushes replies to the outbound queue.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>>,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(Some(inbound_rx))),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(Some(outbound_rx))),
        }
    }

    /// Take the inbound receiver (can only be called once)
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.lock().await.take()
    }

    /// Take the outbound receiver (can only be called once)
    pub async fn take_outbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.outbound_rx.lock().await.take()
    }

    /// Publish a message from a channel to the conversation loop
    pub fn publish_inbound(&self, msg: InboundMessage) -> crate::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Inbound channel closed".to_string()))
    }

    /// Publish a reply from the conversation loop to channels
    pub fn publish_outbound(&self, msg: OutboundMessage) -> crate::Result<()> {
        self.outbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Outbound channel closed".to_string()))
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
