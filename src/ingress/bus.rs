use super::types::InboundEvent;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;

/// Event bus between ingestion (polling or webhook) and the dispatcher.
pub struct EventBus {
    sender: Sender<InboundEvent>,
    receiver: Arc<Mutex<Receiver<InboundEvent>>>,
}

impl EventBus {
    /// Create a new bus with a channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Get a sender handle for ingestion tasks.
    pub fn sender(&self) -> Sender<InboundEvent> {
        self.sender.clone()
    }

    /// Get the receiver handle. The dispatcher is the only consumer, but the
    /// handle is wrapped in Arc<Mutex> so it can be passed across tasks.
    pub fn receiver(&self) -> Arc<Mutex<Receiver<InboundEvent>>> {
        self.receiver.clone()
    }

    /// Send an event to the bus.
    pub async fn push(&self, event: InboundEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to push to EventBus: {}", e))
    }
}
