use crate::ingress::{BridgeApi, EventBus, InboundEvent};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Long-polls the bridge's event stream and feeds the bus.
pub struct BridgePollingService {
    client: Arc<dyn BridgeApi>,
    bus: Arc<EventBus>,
    poll_timeout: u64,
}

impl BridgePollingService {
    pub fn new(client: Arc<dyn BridgeApi>, bus: Arc<EventBus>, poll_timeout: u64) -> Self {
        Self {
            client,
            bus,
            poll_timeout,
        }
    }

    pub async fn run(&self) {
        info!("Starting bridge long polling service");

        let mut offset: Option<i64> = None;
        let mut backoff_secs = 1;

        loop {
            match self.client.get_events(offset, self.poll_timeout).await {
                Ok(events) => {
                    // Reset backoff on success
                    backoff_secs = 1;

                    for event in events {
                        // Acknowledge up to and including this event
                        offset = Some(event.event_id + 1);

                        if let Some(message) = event.message {
                            let inbound = InboundEvent::from_bridge(message);
                            debug!(event = %inbound, "received bridge event");
                            if let Err(e) = self.bus.push(inbound).await {
                                // Receiver is gone; the engine is shutting down.
                                error!("Failed to push bridge event to bus: {}", e);
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Bridge polling error: {}. Retrying in {}s...",
                        e, backoff_secs
                    );
                    sleep(Duration::from_secs(backoff_secs)).await;
                    // Exponential backoff up to 60s
                    backoff_secs = (backoff_secs * 2).min(60);
                }
            }
        }
    }
}
