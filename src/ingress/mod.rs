pub mod bridge;
pub mod bus;
pub mod types;

pub use bridge::{BridgeApi, BridgeClient};
pub use bus::EventBus;
pub use types::{BridgeEvent, BridgeMessage, InboundEvent, MediaDescriptor};
