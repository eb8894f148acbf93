pub mod events;
pub mod queue;

pub use events::{ChatType, InboundMessage, OutboundMessage};
pub use queue::MessageBus;
