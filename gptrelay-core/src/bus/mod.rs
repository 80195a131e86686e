//! Message bus for decoupled communication
//!
//! The message bus provides a dual-queue system for inbound and outbound
//! messages, decoupling chat channels from the conversation core.

pub mod events;
pub mod queue;

pub use events::{InboundMessage, OutboundMessage, DONE_KEY, PARSE_MODE_KEY};
pub use queue::MessageBus;
