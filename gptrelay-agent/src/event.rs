//! Events processed by the conversation workers

use gptrelay_core::bus::InboundMessage;
use serde::Serialize;

/// An idle timer that fired for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdleTimeout {
    pub session_key: String,
    pub channel: String,
    /// Chat the timeout notice goes to
    pub chat_id: String,
    /// Arm generation; a newer arm makes this event stale
    pub generation: u64,
}

/// Unit of work for a session worker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Inbound(InboundMessage),
    IdleTimeout(IdleTimeout),
}

impl Event {
    pub fn session_key(&self) -> String {
        match self {
            Event::Inbound(msg) => msg.session_key(),
            Event::IdleTimeout(timeout) => timeout.session_key.clone(),
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Event::Inbound(msg) => &msg.channel,
            Event::IdleTimeout(timeout) => &timeout.channel,
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Event::Inbound(msg) => &msg.chat_id,
            Event::IdleTimeout(timeout) => &timeout.chat_id,
        }
    }
}

impl From<InboundMessage> for Event {
    fn from(msg: InboundMessage) -> Self {
        Event::Inbound(msg)
    }
}
