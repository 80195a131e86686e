//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key selecting how a channel renders an outbound message
pub const PARSE_MODE_KEY: &str = "parse_mode";
/// Metadata key marking a control message that carries no content
pub const DONE_KEY: &str = "done";

/// Message received from a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g., "telegram")
    pub channel: String,
    /// User identifier
    pub sender_id: String,
    /// Chat identifier replies are sent to
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Session key of the sending user; sessions follow the user across chats
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.sender_id)
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a plain-text reply to the chat this message came from
    pub fn reply(&self, content: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(self.channel.clone(), self.chat_id.clone(), content)
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Target chat identifier
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a new outbound message
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Mark the content as pre-rendered HTML
    pub fn html(mut self) -> Self {
        self.metadata
            .insert(PARSE_MODE_KEY.to_string(), serde_json::Value::from("html"));
        self
    }

    /// Signal that handling for `chat_id` finished without a reply.
    /// Channels use it to clear pending indicators and never deliver it.
    pub fn done(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let mut msg = Self::new(channel, chat_id, String::new());
        msg.metadata
            .insert(DONE_KEY.to_string(), serde_json::Value::Bool(true));
        msg
    }

    pub fn is_done(&self) -> bool {
        self.metadata.get(DONE_KEY).and_then(|v| v.as_bool()) == Some(true)
    }

    /// Whether the content is pre-rendered HTML
    pub fn is_html(&self) -> bool {
        self.metadata.get(PARSE_MODE_KEY).and_then(|v| v.as_str()) == Some("html")
    }
}
