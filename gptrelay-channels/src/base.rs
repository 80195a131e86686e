//! Base trait for channel handlers

use async_trait::async_trait;
use gptrelay_core::bus::{MessageBus, OutboundMessage};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for channel handlers
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &str;

    /// Check if the channel is running
    fn is_running(&self) -> bool;

    /// Start receiving messages
    async fn start(&mut self) -> Result<()>;

    /// Stop the channel handler
    async fn stop(&mut self) -> Result<()>;

    /// Send a message
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Attach the bus inbound messages are published to
    fn set_bus(&mut self, bus: MessageBus);

    /// Check if a sender is allowed
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel error: {0}")]
    Error(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Channel not running: {0}")]
    NotRunning(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Send error: {0}")]
    SendError(String),

    #[error("Access denied for sender: {0}")]
    AccessDenied(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Shared channel handler type
pub type ChannelHandlerPtr = Arc<RwLock<dyn ChannelHandler>>;

/// Sender allow list; empty allows everyone
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    pub fn new(entries: Vec<String>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.trim().trim_start_matches('@').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Check a sender id; compound ids like `12345|username` match on any part
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }

        sender_id
            .split('|')
            .filter(|part| !part.is_empty())
            .any(|part| self.entries.iter().any(|e| e == part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_empty() {
        let allow = AllowList::new(vec![]);
        assert!(allow.is_allowed("user1"));
        assert!(allow.is_allowed("12345"));
    }

    #[test]
    fn test_allow_list_with_entries() {
        let allow = AllowList::new(vec!["user1".to_string(), "12345".to_string()]);
        assert!(allow.is_allowed("user1"));
        assert!(allow.is_allowed("12345"));
        assert!(!allow.is_allowed("user2"));
        assert!(!allow.is_allowed("99999"));
    }

    #[test]
    fn test_allow_list_compound_id() {
        let allow = AllowList::new(vec!["@user1".to_string(), "12345".to_string()]);
        assert!(allow.is_allowed("12345|someone"));
        assert!(allow.is_allowed("99999|user1"));
        assert!(!allow.is_allowed("99999|unknown"));
        assert!(!allow.is_allowed("|"));
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::NotConfigured("telegram".to_string());
        assert_eq!(err.to_string(), "Channel not configured: telegram");

        let err = ChannelError::AccessDenied("user1".to_string());
        assert_eq!(err.to_string(), "Access denied for sender: user1");
    }
}
