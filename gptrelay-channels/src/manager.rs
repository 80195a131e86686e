//! Channel manager

use crate::base::{ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
use crate::telegram::TelegramHandler;
use gptrelay_core::bus::{MessageBus, OutboundMessage};
use gptrelay_core::config::Config;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Channel manager that coordinates all channel handlers
pub struct ChannelManager {
    bus: MessageBus,
    handlers: RwLock<HashMap<String, ChannelHandlerPtr>>,
}

impl ChannelManager {
    /// Create a manager whose channels publish into `bus`
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Initialize channels based on configuration
    pub async fn initialize(&self, config: &Config) -> Result<()> {
        if config.telegram.bot_token.is_empty() {
            tracing::warn!("Telegram bot token not configured");
            return Err(ChannelError::NotConfigured("telegram".to_string()));
        }
        self.register(TelegramHandler::new(&config.telegram)).await;
        tracing::info!("Telegram channel initialized");
        Ok(())
    }

    /// Register a handler under its own name
    pub async fn register<H: ChannelHandler + 'static>(&self, mut handler: H) {
        handler.set_bus(self.bus.clone());
        let name = handler.name().to_string();
        let handler: ChannelHandlerPtr = Arc::new(RwLock::new(handler));
        self.handlers.write().await.insert(name, handler);
    }

    /// Start all channel handlers; fails if any of them fails
    pub async fn start_all(&self) -> Result<()> {
        let handlers = self.handlers.read().await;

        for (name, handler) in handlers.iter() {
            tracing::info!("Starting {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.start().await {
                tracing::error!("Failed to start {} channel: {}", name, e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stop all channel handlers
    pub async fn stop_all(&self) -> Result<()> {
        let handlers = self.handlers.read().await;

        for (name, handler) in handlers.iter() {
            tracing::info!("Stopping {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.stop().await {
                tracing::error!("Failed to stop {} channel: {}", name, e);
            }
        }

        Ok(())
    }

    /// Send a message through the channel it names
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .await
            .get(&message.channel)
            .cloned()
            .ok_or_else(|| {
                ChannelError::NotConfigured(format!("Channel {} not found", message.channel))
            })?;

        let handler = handler.read().await;
        handler.send(message).await
    }

    /// Deliver outbound bus messages until the bus closes
    pub async fn dispatch_outbound(&self) -> Result<()> {
        let mut outbound = self
            .bus
            .take_outbound_receiver()
            .await
            .ok_or_else(|| ChannelError::Error("outbound receiver already taken".to_string()))?;

        while let Some(message) = outbound.recv().await {
            let channel = message.channel.clone();
            let chat_id = message.chat_id.clone();
            if let Err(e) = self.send(message).await {
                tracing::error!("Failed to deliver reply to {}:{}: {}", channel, chat_id, e);
            }
        }

        Ok(())
    }

    /// Check if a channel is running
    pub async fn is_channel_running(&self, name: &str) -> bool {
        let handler = self.handlers.read().await.get(name).cloned();
        match handler {
            Some(handler) => handler.read().await.is_running(),
            None => false,
        }
    }

    /// Get list of registered channels
    pub async fn list_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
