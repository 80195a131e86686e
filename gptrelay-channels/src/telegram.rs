//! Telegram channel integration

use crate::base::{AllowList, ChannelError, ChannelHandler, Result};
use crate::format::{markdown_to_html, split_message, MAX_MESSAGE_CHARS};
use async_trait::async_trait;
use gptrelay_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use gptrelay_core::config::TelegramConfig;
use gptrelay_core::COMMAND_MENU;
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatAction, ParseMode, User};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const CHANNEL_NAME: &str = "telegram";

type TypingTasks = Arc<Mutex<HashMap<i64, JoinHandle<()>>>>;

/// Telegram channel handler (long polling)
pub struct TelegramHandler {
    token: String,
    allow: AllowList,
    bot: Option<Bot>,
    running: bool,
    bus: Option<MessageBus>,
    dispatcher_handle: Option<JoinHandle<()>>,
    typing_tasks: TypingTasks,
}

impl TelegramHandler {
    /// Create a new Telegram handler from config
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            token: config.bot_token.clone(),
            allow: AllowList::new(config.allow_from.clone()),
            bot: None,
            running: false,
            bus: None,
            dispatcher_handle: None,
            typing_tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn stop_typing(&self, chat_id: i64) {
        if let Some(handle) = self.typing_tasks.lock().await.remove(&chat_id) {
            handle.abort();
        }
    }

    /// Send one chunk as HTML, falling back to the raw text
    async fn send_chunk(bot: &Bot, chat_id: ChatId, html: String, plain: &str) -> Result<()> {
        match bot
            .send_message(chat_id, html)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("HTML parse failed, falling back to plain text: {}", e);
                bot.send_message(chat_id, plain)
                    .await
                    .map_err(|e2| ChannelError::ApiError(format!("Failed to send message: {}", e2)))?;
                Ok(())
            }
        }
    }
}

/// Sender id used for allow-list checks: `id` or `id|username`
fn allow_key(user: &User) -> String {
    match &user.username {
        Some(username) => format!("{}|{}", user.id.0, username),
        None => user.id.0.to_string(),
    }
}

/// Build the inbound message for a text sent by `user`
fn inbound_from(user: &User, chat_id: i64, message_id: i32, text: &str) -> InboundMessage {
    let mut msg = InboundMessage::new(CHANNEL_NAME, user.id.0.to_string(), chat_id.to_string(), text)
        .with_metadata("message_id", message_id)
        .with_metadata("first_name", user.first_name.clone())
        .with_metadata("is_group", chat_id < 0);
    if let Some(username) = &user.username {
        msg = msg.with_metadata("username", username.clone());
    }
    msg
}

fn spawn_typing(bot: Bot, chat_id: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let _ = bot.send_chat_action(ChatId(chat_id), ChatAction::Typing).await;
            tokio::time::sleep(tokio::time::Duration::from_secs(4)).await;
        }
    })
}

#[async_trait]
impl ChannelHandler for TelegramHandler {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<()> {
        if self.token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "Telegram bot token not configured".to_string(),
            ));
        }

        if self.running {
            return Ok(());
        }

        let bus = self
            .bus
            .clone()
            .ok_or_else(|| ChannelError::Error("Message bus not attached".to_string()))?;

        tracing::info!("Starting Telegram bot (polling mode)...");

        let bot = Bot::new(&self.token);

        let commands = COMMAND_MENU
            .iter()
            .map(|(name, description)| BotCommand::new(*name, *description))
            .collect::<Vec<_>>();
        if let Err(e) = bot.set_my_commands(commands).await {
            tracing::warn!("Failed to set bot commands: {}", e);
        }

        match bot.get_me().await {
            Ok(me) => {
                let username = me.username.clone().unwrap_or_else(|| "unknown".to_string());
                tracing::info!("Telegram bot @{} connected", username);
            }
            Err(e) => {
                return Err(ChannelError::ApiError(format!(
                    "Failed to get bot info: {}",
                    e
                )));
            }
        }

        self.bot = Some(bot.clone());
        self.running = true;

        let allow = self.allow.clone();
        let typing_tasks = self.typing_tasks.clone();

        let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
            let bus = bus.clone();
            let allow = allow.clone();
            let typing_tasks = typing_tasks.clone();

            async move {
                let Some(user) = msg.from.clone() else {
                    return Ok(());
                };
                let Some(text) = msg.text() else {
                    tracing::debug!("Dropping non-text message {} from {}", msg.id.0, user.id.0);
                    return Ok(());
                };

                let key = allow_key(&user);
                if !allow.is_allowed(&key) {
                    tracing::warn!(
                        "Access denied for sender {} on channel {}",
                        key,
                        CHANNEL_NAME
                    );
                    return Ok(());
                }

                let chat_id = msg.chat.id.0;
                if !text.trim().is_empty() && !text.trim_start().starts_with('/') {
                    let handle = spawn_typing(bot.clone(), chat_id);
                    if let Some(previous) = typing_tasks.lock().await.insert(chat_id, handle) {
                        previous.abort();
                    }
                }

                let inbound = inbound_from(&user, chat_id, msg.id.0, text);
                if let Err(e) = bus.publish_inbound(inbound) {
                    tracing::error!("Failed to publish inbound message: {}", e);
                }

                Ok::<(), teloxide::RequestError>(())
            }
        });

        let dispatcher_handle = tokio::spawn(async move {
            Dispatcher::builder(bot, handler).build().dispatch().await;
        });
        self.dispatcher_handle = Some(dispatcher_handle);

        tracing::info!("Telegram bot started successfully");

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!("Stopping Telegram bot...");

        for (_, handle) in self.typing_tasks.lock().await.drain() {
            handle.abort();
        }

        if let Some(handle) = self.dispatcher_handle.take() {
            handle.abort();
        }

        self.bot = None;
        self.running = false;

        tracing::info!("Telegram bot stopped");

        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if message.is_done() {
            if let Ok(chat_id) = message.chat_id.parse::<i64>() {
                self.stop_typing(chat_id).await;
            }
            return Ok(());
        }

        let bot = self
            .bot
            .as_ref()
            .ok_or_else(|| ChannelError::NotRunning("Telegram bot not running".to_string()))?;

        let chat_id: i64 = message
            .chat_id
            .parse()
            .map_err(|_| ChannelError::Error(format!("Invalid chat_id: {}", message.chat_id)))?;

        self.stop_typing(chat_id).await;

        if message.is_html() {
            return Self::send_chunk(bot, ChatId(chat_id), message.content.clone(), &message.content)
                .await;
        }

        for chunk in split_message(&message.content, MAX_MESSAGE_CHARS) {
            let html = markdown_to_html(&chunk);
            if html.chars().count() > MAX_MESSAGE_CHARS {
                bot.send_message(ChatId(chat_id), &chunk)
                    .await
                    .map_err(|e| ChannelError::ApiError(format!("Failed to send message: {}", e)))?;
                continue;
            }
            Self::send_chunk(bot, ChatId(chat_id), html, &chunk).await?;
        }

        Ok(())
    }

    fn set_bus(&mut self, bus: MessageBus) {
        self.bus = Some(bus);
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.allow.is_allowed(sender_id)
    }
}
