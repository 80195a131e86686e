//! Configuration schema definitions

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Root configuration for gptrelay
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Telegram bot configuration
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Conversational backend configuration
    #[serde(default)]
    pub chatgpt: ChatGptConfig,
    /// Conversation flow settings
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Session persistence
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Error reporting
    #[serde(default)]
    pub reporter: ReporterConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Telegram bot configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot API token issued by BotFather
    #[serde(default)]
    pub bot_token: String,
    /// Allowed user ids or usernames (empty = allow everyone)
    #[serde(default)]
    pub allow_from: Vec<String>,
}

/// ChatGPT web backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatGptConfig {
    /// Access token of the ChatGPT web session
    #[serde(default)]
    pub access_token: String,
    /// Base URL of the conversation backend
    #[serde(default = "default_chatgpt_base_url")]
    pub base_url: String,
    /// Model slug sent with each prompt
    #[serde(default = "default_chatgpt_model")]
    pub model: String,
    /// Optional HTTP/SOCKS proxy
    #[serde(default)]
    pub proxy: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Number of conversations fetched by /list
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_chatgpt_base_url() -> String {
    "https://chat.openai.com/backend-api".to_string()
}

fn default_chatgpt_model() -> String {
    "text-davinci-002-render-sha".to_string()
}

fn default_request_timeout() -> u64 {
    360
}

fn default_page_size() -> u32 {
    20
}

impl Default for ChatGptConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: default_chatgpt_base_url(),
            model: default_chatgpt_model(),
            proxy: None,
            request_timeout_secs: default_request_timeout(),
            page_size: default_page_size(),
        }
    }
}

/// Conversation flow settings and reply texts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Inactivity after which an active conversation ends
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_farewell")]
    pub farewell: String,
    #[serde(default = "default_timeout_notice")]
    pub timeout_notice: String,
    /// Sent when a message arrives outside a conversation
    #[serde(default = "default_idle_hint")]
    pub idle_hint: String,
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_greeting() -> String {
    "I'm a chatgpt bot, please talk to me!".to_string()
}

fn default_farewell() -> String {
    "Bye! Send /begin to start a new conversation.".to_string()
}

fn default_timeout_notice() -> String {
    "Conversation ended after inactivity. Send /begin to start again.".to_string()
}

fn default_idle_hint() -> String {
    "No active conversation. Send /begin to start one.".to_string()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            greeting: default_greeting(),
            farewell: default_farewell(),
            timeout_notice: default_timeout_notice(),
            idle_hint: default_idle_hint(),
        }
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Path of the persisted session file
    #[serde(default = "default_sessions_path")]
    pub path: String,
}

fn default_sessions_path() -> String {
    "~/.gptrelay/sessions.json".to_string()
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            path: default_sessions_path(),
        }
    }
}

/// Unhandled error reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Chat that receives diagnostic reports (disabled when unset).
    /// Accepts a JSON string or integer.
    #[serde(default, deserialize_with = "deserialize_chat_id")]
    pub developer_chat_id: Option<String>,
    /// Send a generic failure notice to the originating chat
    #[serde(default = "default_true")]
    pub notify_user: bool,
    #[serde(default = "default_failure_notice")]
    pub failure_notice: String,
}

fn deserialize_chat_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ChatId {
        Text(String),
        Number(i64),
    }

    Ok(Option::<ChatId>::deserialize(deserializer)?.map(|id| match id {
        ChatId::Text(text) => text,
        ChatId::Number(number) => number.to_string(),
    }))
}

fn default_true() -> bool {
    true
}

fn default_failure_notice() -> String {
    "Sorry, something went wrong while handling your message.".to_string()
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            developer_chat_id: None,
            notify_user: default_true(),
            failure_notice: default_failure_notice(),
        }
    }
}
