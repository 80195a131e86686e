//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.conversation.idle_timeout_secs == 0 {
        errors.push("conversation.idle_timeout_secs must be > 0".to_string());
    }
    if config.chatgpt.base_url.trim().is_empty() {
        errors.push("chatgpt.base_url must not be empty".to_string());
    }
    if config.chatgpt.request_timeout_secs == 0 {
        errors.push("chatgpt.request_timeout_secs must be > 0".to_string());
    }
    if config.chatgpt.page_size == 0 {
        errors.push("chatgpt.page_size must be > 0".to_string());
    }
    if config.sessions.path.trim().is_empty() {
        errors.push("sessions.path must not be empty".to_string());
    }
    if let Some(chat_id) = &config.reporter.developer_chat_id {
        if chat_id.trim().parse::<i64>().is_err() {
            errors.push("reporter.developer_chat_id must be a numeric chat id".to_string());
        }
    }
    if !matches!(
        config.logging.format.to_ascii_lowercase().as_str(),
        "text" | "json"
    ) {
        errors.push("logging.format must be one of: text, json".to_string());
    }

    finish(errors)
}

/// Additional checks for running the bot gateway, which needs both credentials.
pub fn validate_gateway(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.telegram.bot_token.trim().is_empty() {
        errors.push("telegram.bot_token is required to run the gateway".to_string());
    }
    if config.chatgpt.access_token.trim().is_empty() {
        errors.push("chatgpt.access_token is required to run the gateway".to_string());
    }

    finish(errors)
}

fn finish(errors: Vec<String>) -> crate::Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
