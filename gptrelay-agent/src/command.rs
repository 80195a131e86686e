//! Chat command parsing

use crate::machine::Trigger;
pub use gptrelay_core::COMMAND_MENU;

/// A parsed inbound text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Begin,
    End,
    List,
    Clear,
    Help,
    /// A slash command nobody handles
    Unknown(String),
    /// Plain chat text
    Text,
}

impl Command {
    /// Parse a message. Accepts `/cmd`, `/cmd@botname` and trailing arguments.
    pub fn parse(text: &str) -> Self {
        let Some(rest) = text.trim_start().strip_prefix('/') else {
            return Command::Text;
        };

        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word
            .split('@')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match name.as_str() {
            "begin" | "start" => Command::Begin,
            "end" => Command::End,
            "list" => Command::List,
            "clear" => Command::Clear,
            "help" => Command::Help,
            _ => Command::Unknown(name),
        }
    }

    /// The state machine trigger, if the command is handled at all
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Command::Begin => Some(Trigger::Begin),
            Command::End => Some(Trigger::End),
            Command::List => Some(Trigger::List),
            Command::Clear => Some(Trigger::Clear),
            Command::Help => Some(Trigger::Help),
            Command::Text => Some(Trigger::Message),
            Command::Unknown(_) => None,
        }
    }
}

/// Text of the /help reply
pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for (name, description) in COMMAND_MENU {
        text.push_str(&format!("/{} - {}\n", name, description));
    }
    text.push_str("\nWhile a conversation is active, every message is sent to ChatGPT.");
    text
}
