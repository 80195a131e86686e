//! Chat commands understood by the bot

/// Commands shown in the platform's command menu and in /help, without the
/// leading slash
pub const COMMAND_MENU: [(&str, &str); 5] = [
    ("begin", "Start a conversation"),
    ("end", "End the current conversation"),
    ("list", "List your conversations"),
    ("clear", "Clear all conversations"),
    ("help", "Show available commands"),
];
