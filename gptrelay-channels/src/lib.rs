//! Chat platform integrations for gptrelay
//!
//! Channels publish user text to the message bus and deliver replies back.

pub mod base;
pub mod format;
pub mod manager;
pub mod telegram;

pub use base::{AllowList, ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
pub use manager::ChannelManager;
pub use telegram::TelegramHandler;
