//! Conversational backend integrations for gptrelay
//!
//! The [`ConversationBackend`] trait is the seam between the conversation
//! core and the AI service; [`ChatGptClient`] talks to the ChatGPT web API.

pub mod base;
pub mod chatgpt;

pub use base::{
    AskReply, AskStream, BackendError, BackendResult, ConversationBackend, ConversationSummary,
};
pub use chatgpt::ChatGptClient;
