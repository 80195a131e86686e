//! Base trait for conversational backends

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for backend operations
///
/// The `Display` text is what users see in the chat, so transport errors
/// render as the bare underlying message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(e.to_string())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One item of an answer stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskReply {
    /// Answer text accumulated so far
    pub text: String,
    pub conversation_id: Option<String>,
    /// Id of the answer message, the parent of the next prompt
    pub parent_id: Option<String>,
}

impl AskReply {
    pub fn new(
        text: impl Into<String>,
        conversation_id: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            conversation_id: Some(conversation_id.into()),
            parent_id: Some(parent_id.into()),
        }
    }
}

/// Blocking stream of answer items; only the last one carries the full answer
pub struct AskStream {
    inner: Box<dyn Iterator<Item = BackendResult<AskReply>> + Send>,
}

impl AskStream {
    pub fn new<I>(items: I) -> Self
    where
        I: Iterator<Item = BackendResult<AskReply>> + Send + 'static,
    {
        Self {
            inner: Box::new(items),
        }
    }

    /// A stream over already-known replies
    pub fn from_replies(replies: Vec<AskReply>) -> Self {
        Self::new(replies.into_iter().map(Ok))
    }

    /// Drain the stream and keep the last reply.
    ///
    /// Any error item fails the whole answer; `None` means the backend
    /// produced nothing.
    pub fn last_reply(self) -> BackendResult<Option<AskReply>> {
        let mut last = None;
        for item in self {
            last = Some(item?);
        }
        Ok(last)
    }
}

impl Iterator for AskStream {
    type Item = BackendResult<AskReply>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl std::fmt::Debug for AskStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AskStream").finish_non_exhaustive()
    }
}

/// A conversation known to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Backends report either an ISO timestamp or epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<serde_json::Value>,
}

impl ConversationSummary {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            create_time: None,
        }
    }
}

impl std::fmt::Display for ConversationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = self.title.trim();
        if title.is_empty() {
            write!(f, "(untitled) [{}]", self.id)
        } else {
            write!(f, "{} [{}]", title, self.id)
        }
    }
}

/// A conversational AI backend.
///
/// Calls block on network I/O; async callers must run them on a blocking
/// worker (`tokio::task::spawn_blocking`).
pub trait ConversationBackend: Send + Sync {
    /// Send `prompt`, continuing the thread when ids are given
    fn ask(
        &self,
        prompt: &str,
        conversation_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> BackendResult<AskStream>;

    /// Conversations known to the backend
    fn get_conversations(&self) -> BackendResult<Vec<ConversationSummary>>;

    /// Remove every conversation from the backend
    fn clear_conversations(&self) -> BackendResult<()>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "backend"
    }
}
