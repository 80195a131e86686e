//! Session data structures

use serde::{Deserialize, Serialize};

/// Conversation flow state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No conversation in progress
    #[default]
    Idle,
    /// Text messages are forwarded to the backend
    Chatting,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::Idle => f.write_str("idle"),
            ConversationState::Chatting => f.write_str("chatting"),
        }
    }
}

/// Per-user conversation linkage
///
/// `parent_id` is only ever set together with `conversation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(default)]
    state: ConversationState,
}

impl Session {
    /// A fresh session in the `Chatting` state with no backend thread yet
    pub fn chatting() -> Self {
        Self {
            state: ConversationState::Chatting,
            ..Self::default()
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Attach the thread identifiers returned by the backend.
    ///
    /// A `parent_id` without a `conversation_id` is dropped.
    pub fn link(&mut self, conversation_id: Option<String>, parent_id: Option<String>) {
        self.parent_id = parent_id.filter(|_| conversation_id.is_some());
        self.conversation_id = conversation_id;
    }

    /// Builder form of [`Session::link`]
    pub fn linked(mut self, conversation_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        self.link(Some(conversation_id.into()), Some(parent_id.into()));
        self
    }

    /// Whether this is the freshly-initialised value
    pub fn is_pristine(&self) -> bool {
        *self == Self::default()
    }

    /// Repair records read from disk that violate the linkage invariant.
    ///
    /// Returns true when something was changed.
    pub(crate) fn normalize(&mut self) -> bool {
        if self.parent_id.is_some() && self.conversation_id.is_none() {
            self.parent_id = None;
            return true;
        }
        false
    }
}
