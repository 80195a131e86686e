//! Conversation state machine
//!
//! `step` is pure: it decides the next state and what the dispatcher must
//! do, without touching the backend or the session store.

use gptrelay_core::session::ConversationState;

/// Something that happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Begin,
    Message,
    End,
    IdleTimeout,
    List,
    Clear,
    Help,
}

/// Work the dispatcher performs for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start a fresh thread and greet; no backend call
    Greet,
    /// Forward the message to the backend
    Ask,
    /// Reset the session and say goodbye
    Farewell,
    /// Reset the session and send the timeout notice
    TimeoutNotice,
    ListConversations,
    /// Clear backend conversations and reset the session
    ClearConversations,
    ShowHelp,
    /// Tell the user to send /begin
    HintBegin,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ConversationState,
    pub action: Action,
}

impl Transition {
    fn to(next: ConversationState, action: Action) -> Self {
        Self { next, action }
    }
}

/// Pure transition function
pub fn step(state: ConversationState, trigger: Trigger) -> Transition {
    use ConversationState::{Chatting, Idle};

    match (state, trigger) {
        (_, Trigger::Begin) => Transition::to(Chatting, Action::Greet),

        (Chatting, Trigger::Message) => Transition::to(Chatting, Action::Ask),
        (Idle, Trigger::Message) => Transition::to(Idle, Action::HintBegin),

        (Chatting, Trigger::End) => Transition::to(Idle, Action::Farewell),
        (Idle, Trigger::End) => Transition::to(Idle, Action::HintBegin),

        (Chatting, Trigger::IdleTimeout) => Transition::to(Idle, Action::TimeoutNotice),
        (Idle, Trigger::IdleTimeout) => Transition::to(Idle, Action::Ignore),

        (state, Trigger::List) => Transition::to(state, Action::ListConversations),
        (_, Trigger::Clear) => Transition::to(Idle, Action::ClearConversations),
        (state, Trigger::Help) => Transition::to(state, Action::ShowHelp),
    }
}
