#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gptrelay_agent::{Dispatcher, Event};
use gptrelay_core::bus::InboundMessage;
use gptrelay_core::config::Config;
use gptrelay_core::session::SessionStore;
use gptrelay_providers::{
    AskReply, AskStream, BackendError, BackendResult, ConversationBackend, ConversationSummary,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskCall {
    pub prompt: String,
    pub conversation_id: Option<String>,
    pub parent_id: Option<String>,
}

/// Backend returning scripted results in order
#[derive(Default)]
pub struct FakeBackend {
    asks: Mutex<VecDeque<BackendResult<Vec<AskReply>>>>,
    conversations: Mutex<Option<BackendResult<Vec<ConversationSummary>>>>,
    clear_result: Mutex<Option<BackendResult<()>>>,
    calls: Mutex<Vec<AskCall>>,
    clears: AtomicUsize,
    panic_on_ask: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_reply(&self, text: &str, conversation_id: &str, parent_id: &str) {
        self.asks
            .lock()
            .unwrap()
            .push_back(Ok(vec![AskReply::new(text, conversation_id, parent_id)]));
    }

    pub fn push_result(&self, result: BackendResult<Vec<AskReply>>) {
        self.asks.lock().unwrap().push_back(result);
    }

    pub fn push_error(&self, message: &str) {
        self.push_result(Err(BackendError::Transport(message.to_string())));
    }

    pub fn set_conversations(&self, result: BackendResult<Vec<ConversationSummary>>) {
        *self.conversations.lock().unwrap() = Some(result);
    }

    pub fn set_clear_result(&self, result: BackendResult<()>) {
        *self.clear_result.lock().unwrap() = Some(result);
    }

    pub fn panic_on_ask(&self) {
        self.panic_on_ask.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<AskCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl ConversationBackend for FakeBackend {
    fn ask(
        &self,
        prompt: &str,
        conversation_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> BackendResult<AskStream> {
        self.calls.lock().unwrap().push(AskCall {
            prompt: prompt.to_string(),
            conversation_id: conversation_id.map(String::from),
            parent_id: parent_id.map(String::from),
        });
        if self.panic_on_ask.load(Ordering::SeqCst) {
            panic!("backend exploded");
        }
        let next = self.asks.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        next.map(AskStream::from_replies)
    }

    fn get_conversations(&self) -> BackendResult<Vec<ConversationSummary>> {
        self.conversations
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(Vec::new()))
    }

    fn clear_conversations(&self) -> BackendResult<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.clear_result.lock().unwrap().clone().unwrap_or(Ok(()))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub sessions: Arc<SessionStore>,
    pub dispatcher: Dispatcher,
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_store(config, Arc::new(SessionStore::in_memory()))
    }

    pub fn with_store(config: Config, sessions: Arc<SessionStore>) -> Self {
        let backend = FakeBackend::new();
        let (tx, events) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(backend.clone(), sessions.clone(), &config, tx);
        Self {
            backend,
            sessions,
            dispatcher,
            events,
        }
    }

    /// Send a text from user 42 in chat 100 and return the reply texts
    pub async fn say(&self, text: &str) -> Vec<String> {
        self.say_as("42", text).await
    }

    pub async fn say_as(&self, user: &str, text: &str) -> Vec<String> {
        let msg = InboundMessage::new("telegram", user, "100", text);
        self.dispatcher
            .handle(Event::Inbound(msg))
            .await
            .into_iter()
            .map(|reply| reply.content)
            .collect()
    }
}

pub const KEY: &str = "telegram:42";
