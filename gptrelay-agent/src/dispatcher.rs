//! Command dispatch
//!
//! The dispatcher applies one event to one session: parse, step the state
//! machine, perform the action, persist, and produce replies. Callers must
//! serialize events of the same session (see [`crate::ConversationLoop`]).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::FutureExt;
use gptrelay_core::bus::{InboundMessage, OutboundMessage};
use gptrelay_core::config::{Config, ConversationConfig};
use gptrelay_core::session::{ConversationState, Session, SessionStore};
use gptrelay_providers::{BackendResult, ConversationBackend, ConversationSummary};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::command::{help_text, Command};
use crate::event::{Event, IdleTimeout};
use crate::machine::{step, Action, Trigger};
use crate::reporter::{ErrorReporter, Failure};
use crate::timeout::IdleTimers;

/// Reply when the backend produced no text
pub const NO_ANSWER: &str = "no answer";
/// Reply when the account has no conversations
pub const NO_CONVERSATION: &str = "no conversation";
/// Reply after a successful /clear
pub const CLEARED: &str = "All conversations cleared.";

pub struct Dispatcher {
    backend: Arc<dyn ConversationBackend>,
    sessions: Arc<SessionStore>,
    timers: IdleTimers,
    texts: ConversationConfig,
    reporter: ErrorReporter,
}

impl Dispatcher {
    /// Create a dispatcher; fired idle timers are sent to `events`
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        sessions: Arc<SessionStore>,
        config: &Config,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let timeout = Duration::from_secs(config.conversation.idle_timeout_secs);
        Self {
            backend,
            sessions,
            timers: IdleTimers::new(timeout, events),
            texts: config.conversation.clone(),
            reporter: ErrorReporter::new(config.reporter.clone()),
        }
    }

    pub fn timers(&self) -> &IdleTimers {
        &self.timers
    }

    /// Handle one event. Never fails: handler errors and panics are turned
    /// into reports.
    pub async fn handle(&self, event: Event) -> Vec<OutboundMessage> {
        let key = event.session_key();
        let span = info_span!(
            "dispatch",
            channel = %event.channel(),
            session = %key,
            chat = %event.chat_id()
        );

        async {
            let outcome = AssertUnwindSafe(self.route(&event, &key))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(reply)) => return reply.into_iter().collect(),
                Ok(Err(err)) => Failure::from_error(&err),
                Err(panic) => Failure::from_panic(panic),
            };
            let session = self.sessions.get(&key);
            self.reporter.report(&event, &session, &failure)
        }
        .instrument(span)
        .await
    }

    async fn route(&self, event: &Event, key: &str) -> anyhow::Result<Option<OutboundMessage>> {
        match event {
            Event::Inbound(msg) => {
                let command = Command::parse(&msg.content);
                let Some(trigger) = command.trigger() else {
                    debug!(?command, "Ignoring unknown command");
                    return Ok(None);
                };
                if trigger == Trigger::Message && msg.content.trim().is_empty() {
                    debug!("Ignoring empty message");
                    return Ok(None);
                }
                info!(?command, chars = msg.content.chars().count(), "Inbound message");
                let text = self.apply(key, trigger, Some(msg), event).await?;
                Ok(text.map(|text| msg.reply(text)))
            }
            Event::IdleTimeout(fired) => {
                if !self.timers.take_fired(key, fired.generation) {
                    debug!(generation = fired.generation, "Stale idle timer");
                    return Ok(None);
                }
                info!("Idle timeout");
                let text = self.apply(key, Trigger::IdleTimeout, None, event).await?;
                Ok(text.map(|text| timeout_reply(fired, text)))
            }
        }
    }

    /// Perform the transition for `trigger` and return the reply text
    async fn apply(
        &self,
        key: &str,
        trigger: Trigger,
        msg: Option<&InboundMessage>,
        event: &Event,
    ) -> anyhow::Result<Option<String>> {
        let session = self.sessions.get(key);
        let transition = step(session.state(), trigger);
        debug!(from = %session.state(), to = %transition.next, action = ?transition.action, "Transition");

        let reply = match transition.action {
            Action::Greet => {
                self.sessions.put(key, Session::chatting());
                Some(self.texts.greeting.clone())
            }
            Action::Ask => {
                let prompt = msg.map(|m| m.content.clone()).unwrap_or_default();
                Some(self.ask(key, session, prompt).await?)
            }
            Action::Farewell => {
                self.sessions.clear(key);
                Some(self.texts.farewell.clone())
            }
            Action::TimeoutNotice => {
                self.sessions.clear(key);
                Some(self.texts.timeout_notice.clone())
            }
            Action::ListConversations => Some(self.list().await?),
            Action::ClearConversations => {
                let backend = self.backend.clone();
                let result = self.blocking(move || backend.clear_conversations()).await;
                self.sessions.clear(key);
                Some(match result? {
                    Ok(()) => CLEARED.to_string(),
                    Err(err) => {
                        warn!(error = %err, "Clearing conversations failed");
                        err.to_string()
                    }
                })
            }
            Action::ShowHelp => Some(help_text()),
            Action::HintBegin => Some(self.texts.idle_hint.clone()),
            Action::Ignore => None,
        };

        let after = self.sessions.get(key);
        match after.state() {
            ConversationState::Chatting => {
                self.timers.touch(key, event.channel(), event.chat_id());
            }
            ConversationState::Idle => self.timers.cancel(key),
        }
        info!(state = %after.state(), replied = reply.is_some(), "Handled");
        Ok(reply)
    }

    /// Forward a message and record the backend's thread identifiers.
    ///
    /// A backend error leaves the session untouched and becomes the reply.
    async fn ask(&self, key: &str, session: Session, prompt: String) -> anyhow::Result<String> {
        let backend = self.backend.clone();
        let conversation_id = session.conversation_id().map(String::from);
        let parent_id = session.parent_id().map(String::from);

        let outcome = self
            .blocking(move || {
                backend
                    .ask(&prompt, conversation_id.as_deref(), parent_id.as_deref())?
                    .last_reply()
            })
            .await?;

        match outcome {
            Ok(Some(reply)) => {
                let mut updated = session;
                updated.link(reply.conversation_id, reply.parent_id);
                self.sessions.put(key, updated);
                if reply.text.trim().is_empty() {
                    Ok(NO_ANSWER.to_string())
                } else {
                    Ok(reply.text)
                }
            }
            Ok(None) => Ok(NO_ANSWER.to_string()),
            Err(err) => {
                warn!(error = %err, "Backend ask failed");
                Ok(err.to_string())
            }
        }
    }

    async fn list(&self) -> anyhow::Result<String> {
        let backend = self.backend.clone();
        let result = self.blocking(move || backend.get_conversations()).await?;
        Ok(match result {
            Ok(conversations) => format_conversations(&conversations),
            Err(err) => {
                warn!(error = %err, "Listing conversations failed");
                err.to_string()
            }
        })
    }

    /// Run a backend call on the blocking pool
    async fn blocking<T, F>(&self, call: F) -> anyhow::Result<BackendResult<T>>
    where
        F: FnOnce() -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(call)
            .await
            .with_context(|| format!("{} backend call did not complete", self.backend.name()))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend.name())
            .field("sessions", &self.sessions.len())
            .field("timers", &self.timers)
            .finish()
    }
}

fn timeout_reply(fired: &IdleTimeout, text: String) -> OutboundMessage {
    OutboundMessage::new(fired.channel.clone(), fired.chat_id.clone(), text)
}

/// One conversation per line, or the empty-list reply
pub fn format_conversations(conversations: &[ConversationSummary]) -> String {
    if conversations.is_empty() {
        return NO_CONVERSATION.to_string();
    }
    conversations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
