//! Conversation flow for gptrelay
//!
//! Inbound chat messages become [`Event`]s, are routed to a worker per user,
//! and are applied to the user's session by the [`Dispatcher`].

pub mod command;
pub mod dispatcher;
pub mod event;
pub mod event_loop;
pub mod machine;
pub mod reporter;
pub mod timeout;

pub use command::{Command, COMMAND_MENU};
pub use dispatcher::{Dispatcher, CLEARED, NO_ANSWER, NO_CONVERSATION};
pub use event::{Event, IdleTimeout};
pub use event_loop::{ConversationLoop, WorkerGauge};
pub use machine::{step, Action, Transition, Trigger};
pub use reporter::{ErrorReporter, Failure};
pub use timeout::IdleTimers;
