//! Per-user session state
//!
//! A session links a user to a backend conversation thread and records
//! whether a conversation is in progress.

pub mod manager;
pub mod store;

pub use manager::{JsonFilePersistence, MemoryPersistence, SessionPersistence, SessionStore};
pub use store::{ConversationState, Session};
