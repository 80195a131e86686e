//! Per-session idle timers
//!
//! Each arm gets a fresh generation number. A fired timer only enqueues an
//! [`Event::IdleTimeout`] into the session's queue; the worker then checks
//! the generation so a timer superseded by later activity does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::event::{Event, IdleTimeout};

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct IdleTimers {
    timeout: Duration,
    events: mpsc::UnboundedSender<Event>,
    armed: Mutex<HashMap<String, ArmedTimer>>,
    next_generation: AtomicU64,
}

impl IdleTimers {
    pub fn new(timeout: Duration, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            timeout,
            events,
            armed: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm (or re-arm) the timer of a session. Must run inside a tokio runtime.
    pub fn touch(&self, session_key: &str, channel: &str, chat_id: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let fired = IdleTimeout {
            session_key: session_key.to_string(),
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            generation,
        };

        let events = self.events.clone();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(session = %fired.session_key, generation, "idle timer fired");
            // The loop may already be shutting down
            let _ = events.send(Event::IdleTimeout(fired));
        });

        let previous = self
            .armed
            .lock()
            .insert(session_key.to_string(), ArmedTimer { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        trace!(session = %session_key, generation, "idle timer armed");
        generation
    }

    /// Disarm the timer of a session, if any
    pub fn cancel(&self, session_key: &str) {
        if let Some(timer) = self.armed.lock().remove(session_key) {
            timer.handle.abort();
            trace!(session = %session_key, generation = timer.generation, "idle timer cancelled");
        }
    }

    /// Whether `generation` is the live arm of the session
    pub fn is_current(&self, session_key: &str, generation: u64) -> bool {
        self.armed
            .lock()
            .get(session_key)
            .is_some_and(|timer| timer.generation == generation)
    }

    /// Consume a fired timer. Returns false when the event is stale.
    pub fn take_fired(&self, session_key: &str, generation: u64) -> bool {
        let mut armed = self.armed.lock();
        match armed.get(session_key) {
            Some(timer) if timer.generation == generation => {
                armed.remove(session_key);
                true
            }
            _ => false,
        }
    }

    /// Number of armed timers
    pub fn armed(&self) -> usize {
        self.armed.lock().len()
    }
}

impl Drop for IdleTimers {
    fn drop(&mut self) {
        for (_, timer) in self.armed.get_mut().drain() {
            timer.handle.abort();
        }
    }
}

impl std::fmt::Debug for IdleTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTimers")
            .field("timeout", &self.timeout)
            .field("armed", &self.armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timers(secs: u64) -> (IdleTimers, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (IdleTimers::new(Duration::from_secs(secs), tx), rx)
    }

    fn generation_of(event: Event) -> u64 {
        match event {
            Event::IdleTimeout(fired) => fired.generation,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_timeout() {
        let (timers, mut rx) = timers(600);
        let generation = timers.touch("telegram:1", "telegram", "100");

        let early = tokio::time::timeout(Duration::from_secs(599), rx.recv()).await;
        assert!(early.is_err());

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(generation_of(fired), generation);
        assert!(timers.take_fired("telegram:1", generation));
        assert!(!timers.take_fired("telegram:1", generation));
        assert_eq!(timers.armed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_rearms_and_supersedes() {
        let (timers, mut rx) = timers(600);
        let first = timers.touch("telegram:1", "telegram", "100");
        tokio::time::sleep(Duration::from_secs(400)).await;
        let second = timers.touch("telegram:1", "telegram", "100");
        assert!(second > first);
        assert!(!timers.is_current("telegram:1", first));

        // 700s after the first arm, 300s after the second
        let quiet = tokio::time::timeout(Duration::from_secs(300), rx.recv()).await;
        assert!(quiet.is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(generation_of(fired), second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (timers, mut rx) = timers(10);
        timers.touch("telegram:1", "telegram", "100");
        timers.cancel("telegram:1");
        assert_eq!(timers.armed(), 0);

        let quiet = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_independent() {
        let (timers, _rx) = timers(10);
        let a = timers.touch("telegram:1", "telegram", "100");
        let b = timers.touch("telegram:2", "telegram", "200");
        timers.cancel("telegram:1");
        assert!(!timers.is_current("telegram:1", a));
        assert!(timers.is_current("telegram:2", b));
    }
}
