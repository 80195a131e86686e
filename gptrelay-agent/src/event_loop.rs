//! Conversation loop: routes events to per-session workers

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gptrelay_core::bus::{MessageBus, OutboundMessage};
use gptrelay_core::config::Config;
use gptrelay_core::session::SessionStore;
use gptrelay_providers::ConversationBackend;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::event::Event;

/// Consumes inbound messages and fired timers from one place.
///
/// Every session key with pending events gets its own worker task, so events
/// of one user are handled strictly in arrival order while different users
/// proceed concurrently. A worker is retired as soon as its queue drains.
pub struct ConversationLoop {
    bus: MessageBus,
    dispatcher: Arc<Dispatcher>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    gauge: WorkerGauge,
}

impl ConversationLoop {
    pub fn new(
        bus: MessageBus,
        backend: Arc<dyn ConversationBackend>,
        sessions: Arc<SessionStore>,
        config: &Config,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(backend, sessions, config, events_tx));
        Self {
            bus,
            dispatcher,
            events_rx,
            gauge: WorkerGauge::default(),
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Live count of session workers, valid after `run` consumes the loop
    pub fn workers(&self) -> WorkerGauge {
        self.gauge.clone()
    }

    /// Run until `shutdown` resolves or the inbound side of the bus closes
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> gptrelay_core::Result<()> {
        let Self {
            bus,
            dispatcher,
            mut events_rx,
            gauge,
        } = self;

        let mut inbound = bus.take_inbound_receiver().await.ok_or_else(|| {
            gptrelay_core::Error::Channel("inbound receiver already taken".to_string())
        })?;

        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<WorkerIdle>();
        let mut workers = Workers {
            active: HashMap::new(),
            next_id: 0,
            dispatcher,
            bus,
            idle_tx,
            gauge,
        };
        tokio::pin!(shutdown);
        info!("Conversation loop started");

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    info!("Conversation loop shutting down");
                    break;
                }
                msg = inbound.recv() => match msg {
                    Some(msg) => Event::Inbound(msg),
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
                Some(event) = events_rx.recv() => event,
                Some(idle) = idle_rx.recv() => {
                    workers.retire(idle);
                    continue;
                }
            };

            workers.route(event);
        }

        Ok(())
    }
}

/// Number of session workers currently alive
#[derive(Debug, Clone, Default)]
pub struct WorkerGauge(Arc<AtomicUsize>);

impl WorkerGauge {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Held by a worker task for its whole life
struct Alive(WorkerGauge);

impl Alive {
    fn new(gauge: WorkerGauge) -> Self {
        gauge.0.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for Alive {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
    sent: u64,
}

/// Sent by a worker after each handled event
struct WorkerIdle {
    key: String,
    id: u64,
    handled: u64,
}

struct Workers {
    active: HashMap<String, Worker>,
    next_id: u64,
    dispatcher: Arc<Dispatcher>,
    bus: MessageBus,
    idle_tx: mpsc::UnboundedSender<WorkerIdle>,
    gauge: WorkerGauge,
}

impl Workers {
    /// Hand the event to the session's worker, starting one if needed
    fn route(&mut self, event: Event) {
        let key = event.session_key();
        let event = match self.active.get_mut(&key) {
            Some(worker) => match worker.tx.send(event) {
                Ok(()) => {
                    worker.sent += 1;
                    return;
                }
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        debug!(session = %key, "Starting session worker");
        let mut worker = self.spawn(key.clone());
        match worker.tx.send(event) {
            Ok(()) => worker.sent += 1,
            Err(_) => error!(session = %key, "Session worker exited before receiving its first event"),
        }
        self.active.insert(key, worker);
    }

    /// Drop the worker once it has drained everything routed to it.
    ///
    /// Only this loop sends to workers, so `sent == handled` means the queue
    /// is empty and the worker is waiting; closing its queue ends the task.
    fn retire(&mut self, idle: WorkerIdle) {
        let drained = self
            .active
            .get(&idle.key)
            .is_some_and(|w| w.id == idle.id && w.sent == idle.handled);
        if drained {
            self.active.remove(&idle.key);
            debug!(session = %idle.key, "Retiring idle session worker");
        }
    }

    fn spawn(&mut self, key: String) -> Worker {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let dispatcher = self.dispatcher.clone();
        let bus = self.bus.clone();
        let idle_tx = self.idle_tx.clone();
        let alive = Alive::new(self.gauge.clone());

        tokio::spawn(async move {
            let _alive = alive;
            let mut handled = 0u64;
            while let Some(event) = rx.recv().await {
                let origin = match &event {
                    Event::Inbound(msg) => Some((msg.channel.clone(), msg.chat_id.clone())),
                    Event::IdleTimeout(_) => None,
                };

                let mut replies = dispatcher.handle(event).await;
                if let Some((channel, chat_id)) = origin {
                    let answered = replies
                        .iter()
                        .any(|r| r.channel == channel && r.chat_id == chat_id);
                    if !answered {
                        replies.push(OutboundMessage::done(channel, chat_id));
                    }
                }
                for reply in replies {
                    if let Err(e) = bus.publish_outbound(reply) {
                        error!(session = %key, "Failed to publish reply: {}", e);
                    }
                }

                handled += 1;
                let report = WorkerIdle {
                    key: key.clone(),
                    id,
                    handled,
                };
                if idle_tx.send(report).is_err() {
                    break;
                }
            }
            debug!(session = %key, "Session worker stopped");
        });

        Worker { id, tx, sent: 0 }
    }
}
