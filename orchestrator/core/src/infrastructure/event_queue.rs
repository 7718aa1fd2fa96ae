// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Queue Implementation - push delivery of lifecycle events
//
// In-memory queue backed by a bounded tokio mpsc channel. A single dispatch
// loop pops events and awaits every handler registered for the event type.
// Handler errors and panics are logged and the loop moves on to the next
// event. Events are lost on restart; durable brokers implement the same
// `EventQueue` trait.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::collaborators::{EventHandler, EventQueue};
use crate::domain::events::{AgentEvent, AgentEventType};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum EventQueueError {
    #[error("Event queue is closed")]
    Closed,

    #[error("Event queue is already running")]
    AlreadyRunning,
}

type Handlers = Arc<RwLock<HashMap<AgentEventType, Vec<EventHandler>>>>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<mpsc::Receiver<AgentEvent>>,
}

pub struct InMemoryEventQueue {
    sender: mpsc::Sender<AgentEvent>,
    receiver: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    handlers: Handlers,
    running: Mutex<Option<Running>>,
}

impl InMemoryEventQueue {
    /// Capacity bounds how many undelivered events `publish` buffers before
    /// it starts waiting.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            running: Mutex::new(None),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    pub async fn publish(&self, event: AgentEvent) -> Result<(), EventQueueError> {
        debug!(event_type = %event.event_type, "Publishing event");
        self.sender.send(event).await.map_err(|_| EventQueueError::Closed)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    async fn dispatch(handlers: &Handlers, event: AgentEvent) {
        let registered: Vec<EventHandler> = handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        if registered.is_empty() {
            warn!(event_type = %event.event_type, "No handler registered for event");
            return;
        }

        for handler in registered {
            let outcome = AssertUnwindSafe(handler(event.clone())).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    event_id = %event.id.0,
                    event_type = %event.event_type,
                    error = %e,
                    "Event handler failed"
                ),
                Err(_) => error!(
                    event_id = %event.id.0,
                    event_type = %event.event_type,
                    "Event handler panicked"
                ),
            }
        }
    }
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    fn register(&self, event_type: AgentEventType, handler: EventHandler) {
        self.handlers.write().entry(event_type).or_default().push(handler);
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(EventQueueError::AlreadyRunning.into());
        }
        let mut receiver = self.receiver.lock().take().ok_or(EventQueueError::Closed)?;
        let handlers = self.handlers.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    maybe = receiver.recv() => match maybe {
                        Some(event) => Self::dispatch(&handlers, event).await,
                        None => break,
                    },
                    _ = token.cancelled() => {
                        // Flush what was accepted before stop was requested.
                        while let Ok(event) = receiver.try_recv() {
                            Self::dispatch(&handlers, event).await;
                        }
                        break;
                    }
                }
            }
            receiver
        });

        *running = Some(Running { cancel, task });
        info!("Event queue started");
        Ok(())
    }

    /// Deliver everything already queued, then stop. The queue can be
    /// started again afterwards.
    async fn stop(&self) -> anyhow::Result<()> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        running.cancel.cancel();
        let receiver = running.task.await?;
        *self.receiver.lock() = Some(receiver);
        info!("Event queue stopped");
        Ok(())
    }
}
