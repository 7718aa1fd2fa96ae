// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Job Processor
//!
//! Registers type-keyed handlers on an [`EventQueue`] and forwards each
//! lifecycle event to the matching [`AgentRunService`] operation:
//!
//! | Event | Service call |
//! |-------|--------------|
//! | `task.updated` | `record_task_result` |
//! | `run.completed` | `finalize_run` |
//! | `run.failed` | `fail_run` |
//!
//! The processor keeps no deduplication state. Redelivered events converge
//! because the service treats an already-applied input as a no-op. A
//! failing event is returned to the queue as an error, which logs it and
//! moves on to the next one.

use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::agent_run_service::{AgentRunService, RunServiceError};
use crate::domain::collaborators::{EventHandler, EventQueue};
use crate::domain::events::{AgentEvent, AgentEventType};
use crate::domain::run::{RunFailure, RunId};

/// Event types the processor subscribes to.
pub const HANDLED_EVENTS: [AgentEventType; 3] = [
    AgentEventType::TaskUpdated,
    AgentEventType::RunCompleted,
    AgentEventType::RunFailed,
];

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0} event is missing runId")]
    MissingRunId(AgentEventType),

    #[error("{event_type} event has an invalid payload: {message}")]
    InvalidPayload {
        event_type: AgentEventType,
        message: String,
    },

    #[error("{0} events are not handled by the job processor")]
    Unsupported(AgentEventType),

    #[error(transparent)]
    Service(#[from] RunServiceError),
}

pub struct AgentJobProcessor {
    service: Arc<AgentRunService>,
    queue: Arc<dyn EventQueue>,
    registered: AtomicBool,
}

impl AgentJobProcessor {
    pub fn new(service: Arc<AgentRunService>, queue: Arc<dyn EventQueue>) -> Self {
        Self {
            service,
            queue,
            registered: AtomicBool::new(false),
        }
    }

    /// Register handlers (once) and start the queue.
    pub async fn start(&self) -> anyhow::Result<()> {
        if !self.registered.swap(true, Ordering::SeqCst) {
            for event_type in HANDLED_EVENTS {
                self.queue.register(event_type, self.handler());
            }
        }
        self.queue.start().await?;
        info!("Agent job processor started");
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.queue.stop().await?;
        info!("Agent job processor stopped");
        Ok(())
    }

    /// Apply one event directly, bypassing the queue.
    pub async fn handle_event(&self, event: AgentEvent) -> Result<(), JobError> {
        Self::dispatch(&self.service, event).await
    }

    fn handler(&self) -> EventHandler {
        let service = self.service.clone();
        Arc::new(move |event: AgentEvent| {
            let service = service.clone();
            async move { Self::dispatch(&service, event).await.map_err(anyhow::Error::from) }.boxed()
        })
    }

    async fn dispatch(service: &AgentRunService, event: AgentEvent) -> Result<(), JobError> {
        let event_type = event.event_type;
        let run_id = event.run_id.ok_or(JobError::MissingRunId(event_type))?;
        debug!(event_id = %event.id.0, event_type = %event_type, run_id = %run_id, "Processing lifecycle event");

        match event_type {
            AgentEventType::TaskUpdated => Self::on_task_update(service, run_id, event.payload).await,
            AgentEventType::RunCompleted => Self::on_run_completed(service, run_id, event.payload).await,
            AgentEventType::RunFailed => Self::on_run_failed(service, run_id, event.payload).await,
            other => Err(JobError::Unsupported(other)),
        }
    }

    async fn on_task_update(service: &AgentRunService, run_id: RunId, payload: Value) -> Result<(), JobError> {
        let task = match payload {
            Value::Object(mut map) if map.contains_key("task") => map.remove("task").unwrap_or(Value::Null),
            other => other,
        };
        service.record_task_result(run_id, task).await?;
        Ok(())
    }

    async fn on_run_completed(service: &AgentRunService, run_id: RunId, payload: Value) -> Result<(), JobError> {
        let output = payload
            .get("output")
            .cloned()
            .ok_or_else(|| JobError::InvalidPayload {
                event_type: AgentEventType::RunCompleted,
                message: "missing output".to_string(),
            })?;

        let domain = match payload.get("domain").and_then(Value::as_str) {
            Some(domain) => domain.to_string(),
            None => {
                service
                    .get_run(run_id)
                    .await?
                    .ok_or(RunServiceError::RunNotFound(run_id))?
                    .metadata
                    .domain
            }
        };

        service.finalize_run(run_id, output, &domain).await?;
        Ok(())
    }

    async fn on_run_failed(service: &AgentRunService, run_id: RunId, payload: Value) -> Result<(), JobError> {
        let failure = failure_from_payload(&payload).ok_or_else(|| JobError::InvalidPayload {
            event_type: AgentEventType::RunFailed,
            message: "expected error.message or message".to_string(),
        })?;
        service.fail_run(run_id, failure).await?;
        Ok(())
    }
}

/// Accepts `{"error": {"message", "trace"}}`, `{"error": "..."}` or
/// `{"message", "trace"}`.
fn failure_from_payload(payload: &Value) -> Option<RunFailure> {
    let source = payload.get("error").unwrap_or(payload);
    if let Some(message) = source.as_str() {
        return Some(RunFailure {
            message: message.to_string(),
            trace: None,
        });
    }

    let message = source.get("message")?.as_str()?.to_string();
    let trace = source
        .get("trace")
        .or_else(|| source.get("stack"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(RunFailure { message, trace })
}
