// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::run::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle and audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentEventType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "tool.called")]
    ToolCalled,
}

impl AgentEventType {
    pub const ALL: [AgentEventType; 5] = [
        AgentEventType::TaskCreated,
        AgentEventType::TaskUpdated,
        AgentEventType::RunCompleted,
        AgentEventType::RunFailed,
        AgentEventType::ToolCalled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentEventType::TaskCreated => "task.created",
            AgentEventType::TaskUpdated => "task.updated",
            AgentEventType::RunCompleted => "run.completed",
            AgentEventType::RunFailed => "run.failed",
            AgentEventType::ToolCalled => "tool.called",
        }
    }

    /// Whether an event of this type must be attached to a run.
    pub fn requires_run(self) -> bool {
        !matches!(self, AgentEventType::ToolCalled)
    }
}

impl fmt::Display for AgentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// Immutable, append-style lifecycle/audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: EventId,
    /// Absent only for tool calls made outside of a run.
    #[serde(default, rename = "runId", alias = "run_id", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventShapeError {
    #[error("{0} event is missing runId")]
    MissingRunId(AgentEventType),

    #[error("{0} event payload must be a JSON object")]
    PayloadNotObject(AgentEventType),
}

impl AgentEvent {
    pub fn new(event_type: AgentEventType, run_id: Option<RunId>, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            run_id,
            event_type,
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn for_run(event_type: AgentEventType, run_id: RunId, payload: Value) -> Self {
        Self::new(event_type, Some(run_id), payload)
    }

    /// Check the structural invariants serde cannot express.
    pub fn validate(&self) -> Result<(), EventShapeError> {
        if self.event_type.requires_run() && self.run_id.is_none() {
            return Err(EventShapeError::MissingRunId(self.event_type));
        }
        if !self.payload.is_object() {
            return Err(EventShapeError::PayloadNotObject(self.event_type));
        }
        Ok(())
    }
}
