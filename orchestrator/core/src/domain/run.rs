// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Run Aggregate
//!
//! An [`AgentRun`] is the top-level unit of agent work. It owns a keyed
//! collection of [`Task`]s which are created and replaced exclusively by
//! `task.updated` events.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──(all tasks succeeded | finalize)──▶ succeeded
//!    │
//!    └──────────────(fail)────────────────────▶ failed
//! ```
//!
//! No transition leaves `succeeded` or `failed`. Every mutating method on
//! the aggregate is written so that applying the same input twice leaves
//! the aggregate unchanged the second time; the run service relies on this
//! to tolerate at-least-once delivery without a deduplication table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Task status value that drives run aggregation.
pub const TASK_SUCCEEDED: &str = "succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created or in progress.
    Pending,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub domain: String,
    pub input: Value,
}

/// Record of a single tool call made while executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub tool: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Vec<ToolInvocationRecord>>,
}

impl Task {
    pub fn is_succeeded(&self) -> bool {
        self.status == TASK_SUCCEEDED
    }

    /// Equality over everything except the timestamps.
    pub fn same_content(&self, other: &Task) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.input == other.input
            && self.status == other.status
            && self.priority == other.priority
            && self.metadata == other.metadata
            && self.tool_invocations == other.tool_invocations
    }

    /// Embedding vector carried in `metadata.embedding`, if any.
    pub fn embedding(&self) -> Option<Vec<f32>> {
        let values = self.metadata.as_ref()?.get("embedding")?.as_array()?;
        values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .filter(|v| !v.is_empty())
    }
}

/// Raw task shape as it arrives on a `task.updated` event.
///
/// Timestamps are kept as strings so that missing or unparseable values can
/// be normalised instead of rejecting the whole update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUpdate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    pub status: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default, alias = "toolInvocations")]
    pub tool_invocations: Option<Vec<ToolInvocationRecord>>,
}

impl TaskUpdate {
    /// Check the required fields are present and non-empty.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err(format!("task {} has an empty name", self.id));
        }
        if self.status.trim().is_empty() {
            return Err(format!("task {} has an empty status", self.id));
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() && !metadata.is_null() {
                return Err(format!("task {} metadata must be an object", self.id));
            }
        }
        Ok(())
    }

    /// Build a [`Task`], normalising missing or invalid timestamps.
    ///
    /// When `previous` holds the same content, its timestamps are reused so
    /// that a replayed update does not move `updated_at`.
    pub fn into_task(self, previous: Option<&Task>, now: DateTime<Utc>) -> Task {
        let created_at = parse_timestamp(self.created_at.as_deref());
        let updated_at = parse_timestamp(self.updated_at.as_deref());

        let mut task = Task {
            id: self.id,
            name: self.name,
            input: self.input,
            status: self.status,
            priority: self.priority,
            created_at: created_at.unwrap_or(now),
            updated_at: updated_at.unwrap_or(now),
            metadata: self.metadata,
            tool_invocations: self.tool_invocations,
        };

        if let Some(prev) = previous {
            if created_at.is_none() {
                task.created_at = prev.created_at;
            }
            if updated_at.is_none() && prev.same_content(&task) {
                task.updated_at = prev.updated_at;
            }
        }
        task
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: RunId,
    pub agent_id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    pub metadata: RunMetadata,
    /// Optimistic concurrency token, bumped by the repository on every update.
    #[serde(default)]
    pub version: u64,
}

/// Outcome of applying an input to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("run {run_id} is already {status}")]
pub struct TerminalStateError {
    pub run_id: RunId,
    pub status: RunStatus,
}

impl AgentRun {
    pub fn new(
        agent_id: impl Into<String>,
        project_id: impl Into<String>,
        domain: impl Into<String>,
        input: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            agent_id: agent_id.into(),
            project_id: project_id.into(),
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            tasks: Vec::new(),
            final_output: None,
            error: None,
            metadata: RunMetadata {
                domain: domain.into(),
                input,
            },
            version: 0,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Replace-or-append a task by id and recompute status.
    ///
    /// Status is only promoted out of `pending`; tasks arriving after a run
    /// reached a terminal state are still recorded.
    pub fn merge_task(&mut self, task: Task, now: DateTime<Utc>) -> Applied {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) if *existing == task => return Applied::Unchanged,
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }

        if self.status == RunStatus::Pending && self.all_tasks_succeeded() {
            self.status = RunStatus::Succeeded;
        }
        self.updated_at = now;
        Applied::Changed
    }

    pub fn all_tasks_succeeded(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(Task::is_succeeded)
    }

    /// Mark the run succeeded with its validated final output.
    ///
    /// A run promoted by task aggregation has no output yet and accepts one.
    /// Re-finalizing with the same output is a no-op; anything else on a
    /// terminal run is rejected.
    pub fn finalize(&mut self, output: Value, now: DateTime<Utc>) -> Result<Applied, TerminalStateError> {
        match self.status {
            RunStatus::Succeeded if self.final_output.as_ref() == Some(&output) => {
                return Ok(Applied::Unchanged)
            }
            RunStatus::Succeeded if self.final_output.is_none() => {}
            RunStatus::Pending => {}
            status => {
                return Err(TerminalStateError {
                    run_id: self.id,
                    status,
                })
            }
        }

        self.status = RunStatus::Succeeded;
        self.final_output = Some(output);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(Applied::Changed)
    }

    /// Mark the run failed. Replaying the same failure is a no-op.
    pub fn fail(&mut self, failure: RunFailure, now: DateTime<Utc>) -> Result<Applied, TerminalStateError> {
        match self.status {
            RunStatus::Pending => {}
            RunStatus::Failed if self.error.as_ref() == Some(&failure) => {
                return Ok(Applied::Unchanged)
            }
            status => {
                return Err(TerminalStateError {
                    run_id: self.id,
                    status,
                })
            }
        }

        self.status = RunStatus::Failed;
        self.error = Some(failure);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(Applied::Changed)
    }
}
