// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the run aggregate and the audit log, following
//! the repository pattern: interface defined in the domain layer,
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgentRunRepository` | `AgentRun` | `InMemoryAgentRunRepository`, `PostgresAgentRunRepository` |
//! | `AuditLogRepository` | `AuditEntry` | `InMemoryAuditLogRepository`, `PostgresAuditLogRepository` |
//!
//! ## Optimistic Concurrency
//!
//! `update_run` takes the version the caller read. Implementations must
//! apply the patch only if the stored version still matches and bump it by
//! one, returning [`RepositoryError::Conflict`] otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::events::AgentEvent;
use crate::domain::run::{AgentRun, RunFailure, RunId, RunStatus, Task};
use crate::domain::audit::AuditEntry;

/// Partial update of a run. `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPatch {
    pub expected_version: u64,
    pub status: Option<RunStatus>,
    pub tasks: Option<Vec<Task>>,
    pub final_output: Option<Value>,
    pub error: Option<RunFailure>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RunPatch {
    /// Patch that carries every mutable field of `run`.
    pub fn from_run(run: &AgentRun, expected_version: u64) -> Self {
        Self {
            expected_version,
            status: Some(run.status),
            tasks: Some(run.tasks.clone()),
            final_output: run.final_output.clone(),
            error: run.error.clone(),
            completed_at: run.completed_at,
            updated_at: run.updated_at,
        }
    }

    /// Apply onto a stored record and bump its version.
    pub fn apply_to(self, run: &mut AgentRun) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(tasks) = self.tasks {
            run.tasks = tasks;
        }
        if let Some(output) = self.final_output {
            run.final_output = Some(output);
        }
        if let Some(error) = self.error {
            run.error = Some(error);
        }
        if let Some(completed_at) = self.completed_at {
            run.completed_at = Some(completed_at);
        }
        run.updated_at = self.updated_at;
        run.version = self.expected_version + 1;
    }
}

#[async_trait]
pub trait AgentRunRepository: Send + Sync {
    async fn create_run(&self, run: &AgentRun) -> Result<AgentRun, RepositoryError>;

    /// Compare-and-set update; see module docs.
    async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<AgentRun, RepositoryError>;

    async fn append_event(&self, run_id: RunId, event: &AgentEvent) -> Result<(), RepositoryError>;

    /// Most recently created runs first.
    async fn list_runs(&self, project_id: &str, limit: usize) -> Result<Vec<AgentRun>, RepositoryError>;

    async fn get_run(&self, id: RunId) -> Result<Option<AgentRun>, RepositoryError>;

    async fn list_events(&self, run_id: RunId) -> Result<Vec<AgentEvent>, RepositoryError>;
}

/// Append-only storage for audit trail entries.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
