// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits declared in
//! `crate::domain::repository`.
//!
//! ## PostgreSQL
//!
//! - **PostgresAgentRunRepository** - runs as JSONB rows with a `version`
//!   column used for compare-and-set updates
//! - **PostgresAuditLogRepository** - append-only audit chain table
//!
//! ## In-Memory
//!
//! Used by tests and the CLI `replay` command:
//! - **InMemoryAgentRunRepository**
//! - **InMemoryAuditLogRepository**

pub mod postgres_agent_run;
pub mod postgres_audit_log;

pub use postgres_agent_run::PostgresAgentRunRepository;
pub use postgres_audit_log::PostgresAuditLogRepository;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::audit::AuditEntry;
use crate::domain::events::AgentEvent;
use crate::domain::repository::{AgentRunRepository, AuditLogRepository, RepositoryError, RunPatch};
use crate::domain::run::{AgentRun, RunId};

#[derive(Clone, Default)]
pub struct InMemoryAgentRunRepository {
    runs: Arc<RwLock<HashMap<RunId, AgentRun>>>,
    events: Arc<RwLock<HashMap<RunId, Vec<AgentEvent>>>>,
}

impl InMemoryAgentRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRunRepository for InMemoryAgentRunRepository {
    async fn create_run(&self, run: &AgentRun) -> Result<AgentRun, RepositoryError> {
        let mut runs = self.runs.write();
        if runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict {
                id: run.id.to_string(),
                expected: 0,
                actual: run.version,
            });
        }
        runs.insert(run.id, run.clone());
        Ok(run.clone())
    }

    async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<AgentRun, RepositoryError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if run.version != patch.expected_version {
            return Err(RepositoryError::Conflict {
                id: id.to_string(),
                expected: patch.expected_version,
                actual: run.version,
            });
        }
        patch.apply_to(run);
        Ok(run.clone())
    }

    async fn append_event(&self, run_id: RunId, event: &AgentEvent) -> Result<(), RepositoryError> {
        if !self.runs.read().contains_key(&run_id) {
            return Err(RepositoryError::NotFound(run_id.to_string()));
        }
        self.events.write().entry(run_id).or_default().push(event.clone());
        Ok(())
    }

    async fn list_runs(&self, project_id: &str, limit: usize) -> Result<Vec<AgentRun>, RepositoryError> {
        let runs = self.runs.read();
        let mut matching: Vec<AgentRun> = runs
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        // Newest first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<AgentRun>, RepositoryError> {
        Ok(self.runs.read().get(&id).cloned())
    }

    async fn list_events(&self, run_id: RunId) -> Result<Vec<AgentEvent>, RepositoryError> {
        Ok(self.events.read().get(&run_id).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLogRepository {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.sequence == entry.sequence) {
            return Err(RepositoryError::Conflict {
                id: format!("audit#{}", entry.sequence),
                expected: entry.sequence,
                actual: entry.sequence,
            });
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>, RepositoryError> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries[skip..].to_vec())
    }
}
