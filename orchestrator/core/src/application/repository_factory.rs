// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory
//!
//! Picks the repository implementations for the run and audit aggregates.
//! A configured database gives the PostgreSQL repositories; without one the
//! in-memory repositories are used.

use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::repository::{AgentRunRepository, AuditLogRepository};
use crate::infrastructure::repositories::{
    InMemoryAgentRunRepository, InMemoryAuditLogRepository, PostgresAgentRunRepository,
    PostgresAuditLogRepository,
};

/// Creates an AgentRunRepository for the given pool, or in-memory without one
pub fn create_agent_run_repository(pool: Option<PgPool>) -> Arc<dyn AgentRunRepository> {
    match pool {
        Some(pool) => Arc::new(PostgresAgentRunRepository::new(pool)),
        None => Arc::new(InMemoryAgentRunRepository::new()),
    }
}

/// Creates an AuditLogRepository for the given pool, or in-memory without one
pub fn create_audit_log_repository(pool: Option<PgPool>) -> Arc<dyn AuditLogRepository> {
    match pool {
        Some(pool) => Arc::new(PostgresAuditLogRepository::new(pool)),
        None => Arc::new(InMemoryAuditLogRepository::new()),
    }
}
