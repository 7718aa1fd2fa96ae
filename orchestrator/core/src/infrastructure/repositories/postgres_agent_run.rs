// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of AgentRunRepository
//!
//! The whole aggregate is stored as JSONB in `agent_runs.document`; the
//! scalar columns exist for filtering and for the compare-and-set guard on
//! `version`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::domain::events::{AgentEvent, EventId};
use crate::domain::repository::{AgentRunRepository, RepositoryError, RunPatch};
use crate::domain::run::{AgentRun, RunId};

pub struct PostgresAgentRunRepository {
    pool: PgPool,
}

impl PostgresAgentRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn deserialize_row(row: &sqlx::postgres::PgRow) -> Result<AgentRun, RepositoryError> {
        let document: serde_json::Value = row
            .try_get("document")
            .map_err(|e| RepositoryError::Database(format!("Missing document: {}", e)))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| RepositoryError::Database(format!("Missing version: {}", e)))?;
        let mut run: AgentRun = serde_json::from_value(document)?;
        run.version = version as u64;
        Ok(run)
    }
}

#[async_trait]
impl AgentRunRepository for PostgresAgentRunRepository {
    async fn create_run(&self, run: &AgentRun) -> Result<AgentRun, RepositoryError> {
        let document = serde_json::to_value(run)?;
        sqlx::query(
            r#"
            INSERT INTO agent_runs (id, project_id, agent_id, status, document, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.id.0)
        .bind(&run.project_id)
        .bind(&run.agent_id)
        .bind(run.status.as_str())
        .bind(document)
        .bind(run.version as i64)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.id, "Created run row");
        Ok(run.clone())
    }

    async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<AgentRun, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT document, version FROM agent_runs WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let mut run = Self::deserialize_row(&row)?;

        if run.version != patch.expected_version {
            return Err(RepositoryError::Conflict {
                id: id.to_string(),
                expected: patch.expected_version,
                actual: run.version,
            });
        }
        patch.apply_to(&mut run);

        let document = serde_json::to_value(&run)?;
        let result = sqlx::query(
            r#"
            UPDATE agent_runs
            SET status = $2, document = $3, version = $4, updated_at = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(id.0)
        .bind(run.status.as_str())
        .bind(document)
        .bind(run.version as i64)
        .bind(run.updated_at)
        .bind((run.version - 1) as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict {
                id: id.to_string(),
                expected: run.version - 1,
                actual: run.version,
            });
        }
        tx.commit().await?;
        Ok(run)
    }

    async fn append_event(&self, run_id: RunId, event: &AgentEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agent_run_events (id, run_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id.0)
        .bind(run_id.0)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_runs(&self, project_id: &str, limit: usize) -> Result<Vec<AgentRun>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT document, version FROM agent_runs
            WHERE project_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::deserialize_row).collect()
    }

    async fn get_run(&self, id: RunId) -> Result<Option<AgentRun>, RepositoryError> {
        let row = sqlx::query("SELECT document, version FROM agent_runs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::deserialize_row).transpose()
    }

    async fn list_events(&self, run_id: RunId) -> Result<Vec<AgentEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, created_at FROM agent_run_events
            WHERE run_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AgentEvent, RepositoryError> {
                let event_type: String = row
                    .try_get("event_type")
                    .map_err(|e| RepositoryError::Database(format!("Missing event_type: {}", e)))?;
                Ok(AgentEvent {
                    id: EventId(
                        row.try_get("id")
                            .map_err(|e| RepositoryError::Database(format!("Missing id: {}", e)))?,
                    ),
                    run_id: Some(run_id),
                    event_type: event_type.parse().map_err(RepositoryError::Serialization)?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| RepositoryError::Database(format!("Missing created_at: {}", e)))?,
                    payload: row
                        .try_get("payload")
                        .map_err(|e| RepositoryError::Database(format!("Missing payload: {}", e)))?,
                })
            })
            .collect()
    }
}
