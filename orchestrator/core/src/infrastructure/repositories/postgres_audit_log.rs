// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of AuditLogRepository
//!
//! Append-only. The sequence number is the primary key, so a replayed
//! entry is rejected by the database rather than silently duplicated.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::audit::AuditEntry;
use crate::domain::repository::{AuditLogRepository, RepositoryError};

pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let event = serde_json::to_value(&entry.event)?;
        sqlx::query(
            r#"
            INSERT INTO audit_log (sequence, event, prev_hash, hash, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.sequence as i64)
        .bind(event)
        .bind(&entry.prev_hash)
        .bind(&entry.hash)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, event, prev_hash, hash, recorded_at FROM (
                SELECT * FROM audit_log ORDER BY sequence DESC LIMIT $1
            ) recent
            ORDER BY sequence ASC
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AuditEntry, RepositoryError> {
                let sequence: i64 = row.try_get("sequence")?;
                let event: serde_json::Value = row.try_get("event")?;
                Ok(AuditEntry {
                    sequence: sequence as u64,
                    event: serde_json::from_value(event)?,
                    prev_hash: row.try_get("prev_hash")?,
                    hash: row.try_get("hash")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}
