// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # External Collaborator Contracts
//!
//! Interfaces the core consumes but does not own:
//!
//! - [`CredentialResolver`]: role to execution credential (gateway)
//! - [`QueryExecutor`]: runs a bound query with a credential (gateway)
//! - [`VectorIndex`]: optional embedding sink (run service, best-effort)
//! - [`EventQueue`]: push-based lifecycle event source (job processor)
//!
//! Implementations live in `crate::infrastructure`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::events::{AgentEvent, AgentEventType};
use crate::domain::manifest::Role;
use crate::domain::template::BoundQuery;

/// Opaque execution credential (e.g. a connection string). Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential source '{0}' is not set")]
    Unset(String),

    #[error("credential store error: {0}")]
    Store(String),
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// `Ok(None)` when the role has no credential bound.
    async fn resolve(&self, role: Role) -> Result<Option<Credential>, CredentialError>;
}

/// Row-level-security settings applied for the duration of one query.
pub type RlsContext = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub rows_affected: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("statement timed out after {0} ms")]
    Timeout(u64),
}

impl From<sqlx::Error> for ExecutorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                ExecutorError::Connection(err.to_string())
            }
            other => ExecutorError::Query(other.to_string()),
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        credential: &Credential,
        query: &BoundQuery,
        rls: &RlsContext,
    ) -> Result<QueryResult, ExecutorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("vector index request failed: {0}")]
    Request(String),

    #[error("vector index rejected upsert with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for VectorIndexError {
    fn from(err: reqwest::Error) -> Self {
        VectorIndexError::Request(err.to_string())
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorIndexError>;
}

/// Handler invoked by a queue for one delivered event.
pub type EventHandler = Arc<dyn Fn(AgentEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Push-based event source: the queue calls registered handlers keyed by
/// event type. Delivery is at-least-once.
#[async_trait]
pub trait EventQueue: Send + Sync {
    fn register(&self, event_type: AgentEventType, handler: EventHandler);

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}
