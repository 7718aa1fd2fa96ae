// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool definitions for the in-process tool registry.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::events::AgentEvent;
use crate::domain::run::RunId;

/// Forwards an audit event towards the audit trail.
pub type AuditCallback = Arc<dyn Fn(AgentEvent) + Send + Sync>;

/// Per-invocation context handed to a tool.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: Option<RunId>,
    pub task_id: Option<String>,
    pub span: tracing::Span,
    pub audit: AuditCallback,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(run_id: Option<RunId>, task_id: Option<String>, audit: AuditCallback) -> Self {
        let span = tracing::info_span!("tool", run_id = ?run_id, task_id = ?task_id);
        Self {
            run_id,
            task_id,
            span,
            audit,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("run_id", &self.run_id)
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// Execution function of a tool. Receives input already validated against
/// the tool's input schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        (self)(input, ctx.clone()).await
    }
}

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        output_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Tool metadata for discovery (e.g. injecting schemas into prompts).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),

    #[error("tool '{tool}' declares an invalid {which} schema: {message}")]
    InvalidSchema {
        tool: String,
        which: &'static str,
        message: String,
    },

    #[error("input for tool '{tool}' failed validation: {message}")]
    InputValidation { tool: String, message: String },

    #[error("output of tool '{tool}' failed validation: {message}")]
    OutputValidation { tool: String, message: String },

    #[error("tool '{tool}' failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("tool '{0}' was cancelled")]
    Cancelled(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "tool_not_found",
            ToolError::InvalidSchema { .. } => "invalid_schema",
            ToolError::InputValidation { .. } => "input_validation_error",
            ToolError::OutputValidation { .. } => "output_validation_error",
            ToolError::Execution { .. } => "execution_error",
            ToolError::Cancelled(_) => "cancelled",
        }
    }
}
