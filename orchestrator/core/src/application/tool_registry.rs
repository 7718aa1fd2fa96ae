// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Registry
//!
//! Named, schema-validated tools callable from agent tasks.
//!
//! Constructed once at startup and passed to handlers by `Arc`; tests build
//! a fresh registry each. Registering an existing name replaces it, which is
//! how tool definitions are hot-reloaded.
//!
//! ## Invocation
//!
//! ```text
//! lookup ─▶ validate input ─▶ execute (cancellable) ─▶ validate output
//!                                                        │
//!                       exactly one tool.called audit ◀──┘ (any outcome)
//! ```
//!
//! The audit record, input and error text included, is redacted and emitted
//! through [`ToolContext::audit`] after the attempt finished, never before.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};

use crate::domain::audit::{AuditStatus, ToolCallAudit};
use crate::domain::events::{AgentEvent, AgentEventType};
use crate::domain::redaction::Redactor;
use crate::domain::schema::CompiledSchema;
use crate::domain::tool::{ToolContext, ToolDefinition, ToolError, ToolMetadata};

/// Role recorded on audits of registry tools, which run on behalf of the
/// agent rather than a gateway role.
pub const REGISTRY_AUDIT_ROLE: &str = "agent";

struct RegisteredTool {
    definition: ToolDefinition,
    input: CompiledSchema,
    output: CompiledSchema,
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
    redactor: Arc<Redactor>,
}

impl ToolRegistry {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            redactor,
        }
    }

    /// Compile both schemas and store the tool, replacing any previous
    /// definition with the same name.
    pub fn register(&self, definition: ToolDefinition) -> Result<(), ToolError> {
        let compile = |schema: &Value, which: &'static str| {
            CompiledSchema::compile(schema).map_err(|e| ToolError::InvalidSchema {
                tool: definition.name.clone(),
                which,
                message: e.to_string(),
            })
        };
        let input = compile(&definition.input_schema, "input")?;
        let output = compile(&definition.output_schema, "output")?;

        let name = definition.name.clone();
        let replaced = self
            .tools
            .write()
            .insert(
                name.clone(),
                Arc::new(RegisteredTool {
                    definition,
                    input,
                    output,
                }),
            )
            .is_some();
        info!(tool = %name, replaced, "Registered tool");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Metadata of every registered tool, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        let mut tools: Vec<ToolMetadata> = self
            .tools
            .read()
            .values()
            .map(|t| ToolMetadata {
                name: t.definition.name.clone(),
                description: t.definition.description.clone(),
                input_schema: t.definition.input_schema.clone(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub async fn invoke(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let started = Instant::now();
        let result = self
            .invoke_inner(name, input.clone(), ctx)
            .instrument(ctx.span.clone())
            .await;

        let status = if result.is_ok() { AuditStatus::Success } else { AuditStatus::Failure };
        metrics::counter!(
            "agentrun_tool_invocations_total",
            "tool" => name.to_string(),
            "status" => status.as_str()
        )
        .increment(1);

        let record = ToolCallAudit {
            role: REGISTRY_AUDIT_ROLE.to_string(),
            resource: name.to_string(),
            verb: "invoke".to_string(),
            status,
            params: input,
            error: result.as_ref().err().map(ToString::to_string),
            error_code: result.as_ref().err().map(|e| e.code().to_string()),
            task_id: ctx.task_id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        // Error text may quote the input, so the whole record is redacted
        let payload = self.redactor.redact(&record.to_payload());
        (ctx.audit)(AgentEvent::new(AgentEventType::ToolCalled, ctx.run_id, payload));

        result
    }

    async fn invoke_inner(&self, name: &str, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;

        tool.input.validate(&input).map_err(|e| ToolError::InputValidation {
            tool: name.to_string(),
            message: e.to_string(),
        })?;

        debug!(tool = name, "Executing tool");
        let output = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(ToolError::Cancelled(name.to_string())),
            out = tool.definition.handler.call(input, ctx) => out.map_err(|source| ToolError::Execution {
                tool: name.to_string(),
                source,
            })?,
        };

        tool.output.validate(&output).map_err(|e| ToolError::OutputValidation {
            tool: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(output)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Arc::new(Redactor::default()))
    }
}
