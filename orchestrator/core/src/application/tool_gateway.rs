// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Execution Gateway
//!
//! Executes role-scoped SQL-template tools on behalf of agent tasks.
//!
//! ## Call pipeline
//!
//! ```text
//! validate request ─▶ resolve manifest ─▶ resolve tool ─▶ convert params
//!        ─▶ resolve credential ─▶ bind template ─▶ execute ─▶ audit
//! ```
//!
//! Every stage can fail with a typed [`GatewayError`]. Whatever the outcome,
//! each call produces exactly one `tool.called` audit record carrying the
//! attempted verb and the parameters validated so far (never the raw
//! request).
//!
//! Values reach the executor only as positional binds produced by
//! [`bind_template`]; there is no path that splices a value into SQL text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::audit::{AuditStatus, ToolCallAudit};
use crate::domain::collaborators::{
    CredentialError, CredentialResolver, ExecutorError, QueryExecutor, RlsContext,
};
use crate::domain::events::{AgentEvent, AgentEventType};
use crate::domain::manifest::{ManifestSet, Role, SqlTool};
use crate::domain::parameters::{convert_param, ParamError, ParamValue};
use crate::domain::run::RunId;
use crate::domain::template::{bind_template, BoundQuery, TemplateError};
use crate::infrastructure::audit_trail::AuditTrail;

/// Resource/verb recorded when the request is rejected before a tool is known.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub role: String,
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub rls_context: RlsContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub tool: String,
    pub verb: String,
    pub rows: Vec<Value>,
    pub rows_affected: u64,
}

/// A validated, bound call that has not been executed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub role: Role,
    pub tool: SqlTool,
    pub verb: String,
    pub params: Vec<(String, ParamValue)>,
    pub query: BoundQuery,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no tool manifest is configured for role '{0}'")]
    ManifestNotFound(Role),

    #[error("tool '{tool}' is not in the {role} manifest")]
    ToolNotFound { role: Role, tool: String },

    #[error("tool '{tool}': required parameter '{param}' is missing")]
    RequiredParameterMissing { tool: String, param: String },

    #[error("tool '{tool}': {source}")]
    TypeConversion {
        tool: String,
        #[source]
        source: ParamError,
    },

    #[error("tool '{tool}': {source}")]
    UndeclaredParameter {
        tool: String,
        #[source]
        source: TemplateError,
    },

    #[error("no credential is bound to role '{role}': {reason}")]
    NoCredentialForRole { role: Role, reason: String },

    #[error("tool '{tool}' failed for role '{role}': {source}")]
    Execution {
        tool: String,
        role: Role,
        #[source]
        source: ExecutorError,
    },

    #[error("tool '{0}' was cancelled")]
    Cancelled(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::ManifestNotFound(_) => "manifest_not_found",
            GatewayError::ToolNotFound { .. } => "tool_not_found",
            GatewayError::RequiredParameterMissing { .. } => "required_parameter_missing",
            GatewayError::TypeConversion { .. } => "type_conversion_error",
            GatewayError::UndeclaredParameter { .. } => "undeclared_parameter",
            GatewayError::NoCredentialForRole { .. } => "no_credential_for_role",
            GatewayError::Execution { .. } => "execution_error",
            GatewayError::Cancelled(_) => "cancelled",
        }
    }
}

/// What the audit record reports about a call, filled in as stages pass.
struct Attempt {
    role: String,
    resource: String,
    verb: String,
    params: Map<String, Value>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            role: UNKNOWN.to_string(),
            resource: UNKNOWN.to_string(),
            verb: UNKNOWN.to_string(),
            params: Map::new(),
        }
    }
}

pub struct ToolGateway {
    manifests: Arc<ManifestSet>,
    credentials: Arc<dyn CredentialResolver>,
    executor: Arc<dyn QueryExecutor>,
    audit: AuditTrail,
}

impl ToolGateway {
    pub fn new(
        manifests: Arc<ManifestSet>,
        credentials: Arc<dyn CredentialResolver>,
        executor: Arc<dyn QueryExecutor>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            manifests,
            credentials,
            executor,
            audit,
        }
    }

    pub fn manifests(&self) -> &ManifestSet {
        &self.manifests
    }

    /// Run the full pipeline. Exactly one audit record is emitted per call.
    pub async fn execute(
        &self,
        request: GatewayRequest,
        cancel: &CancellationToken,
    ) -> Result<GatewayResponse, GatewayError> {
        let started = Instant::now();
        let mut attempt = Attempt::new();
        let result = self.run(&request, cancel, &mut attempt).await;
        self.record(&request, attempt, &result, started);
        result
    }

    /// Validate and bind without executing or auditing. Used for dry runs.
    pub fn prepare(&self, request: &GatewayRequest) -> Result<PreparedCall, GatewayError> {
        self.prepare_with(request, &mut Attempt::new())
    }

    fn prepare_with(&self, request: &GatewayRequest, attempt: &mut Attempt) -> Result<PreparedCall, GatewayError> {
        let role: Role = request.role.parse().map_err(GatewayError::InvalidRequest)?;
        if request.tool.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("tool name must not be empty".to_string()));
        }
        attempt.role = role.as_str().to_string();
        attempt.resource = request.tool.clone();

        let manifest = self
            .manifests
            .get(role)
            .ok_or(GatewayError::ManifestNotFound(role))?;
        let tool = manifest.tool(&request.tool).ok_or_else(|| GatewayError::ToolNotFound {
            role,
            tool: request.tool.clone(),
        })?;
        attempt.verb = tool.verb();

        let mut params = Vec::with_capacity(tool.params.len());
        for decl in &tool.params {
            let value = convert_param(decl, request.params.get(&decl.name)).map_err(|e| match e {
                ParamError::RequiredParameterMissing { name } => GatewayError::RequiredParameterMissing {
                    tool: tool.name.clone(),
                    param: name,
                },
                other => GatewayError::TypeConversion {
                    tool: tool.name.clone(),
                    source: other,
                },
            })?;
            attempt.params.insert(decl.name.clone(), value.to_json());
            params.push((decl.name.clone(), value));
        }
        for extra in request.params.keys().filter(|k| tool.param(k).is_none()) {
            debug!(tool = %tool.name, param = %extra, "Ignoring undeclared request parameter");
        }

        let query = bind_template(&tool.template, &params).map_err(|source| GatewayError::UndeclaredParameter {
            tool: tool.name.clone(),
            source,
        })?;

        Ok(PreparedCall {
            role,
            tool: tool.clone(),
            verb: attempt.verb.clone(),
            params,
            query,
        })
    }

    async fn run(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<GatewayResponse, GatewayError> {
        let prepared = self.prepare_with(request, attempt)?;
        let role = prepared.role;

        let credential = match self.credentials.resolve(role).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Err(GatewayError::NoCredentialForRole {
                    role,
                    reason: "role is not bound".to_string(),
                })
            }
            Err(CredentialError::Unset(source)) => {
                return Err(GatewayError::NoCredentialForRole {
                    role,
                    reason: format!("'{source}' is not set"),
                })
            }
            Err(e) => {
                return Err(GatewayError::NoCredentialForRole {
                    role,
                    reason: e.to_string(),
                })
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled(prepared.tool.name.clone())),
            res = self.executor.execute(&credential, &prepared.query, &request.rls_context) => res,
        };
        let result = result.map_err(|source| GatewayError::Execution {
            tool: prepared.tool.name.clone(),
            role,
            source,
        })?;

        Ok(GatewayResponse {
            tool: prepared.tool.name,
            verb: prepared.verb,
            rows: result.rows,
            rows_affected: result.rows_affected,
        })
    }

    fn record(
        &self,
        request: &GatewayRequest,
        attempt: Attempt,
        result: &Result<GatewayResponse, GatewayError>,
        started: Instant,
    ) {
        let status = if result.is_ok() { AuditStatus::Success } else { AuditStatus::Failure };
        metrics::counter!(
            "agentrun_gateway_calls_total",
            "role" => attempt.role.clone(),
            "verb" => attempt.verb.clone(),
            "status" => status.as_str()
        )
        .increment(1);

        match result {
            Ok(response) => info!(
                role = %attempt.role,
                tool = %attempt.resource,
                verb = %attempt.verb,
                rows = response.rows_affected,
                "Gateway call succeeded"
            ),
            Err(e) => warn!(
                role = %attempt.role,
                tool = %attempt.resource,
                verb = %attempt.verb,
                code = e.code(),
                error = %e,
                "Gateway call failed"
            ),
        }

        let record = ToolCallAudit {
            role: attempt.role,
            resource: attempt.resource,
            verb: attempt.verb,
            status,
            params: Value::Object(attempt.params),
            error: result.as_ref().err().map(ToString::to_string),
            error_code: result.as_ref().err().map(|e| e.code().to_string()),
            task_id: request.task_id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.audit
            .record(AgentEvent::new(AgentEventType::ToolCalled, request.run_id, record.to_payload()));
    }
}
