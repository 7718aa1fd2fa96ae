// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod effects;
pub mod audit_persister;
pub mod tool_registry;
pub mod tool_gateway;
pub mod agent_run_service;
pub mod job_processor;
pub mod repository_factory;

// Re-export services for convenience
pub use agent_run_service::{AgentRunService, RunServiceError};
pub use audit_persister::{AuditPersister, AuditPersisterHandle};
pub use job_processor::{AgentJobProcessor, JobError};
pub use tool_gateway::{GatewayError, GatewayRequest, GatewayResponse, PreparedCall, ToolGateway};
pub use tool_registry::ToolRegistry;
