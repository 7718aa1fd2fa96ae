// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway tool commands
//!
//! Commands: list, bind

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use agentrun_core::application::tool_gateway::{GatewayRequest, ToolGateway};
use agentrun_core::domain::manifest::{ManifestSet, Role};
use agentrun_core::domain::orchestrator_config::OrchestratorConfig;
use agentrun_core::infrastructure::audit_trail::AuditTrail;
use agentrun_core::infrastructure::credentials::EnvCredentialResolver;
use agentrun_core::infrastructure::manifest_loader::ManifestLoader;
use agentrun_core::infrastructure::sql_executor::PostgresQueryExecutor;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// List the tools of one role, or of every configured role
    List {
        #[arg(long)]
        role: Option<Role>,

        /// Manifest directory (default: spec.gateway.manifest_dir)
        #[arg(long, value_name = "DIR")]
        manifest_dir: Option<PathBuf>,
    },

    /// Validate parameters and bind a tool's template without executing it
    Bind {
        #[arg(long)]
        role: String,

        #[arg(long)]
        tool: String,

        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Manifest directory (default: spec.gateway.manifest_dir)
        #[arg(long, value_name = "DIR")]
        manifest_dir: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ToolsCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override).context("Failed to load configuration")?;

    match command {
        ToolsCommand::List { role, manifest_dir } => {
            let manifests = load_manifests(&config, manifest_dir)?;
            list(&manifests, role)
        }
        ToolsCommand::Bind {
            role,
            tool,
            params,
            manifest_dir,
        } => {
            let manifests = load_manifests(&config, manifest_dir)?;
            bind(&config, manifests, role, tool, &params)
        }
    }
}

fn load_manifests(config: &OrchestratorConfig, override_dir: Option<PathBuf>) -> Result<ManifestSet> {
    let dir = override_dir
        .or_else(|| config.spec.gateway.manifest_dir.clone())
        .ok_or_else(|| anyhow!("No manifest directory configured (spec.gateway.manifest_dir or --manifest-dir)"))?;
    ManifestLoader::load_dir(&dir).with_context(|| format!("Failed to load manifests from {:?}", dir))
}

fn list(manifests: &ManifestSet, role: Option<Role>) -> Result<()> {
    let mut roles: Vec<Role> = match role {
        Some(role) => vec![role],
        None => manifests.roles().collect(),
    };
    roles.sort();

    for role in roles {
        let Some(manifest) = manifests.get(role) else {
            println!("{} {}", role.to_string().bold(), "(no manifest)".dimmed());
            continue;
        };
        println!("{} ({} tools)", role.to_string().bold(), manifest.tools.len());
        for tool in &manifest.tools {
            println!("  {} [{}]", tool.name.bold(), tool.verb());
            if !tool.description.is_empty() {
                println!("    {}", tool.description.dimmed());
            }
            for param in &tool.params {
                let required = if param.required { "required" } else { "optional" };
                println!("    :{} {} ({})", param.name, param.kind, required);
            }
        }
        println!();
    }
    Ok(())
}

fn bind(config: &OrchestratorConfig, manifests: ManifestSet, role: String, tool: String, params: &str) -> Result<()> {
    let params: serde_json::Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let params = params
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow!("--params must be a JSON object"))?;

    // Nothing is executed; the executor is never asked for a connection.
    let gateway = ToolGateway::new(
        Arc::new(manifests),
        Arc::new(EnvCredentialResolver::from_config(&config.spec.gateway.credentials)),
        Arc::new(PostgresQueryExecutor::new(config.spec.gateway.statement_timeout_ms)),
        AuditTrail::new(config.spec.audit.build_redactor()?),
    );

    let request = GatewayRequest {
        role,
        tool,
        params,
        ..Default::default()
    };
    let prepared = gateway
        .prepare(&request)
        .map_err(|e| anyhow!("{} ({})", e, e.code()))?;

    println!("{} {} [{}]", "✓".green(), prepared.tool.name.bold(), prepared.verb);
    println!("{}", prepared.query.sql);
    for (position, (name, value)) in prepared.query.names.iter().zip(&prepared.query.params).enumerate() {
        println!("  ${} :{} = {}", position + 1, name, value.to_json());
    }
    Ok(())
}
