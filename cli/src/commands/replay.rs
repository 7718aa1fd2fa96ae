// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Replay command
//!
//! Reads lifecycle events from an NDJSON file, one event per line:
//!
//! ```text
//! {"type":"task.created","runId":"<uuid>","payload":{"agent_id":"planner","project_id":"p1","domain":"events","input":{}}}
//! {"type":"task.updated","runId":"<uuid>","payload":{"task":{"id":"t1","name":"search","status":"succeeded"}}}
//! {"type":"run.completed","runId":"<uuid>","payload":{"output":{"title":"Gala"}}}
//! ```
//!
//! `task.created` lines create the run; every other line goes through the
//! job processor exactly as written, duplicates included.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use agentrun_core::domain::events::{AgentEvent, AgentEventType};
use agentrun_core::domain::orchestrator_config::OrchestratorConfig;
use agentrun_core::domain::run::{RunId, RunStatus};
use agentrun_core::infrastructure::audit_trail::AuditTrail;

use crate::embedded::EmbeddedOrchestrator;

#[derive(Args)]
pub struct ReplayArgs {
    /// NDJSON file of lifecycle events
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Print the final runs as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(rename = "type")]
    event_type: AgentEventType,
    #[serde(rename = "runId", alias = "run_id")]
    run_id: RunId,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct CreateRunPayload {
    #[serde(default = "default_agent")]
    agent_id: String,
    #[serde(default)]
    project_id: String,
    domain: String,
    #[serde(default)]
    input: Value,
}

fn default_agent() -> String {
    "replay".to_string()
}

pub async fn execute(args: ReplayArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let content =
        std::fs::read_to_string(&args.file).with_context(|| format!("Failed to read {:?}", args.file))?;
    let lines = parse_lines(&content)?;

    let mut orchestrator = EmbeddedOrchestrator::new(&config).await?;
    orchestrator.start().await?;

    for line in lines {
        match line.event_type {
            AgentEventType::TaskCreated => {
                let payload: CreateRunPayload = serde_json::from_value(line.payload)
                    .with_context(|| format!("Invalid task.created payload for run {}", line.run_id))?;
                orchestrator
                    .create_run(line.run_id, &payload.agent_id, &payload.project_id, &payload.domain, payload.input)
                    .await?;
            }
            event_type => {
                orchestrator
                    .publish(AgentEvent::for_run(event_type, line.run_id, line.payload))
                    .await?;
            }
        }
    }

    let (runs, audit) = orchestrator.finish().await?;

    if args.json {
        let finals: Vec<_> = runs.iter().map(|(_, run)| run).collect();
        println!("{}", serde_json::to_string_pretty(&finals)?);
        return Ok(());
    }

    println!("{}", "Replayed runs:".bold());
    for (external, run) in &runs {
        let status = match run.status {
            RunStatus::Succeeded => run.status.to_string().green(),
            RunStatus::Failed => run.status.to_string().red(),
            RunStatus::Pending => run.status.to_string().yellow(),
        };
        println!("  {} → {} [{}] tasks={}", external, run.id, status, run.tasks.len());
        if let Some(error) = &run.error {
            println!("    error: {}", error.message.dimmed());
        }
    }
    println!();

    let chain = match AuditTrail::verify_chain(&audit) {
        Ok(()) => "intact".green(),
        Err(e) => e.to_string().red(),
    };
    println!("{} {} entries, chain {}", "Audit:".bold(), audit.len(), chain);

    Ok(())
}

fn parse_lines(content: &str) -> Result<Vec<ReplayLine>> {
    let mut lines = Vec::new();
    for (n, raw) in content.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let line: ReplayLine =
            serde_json::from_str(raw).with_context(|| format!("Line {} is not a lifecycle event", n + 1))?;
        if line.event_type == AgentEventType::ToolCalled {
            bail!("Line {}: tool.called events cannot be replayed", n + 1);
        }
        lines.push(line);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

    #[test]
    fn test_parse_lines_skips_blanks_and_comments() {
        let content = format!(
            "# seed\n{{\"type\":\"task.created\",\"runId\":\"{RUN}\",\"payload\":{{\"domain\":\"events\"}}}}\n\n{{\"type\":\"run.failed\",\"runId\":\"{RUN}\",\"payload\":{{\"error\":\"x\"}}}}\n"
        );
        let lines = parse_lines(&content).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].event_type, AgentEventType::RunFailed);
    }

    #[test]
    fn test_parse_lines_rejects_tool_calls_and_garbage() {
        let tool = format!("{{\"type\":\"tool.called\",\"runId\":\"{RUN}\",\"payload\":{{}}}}");
        assert!(parse_lines(&tool).is_err());
        assert!(parse_lines("{not json").is_err());
    }

    #[tokio::test]
    async fn test_replay_with_duplicates_converges() {
        let run: RunId = RunId::parse(RUN).unwrap();
        let mut orchestrator = EmbeddedOrchestrator::new(&OrchestratorConfig::default()).await.unwrap();
        orchestrator.start().await.unwrap();
        orchestrator
            .create_run(run, "planner", "p1", "events", serde_json::json!({}))
            .await
            .unwrap();

        let update = AgentEvent::for_run(
            AgentEventType::TaskUpdated,
            run,
            serde_json::json!({"task": {"id": "t1", "name": "search", "status": "running"}}),
        );
        orchestrator.publish(update.clone()).await.unwrap();
        orchestrator.publish(update).await.unwrap();

        let (runs, audit) = orchestrator.finish().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1.tasks.len(), 1);
        assert_eq!(runs[0].1.status, RunStatus::Pending);
        // task.created + one task.updated
        assert_eq!(audit.len(), 2);
        assert!(AuditTrail::verify_chain(&audit).is_ok());
    }
}
