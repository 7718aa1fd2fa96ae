// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use agentrun_core::domain::orchestrator_config::OrchestratorConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a default configuration file
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./agentrun-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AGENTRUN_CONFIG_PATH: {}",
            std::env::var("AGENTRUN_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./agentrun-config.yaml");
        println!("  4. ~/.agentrun/config.yaml");
        println!("  5. /etc/agentrun/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{} {}", "Configuration:".bold(), config.metadata.name);
    println!();

    println!("{}", "Persistence:".bold());
    match &spec.database.url {
        Some(_) => println!("  Database: {}", "postgres (url set)".green()),
        None => println!("  Database: {}", "in-memory".yellow()),
    }
    println!();

    println!("{}", "Gateway:".bold());
    println!(
        "  Manifests: {}",
        spec.gateway
            .manifest_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    let mut roles: Vec<_> = spec.gateway.credentials.keys().collect();
    roles.sort();
    for role in roles {
        // Only the reference kind is shown, never the value
        let kind = match spec.gateway.credentials.get(role).map(String::as_str) {
            Some(r) if r.starts_with("env:") => r.to_string(),
            _ => "literal".to_string(),
        };
        println!("  Credential {}: {}", role.to_string().bold(), kind);
    }
    if let Some(ms) = spec.gateway.statement_timeout_ms {
        println!("  Statement timeout: {} ms", ms);
    }
    println!();

    println!("{}", "Runs:".bold());
    println!(
        "  Domain schemas: {}",
        spec.runs
            .domain_schema_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("  List limit: {}", spec.runs.list_limit);
    println!("  Queue capacity: {}", spec.queue.capacity);
    println!();

    println!("{}", "Audit:".bold());
    println!("  Redaction marker: {}", spec.audit.redaction_marker);
    println!("  Extra PII patterns: {}", spec.audit.pii_patterns.len());
    if let Some(vector) = &spec.vector_index {
        println!("  Vector index: {}", vector.endpoint);
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let yaml = OrchestratorConfig::default().to_yaml()?;

    std::fs::write(&output, yaml).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
