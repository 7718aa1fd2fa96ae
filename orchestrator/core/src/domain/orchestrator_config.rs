// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Run/audit persistence (PostgreSQL or in-memory)
// - Gateway manifests, role credentials and statement timeout
// - Domain output schemas and run listing limits
// - Event queue sizing
// - Audit redaction rules
// - Optional vector index for task embeddings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::manifest::Role;
use crate::domain::redaction::{PatternPredicate, Redactor, DEFAULT_REDACTION_MARKER};

pub const API_VERSION: &str = "agentrun/v1";
pub const KIND: &str = "OrchestratorConfig";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: OrchestratorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSpec {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub runs: RunsConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_index: Option<VectorIndexConfig>,
}

/// No URL means in-memory repositories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<PathBuf>,

    /// Role → credential reference (`env:VAR` or a literal).
    #[serde(default)]
    pub credentials: HashMap<Role, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_schema_dir: Option<PathBuf>,

    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_redaction_marker")]
    pub redaction_marker: String,

    /// Extra regexes; matching string values are redacted in addition to
    /// email-shaped strings.
    #[serde(default)]
    pub pii_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the env var holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_list_limit() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_redaction_marker() -> String {
    DEFAULT_REDACTION_MARKER.to_string()
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            domain_schema_dir: None,
            list_limit: default_list_limit(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            redaction_marker: default_redaction_marker(),
            pii_patterns: Vec::new(),
        }
    }
}

impl AuditConfig {
    /// Redactor with the built-in email predicate plus `pii_patterns`.
    pub fn build_redactor(&self) -> anyhow::Result<Redactor> {
        let redactor = Redactor::new(self.redaction_marker.clone());
        if self.pii_patterns.is_empty() {
            return Ok(redactor);
        }
        let patterns = PatternPredicate::new(&self.pii_patterns)
            .map_err(|e| anyhow::anyhow!("Invalid PII pattern: {}", e))?;
        Ok(redactor.with_predicate(patterns))
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ConfigMetadata {
                name: "agentrun".to_string(),
                labels: None,
            },
            spec: OrchestratorSpec::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. AGENTRUN_CONFIG_PATH environment variable
    /// 2. ./agentrun-config.yaml (working directory)
    /// 3. ~/.agentrun/config.yaml (user home)
    /// 4. /etc/agentrun/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AGENTRUN_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./agentrun-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".agentrun").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/agentrun/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Environment variables win over the file so container deployments
    /// can override without rewriting it.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AGENTRUN_DATABASE_URL") {
            if !url.is_empty() {
                tracing::info!("Environment override: AGENTRUN_DATABASE_URL");
                self.spec.database.url = Some(url);
            }
        }

        if let Ok(dir) = std::env::var("AGENTRUN_MANIFEST_DIR") {
            if !dir.is_empty() {
                tracing::info!("Environment override: AGENTRUN_MANIFEST_DIR={}", dir);
                self.spec.gateway.manifest_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(marker) = std::env::var("AGENTRUN_REDACTION_MARKER") {
            if marker.is_empty() {
                tracing::warn!("Ignoring empty AGENTRUN_REDACTION_MARKER");
            } else {
                self.spec.audit.redaction_marker = marker;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if let Some(url) = &self.spec.database.url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("spec.database.url must be a postgres:// URL");
            }
        }

        for (role, reference) in &self.spec.gateway.credentials {
            if reference.trim().is_empty() || reference.trim() == "env:" {
                anyhow::bail!("Credential reference for role '{}' is empty", role);
            }
        }

        if self.spec.gateway.statement_timeout_ms == Some(0) {
            anyhow::bail!("spec.gateway.statement_timeout_ms must be greater than zero");
        }

        if self.spec.runs.list_limit == 0 {
            anyhow::bail!("spec.runs.list_limit must be greater than zero");
        }

        if self.spec.queue.capacity == 0 {
            anyhow::bail!("spec.queue.capacity must be greater than zero");
        }

        if self.spec.audit.redaction_marker.is_empty() {
            anyhow::bail!("spec.audit.redaction_marker cannot be empty");
        }

        for pattern in &self.spec.audit.pii_patterns {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid PII pattern '{}': {}", pattern, e))?;
        }

        if let Some(vector) = &self.spec.vector_index {
            if vector.endpoint.is_empty() {
                anyhow::bail!("spec.vector_index.endpoint cannot be empty");
            }
        }

        Ok(())
    }
}
