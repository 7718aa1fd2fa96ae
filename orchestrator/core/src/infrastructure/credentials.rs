// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Role Credential Resolvers
//!
//! Each gateway role maps to exactly one execution credential. The config
//! names credentials by reference, never inline secrets:
//!
//! ```yaml
//! credentials:
//!   anon: "env:AGENTRUN_ANON_DB_URL"
//!   service_role: "env:AGENTRUN_SERVICE_DB_URL"
//! ```
//!
//! A reference without the `env:` prefix is taken literally, which is only
//! meant for local development.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::collaborators::{Credential, CredentialError, CredentialResolver};
use crate::domain::manifest::Role;

/// Where a role's credential comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRef {
    /// Read from the orchestrator's environment at resolve time.
    Env(String),
    Literal(String),
}

impl CredentialRef {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("env:") {
            Some(var) => CredentialRef::Env(var.trim().to_string()),
            None => CredentialRef::Literal(raw.to_string()),
        }
    }
}

/// Fixed role → credential table. Used by tests and the CLI.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialResolver {
    credentials: HashMap<Role, Credential>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: Role, credential: impl Into<String>) -> Self {
        self.credentials.insert(role, Credential::new(credential));
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, role: Role) -> Result<Option<Credential>, CredentialError> {
        Ok(self.credentials.get(&role).cloned())
    }
}

/// Resolves [`CredentialRef`]s from the process environment on every call,
/// so rotated values are picked up without a restart.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialResolver {
    refs: HashMap<Role, CredentialRef>,
}

impl EnvCredentialResolver {
    pub fn new(refs: HashMap<Role, CredentialRef>) -> Self {
        Self { refs }
    }

    /// Build from the raw `spec.gateway.credentials` config map.
    pub fn from_config(raw: &HashMap<Role, String>) -> Self {
        Self::new(raw.iter().map(|(role, r)| (*role, CredentialRef::parse(r))).collect())
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, role: Role) -> Result<Option<Credential>, CredentialError> {
        match self.refs.get(&role) {
            None => Ok(None),
            Some(CredentialRef::Literal(value)) => Ok(Some(Credential::new(value.clone()))),
            Some(CredentialRef::Env(var)) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => Ok(Some(Credential::new(value))),
                Ok(_) | Err(std::env::VarError::NotPresent) => Err(CredentialError::Unset(var.clone())),
                Err(e) => Err(CredentialError::Store(format!("{var}: {e}"))),
            },
        }
    }
}
