// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! JSON Schema helpers and the per-domain final-output schema registry.

use jsonschema::Validator;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema does not compile: {0}")]
    Invalid(String),

    #[error("unknown domain '{0}'")]
    UnknownDomain(String),

    #[error("{0}")]
    Mismatch(String),
}

/// A schema compiled once and reused for every validation.
#[derive(Clone)]
pub struct CompiledSchema {
    source: Value,
    validator: Arc<Validator>,
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| SchemaError::Invalid(e.to_string()))?;
        Ok(Self {
            source: schema.clone(),
            validator: Arc::new(validator),
        })
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn validate(&self, instance: &Value) -> Result<(), SchemaError> {
        self.validator
            .validate(instance)
            .map_err(|e| SchemaError::Mismatch(e.to_string()))
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").field("source", &self.source).finish()
    }
}

/// Domain name → final output schema. Consulted only when finalizing runs.
#[derive(Debug, Default)]
pub struct DomainSchemaRegistry {
    schemas: RwLock<HashMap<String, CompiledSchema>>,
}

impl DomainSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, domain: impl Into<String>, schema: &Value) -> Result<(), SchemaError> {
        let compiled = CompiledSchema::compile(schema)?;
        self.schemas.write().insert(domain.into(), compiled);
        Ok(())
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.schemas.read().contains_key(domain)
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.schemas.read().keys().cloned().collect();
        domains.sort();
        domains
    }

    pub fn validate(&self, domain: &str, output: &Value) -> Result<(), SchemaError> {
        let schema = self
            .schemas
            .read()
            .get(domain)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownDomain(domain.to_string()))?;
        schema.validate(output)
    }
}
