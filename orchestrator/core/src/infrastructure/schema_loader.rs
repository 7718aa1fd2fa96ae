// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Loads per-domain final output schemas (`<domain>.json`) into a
//! [`DomainSchemaRegistry`].

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing::info;

use crate::domain::schema::DomainSchemaRegistry;

pub fn load_domain_schemas<P: AsRef<Path>>(dir: P, registry: &DomainSchemaRegistry) -> Result<usize> {
    let dir = dir.as_ref();
    let mut loaded = 0;

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read schema directory: {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    for path in paths {
        let Some(domain) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read schema: {:?}", path))?;
        let schema: serde_json::Value =
            serde_json::from_str(&raw).with_context(|| format!("Schema is not valid JSON: {:?}", path))?;
        registry
            .register(domain, &schema)
            .map_err(|e| anyhow!("Schema for domain '{}' rejected: {}", domain, e))?;
        info!(domain, "Registered domain output schema");
        loaded += 1;
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_loads_json_files_by_domain() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("events.json"),
            r#"{"type": "object", "required": ["title"]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let registry = DomainSchemaRegistry::new();
        assert_eq!(load_domain_schemas(dir.path(), &registry).unwrap(), 1);
        assert!(registry.validate("events", &json!({"title": "Gala"})).is_ok());
        assert!(registry.validate("events", &json!({})).is_err());
    }

    #[test]
    fn test_invalid_schema_fails_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), r#"{"type": 7}"#).unwrap();
        assert!(load_domain_schemas(dir.path(), &DomainSchemaRegistry::new()).is_err());
    }
}
