// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Role-Scoped Tool Manifests
//!
//! A [`ToolManifest`] is the read-only set of SQL-template tools a given
//! [`Role`] may call through the gateway. Manifests are loaded once at
//! startup (see `infrastructure::manifest_loader`) and shared behind an
//! `Arc` afterwards.
//!
//! ```yaml
//! role: authenticated
//! tools:
//!   - name: list_bookings
//!     description: Bookings for a venue after a date
//!     template: >
//!       select * from bookings
//!       where venue_id = :venue_id and starts_on >= :from
//!     params:
//!       - { name: venue_id, type: uuid, required: true }
//!       - { name: from, type: date }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::domain::template::{placeholders, TemplateError};

/// Fixed set of roles a caller may act under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anon,
    Authenticated,
    ServiceRole,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Anon, Role::Authenticated, Role::ServiceRole];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Anon => "anon",
            Role::Authenticated => "authenticated",
            Role::ServiceRole => "service_role",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("role '{s}' is not one of anon, authenticated, service_role"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Uuid,
    String,
    Number,
    Date,
    Timestamp,
    Jsonb,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamKind::Uuid => "uuid",
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Date => "date",
            ParamKind::Timestamp => "timestamp",
            ParamKind::Jsonb => "jsonb",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
}

impl SqlTool {
    /// Lowercased first token of the template (`select`, `insert`, `with`...).
    pub fn verb(&self) -> String {
        resource_verb(&self.template)
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Static checks run at load time.
    pub fn check(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::InvalidTool {
                tool: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        if self.verb().is_empty() {
            return Err(ManifestError::InvalidTool {
                tool: self.name.clone(),
                reason: "template is empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for decl in &self.params {
            if !seen.insert(decl.name.as_str()) {
                return Err(ManifestError::InvalidTool {
                    tool: self.name.clone(),
                    reason: format!("parameter '{}' declared twice", decl.name),
                });
            }
        }

        for name in placeholders(&self.template).map_err(|e| ManifestError::Template {
            tool: self.name.clone(),
            source: e,
        })? {
            if !seen.contains(name.as_str()) {
                return Err(ManifestError::InvalidTool {
                    tool: self.name.clone(),
                    reason: format!("placeholder ':{name}' is not a declared parameter"),
                });
            }
        }
        Ok(())
    }
}

/// Lowercased leading keyword of a SQL template.
pub fn resource_verb(template: &str) -> String {
    template
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolManifest {
    pub role: Role,
    #[serde(default)]
    pub tools: Vec<SqlTool>,
}

impl ToolManifest {
    pub fn tool(&self, name: &str) -> Option<&SqlTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn check(&self) -> Result<(), ManifestError> {
        let mut names = HashSet::new();
        for tool in &self.tools {
            if !names.insert(tool.name.as_str()) {
                return Err(ManifestError::DuplicateTool {
                    role: self.role,
                    tool: tool.name.clone(),
                });
            }
            tool.check()?;
        }
        Ok(())
    }
}

/// Read-only role → manifest table.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    manifests: HashMap<Role, ToolManifest>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, manifest: ToolManifest) -> Result<(), ManifestError> {
        manifest.check()?;
        self.manifests.insert(manifest.role, manifest);
        Ok(())
    }

    pub fn get(&self, role: Role) -> Option<&ToolManifest> {
        self.manifests.get(&role)
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.manifests.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("tool '{tool}' appears twice in the {role} manifest")]
    DuplicateTool { role: Role, tool: String },

    #[error("tool '{tool}' is invalid: {reason}")]
    InvalidTool { tool: String, reason: String },

    #[error("tool '{tool}' has a malformed template: {source}")]
    Template {
        tool: String,
        #[source]
        source: TemplateError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(template: &str, params: &[(&str, ParamKind, bool)]) -> SqlTool {
        SqlTool {
            name: "t".to_string(),
            description: String::new(),
            template: template.to_string(),
            params: params
                .iter()
                .map(|(n, k, r)| ParamDecl { name: n.to_string(), kind: *k, required: *r })
                .collect(),
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("service_role".parse::<Role>().unwrap(), Role::ServiceRole);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_verb_is_first_token() {
        assert_eq!(resource_verb("  SELECT * from x"), "select");
        assert_eq!(resource_verb("\ninsert into x values (:a)"), "insert");
        assert_eq!(resource_verb("(select 1)"), "select");
        assert_eq!(resource_verb(""), "");
    }

    #[test]
    fn test_check_rejects_undeclared_placeholder() {
        let t = tool("select * from v where id = :id and x = :x", &[("id", ParamKind::Uuid, true)]);
        assert!(matches!(t.check(), Err(ManifestError::InvalidTool { .. })));
    }

    #[test]
    fn test_check_rejects_duplicate_param() {
        let t = tool(
            "select :a",
            &[("a", ParamKind::String, true), ("a", ParamKind::Number, false)],
        );
        assert!(t.check().is_err());
    }

    #[test]
    fn test_manifest_yaml_shape() {
        let yaml = r#"
role: authenticated
tools:
  - name: list_bookings
    template: select * from bookings where venue_id = :venue_id
    params:
      - { name: venue_id, type: uuid, required: true }
"#;
        let manifest: ToolManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.role, Role::Authenticated);
        assert_eq!(manifest.tools[0].params[0].kind, ParamKind::Uuid);
        assert!(manifest.check().is_ok());
    }
}
