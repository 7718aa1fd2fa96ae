// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool Manifest YAML Loader
//!
//! Reads one manifest per role from a directory of `<role>.yaml` files and
//! checks every tool before the gateway sees it: placeholders must be
//! declared, names unique and the verb derivable.
//!
//! ```text
//! manifests/
//! ├── anon.yaml
//! ├── authenticated.yaml
//! └── service_role.yaml
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::domain::manifest::{ManifestSet, Role, ToolManifest};

pub struct ManifestLoader;

impl ManifestLoader {
    pub fn parse_yaml(yaml: &str) -> Result<ToolManifest> {
        let manifest: ToolManifest = serde_yaml::from_str(yaml).context("Failed to parse YAML manifest")?;
        manifest
            .check()
            .map_err(|e| anyhow!("Manifest validation failed: {}", e))?;
        Ok(manifest)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ToolManifest> {
        let yaml = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read manifest file: {:?}", path.as_ref()))?;
        Self::parse_yaml(&yaml).with_context(|| format!("Invalid manifest: {:?}", path.as_ref()))
    }

    /// Load every `<role>.yaml` / `<role>.yml` in `dir`. Files whose stem is
    /// not a known role are skipped; a file whose `role:` disagrees with its
    /// name is an error.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<ManifestSet> {
        let dir = dir.as_ref();
        let mut set = ManifestSet::new();

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read manifest directory: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        paths.sort();

        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(role) = stem.parse::<Role>() else {
                debug!(path = ?path, "Skipping file that does not name a role");
                continue;
            };
            let manifest = Self::parse_file(&path)?;
            if manifest.role != role {
                bail!(
                    "Manifest {:?} declares role '{}' but is named for '{}'",
                    path,
                    manifest.role,
                    role
                );
            }
            if set.get(role).is_some() {
                bail!("Role '{}' has more than one manifest file in {:?}", role, dir);
            }
            info!(role = %role, tools = manifest.tools.len(), "Loaded tool manifest");
            set.insert(manifest).map_err(|e| anyhow!("{}", e))?;
        }

        Ok(set)
    }
}
