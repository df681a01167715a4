//! Plugin manifests and directory scanning.
//!
//! A plugin directory holds flat manifest files (`weather.json`,
//! `news.toml`) and one-level packages (`prices/plugin.json`). Each manifest
//! names the factory that builds the plugin plus optional config:
//!
//! ```toml
//! factory = "weather"
//!
//! [config]
//! units = "metric"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bus::Payload;
use crate::error::{NexusError, Result};

/// File names recognised as a package manifest, in lookup order.
pub const PACKAGE_MANIFESTS: [&str; 2] = ["plugin.json", "plugin.toml"];

/// Parsed plugin manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Key into the registry's factory table.
    pub factory: String,
    /// Config merged over the discovery config.
    #[serde(default)]
    pub config: Payload,
    /// Disabled manifests are skipped by discovery.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginManifest {
    /// Read a `.json` or `.toml` manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(NexusError::Plugin(format!(
                "unsupported manifest format: {}",
                path.display()
            ))),
        }
    }

    /// Discovery config with this manifest's config layered on top.
    pub fn merged_config(&self, base: &Payload) -> Payload {
        let mut merged = base.clone();
        for (key, value) in &self.config {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Lists manifest files under `dir` in load order.
///
/// Flat files come first (sorted, names starting with `_` skipped), then
/// package manifests of sorted subdirectories.
pub fn scan_manifests(dir: &Path) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&dir.display().to_string());
    let mut flat = Vec::new();
    for ext in ["json", "toml"] {
        let pattern = format!("{}/*.{}", escaped, ext);
        let entries = glob::glob(&pattern)
            .map_err(|e| NexusError::Plugin(format!("invalid scan pattern: {}", e)))?;
        for path in entries.flatten() {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('_'));
            if path.is_file() && !hidden {
                flat.push(path);
            }
        }
    }
    flat.sort();

    let mut packages: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    packages.sort();

    let package_manifests = packages.into_iter().filter_map(|pkg| {
        PACKAGE_MANIFESTS
            .iter()
            .map(|name| pkg.join(name))
            .find(|candidate| candidate.is_file())
    });

    flat.extend(package_manifests);
    Ok(flat)
}
