//! Configuration management for NexusAgent
//!
//! Configuration is loaded from `~/.nexus-agent/config.json` with environment
//! variable overrides. The loaded `Config` is passed explicitly to every
//! component that needs it.

mod types;
pub mod validate;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the NexusAgent configuration directory path (~/.nexus-agent)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nexus-agent")
    }

    /// Returns the path to the config file (~/.nexus-agent/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: NEXUS_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Agent
        if let Some(val) = lookup("NEXUS_AGENT_NAME") {
            self.agent.name = val;
        }
        if let Some(val) = lookup("NEXUS_AGENT_DATA_DIR") {
            self.agent.data_dir = val;
        }
        if let Some(v) = lookup("NEXUS_AGENT_UTC_OFFSET_HOURS").and_then(|v| v.parse().ok()) {
            self.agent.utc_offset_hours = v;
        }
        if let Some(v) = lookup("NEXUS_AGENT_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.agent.max_tokens = v;
        }

        // Bus
        if let Some(v) = lookup("NEXUS_BUS_HISTORY_SIZE").and_then(|v| v.parse().ok()) {
            self.bus.history_size = v;
        }

        // Plugins
        if let Some(val) = lookup("NEXUS_PLUGINS_DIR") {
            self.plugins.dir = val;
        }
        if let Some(v) = lookup("NEXUS_PLUGINS_HOT_RELOAD").and_then(|v| v.parse().ok()) {
            self.plugins.hot_reload = v;
        }

        // Logging
        if let Some(val) = lookup("NEXUS_LOG_LEVEL") {
            self.logging.level = val;
        }

        self.apply_provider_overrides(&lookup);
    }

    /// Apply provider-specific overrides
    fn apply_provider_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("NEXUS_PROVIDERS_DEFAULT") {
            self.providers.default = Some(val);
        }

        // OpenAI
        if let Some(val) = lookup("NEXUS_PROVIDERS_OPENAI_API_KEY") {
            let provider = self
                .providers
                .openai
                .get_or_insert_with(ProviderConfig::default);
            provider.api_key = Some(val);
        }
        if let Some(val) = lookup("NEXUS_PROVIDERS_OPENAI_API_BASE") {
            let provider = self
                .providers
                .openai
                .get_or_insert_with(ProviderConfig::default);
            provider.api_base = Some(val);
        }
        if let Some(val) = lookup("NEXUS_PROVIDERS_OPENAI_MODEL") {
            let provider = self
                .providers
                .openai
                .get_or_insert_with(ProviderConfig::default);
            provider.model = Some(val);
        }

        // Ollama
        if let Some(val) = lookup("NEXUS_PROVIDERS_OLLAMA_API_BASE") {
            let provider = self
                .providers
                .ollama
                .get_or_insert_with(ProviderConfig::default);
            provider.api_base = Some(val);
        }
        if let Some(val) = lookup("NEXUS_PROVIDERS_OLLAMA_MODEL") {
            let provider = self
                .providers
                .ollama
                .get_or_insert_with(ProviderConfig::default);
            provider.model = Some(val);
        }
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the expanded profile data directory (resolves ~ to home directory)
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.agent.data_dir)
    }

    /// Returns the expanded plugin directory (resolves ~ to home directory)
    pub fn plugins_path(&self) -> PathBuf {
        expand_home(&self.plugins.dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.name, "NexusAgent");
        assert_eq!(config.agent.history_limit, 50);
        assert_eq!(config.agent.context_turns, 20);
        assert_eq!(config.agent.utc_offset_hours, -3);
        assert_eq!(config.bus.history_size, 1000);
        assert_eq!(config.plugins.dir, "plugins");
        assert!(config.providers.default.is_none());
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"agent": {"name": "Nexo"}, "bus": {"history_size": 5}}"#)
                .unwrap();
        assert_eq!(config.agent.name, "Nexo");
        assert_eq!(config.agent.history_limit, 50);
        assert_eq!(config.bus.history_size, 5);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.agent.max_tokens, 4096);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.plugins.dir = "/opt/nexus/plugins".to_string();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.plugins.dir, "/opt/nexus/plugins");
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("NEXUS_PROVIDERS_DEFAULT", "ollama"),
            ("NEXUS_PROVIDERS_OLLAMA_MODEL", "deepseek-r1:14b"),
            ("NEXUS_PROVIDERS_OPENAI_API_KEY", "sk-test"),
            ("NEXUS_BUS_HISTORY_SIZE", "64"),
            ("NEXUS_AGENT_UTC_OFFSET_HOURS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.providers.default.as_deref(), Some("ollama"));
        assert_eq!(
            config.providers.ollama.unwrap().model.as_deref(),
            Some("deepseek-r1:14b")
        );
        assert_eq!(
            config.providers.openai.unwrap().api_key.as_deref(),
            Some("sk-test")
        );
        assert_eq!(config.bus.history_size, 64);
        // Unparseable values leave the default untouched
        assert_eq!(config.agent.utc_offset_hours, -3);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/data"), home.join("data"));
        }
    }
}
