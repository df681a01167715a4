//! Configuration type definitions for NexusAgent
//!
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a partial `config.json` only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::orchestrator::CapabilityCatalog;

/// Main configuration struct for NexusAgent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Orchestration engine settings (identity, time, history caps, sampling)
    pub agent: AgentConfig,
    /// Event bus settings
    pub bus: BusConfig,
    /// Plugin discovery settings
    pub plugins: PluginsConfig,
    /// Completion provider configurations
    pub providers: ProvidersConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Capability catalogue override for the planner. `None` uses the built-in one.
    pub catalog: Option<CapabilityCatalog>,
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Orchestration engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity used in the planner preamble.
    pub name: String,
    /// Timezone label shown to the planner.
    pub timezone: String,
    /// Fixed UTC offset (hours) used to render the live date/time.
    pub utc_offset_hours: i32,
    /// Turns kept per channel.
    pub history_limit: usize,
    /// Most recent turns sent to the model with each instruction.
    pub context_turns: usize,
    /// Sampling temperature for the first planning attempt.
    pub planner_temperature: f32,
    /// Sampling temperature for the retry after an empty completion.
    pub retry_temperature: f32,
    /// Sampling temperature for result synthesis.
    pub synthesis_temperature: f32,
    /// Token cap for every completion request.
    pub max_tokens: u32,
    /// Maximum terms in a fallback search query.
    pub query_term_limit: usize,
    /// Directory holding `agent_profile.md` and `user_profile.md`.
    pub data_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "NexusAgent".to_string(),
            timezone: "America/Argentina/Buenos_Aires".to_string(),
            utc_offset_hours: -3,
            history_limit: 50,
            context_turns: 20,
            planner_temperature: 0.3,
            retry_temperature: 0.5,
            synthesis_temperature: 0.5,
            max_tokens: 4096,
            query_term_limit: 8,
            data_dir: "~/.nexus-agent/data".to_string(),
        }
    }
}

// ============================================================================
// Bus Configuration
// ============================================================================

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of events kept in the history ring.
    pub history_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { history_size: 1000 }
    }
}

// ============================================================================
// Plugin Configuration
// ============================================================================

/// Plugin discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for plugin manifests.
    pub dir: String,
    /// Whether plugins may be reloaded while running.
    pub hot_reload: bool,
    /// Configuration object injected into every discovered plugin.
    pub config: Map<String, Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: "plugins".to_string(),
            hot_reload: true,
            config: Map::new(),
        }
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Completion provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Name of the default provider. Falls back to the first configured one.
    pub default: Option<String>,
    /// OpenAI chat-completions endpoint
    pub openai: Option<ProviderConfig>,
    /// Local Ollama endpoint (OpenAI-compatible)
    pub ollama: Option<ProviderConfig>,
}

/// Configuration for a single completion provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (Ollama ignores it)
    pub api_key: Option<String>,
    /// Base URL override
    pub api_base: Option<String>,
    /// Model override
    pub model: Option<String>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// Compact single-line output with component fields.
    #[default]
    Component,
    /// JSON lines for log aggregators.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Optional file to append log lines to.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
