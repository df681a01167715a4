//! Config command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use nexus_agent::config::validate::{validate_config, DiagnosticLevel};

use super::common::load_config;
use super::ConfigAction;

/// Validate or print configuration.
pub(crate) async fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => {
            println!("Config file: {}", config_path.display());

            if !config_path.exists() {
                println!("[OK] No config file found (using defaults)");
                return Ok(());
            }

            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;

            let raw: serde_json::Value = match serde_json::from_str(&content) {
                Ok(v) => v,
                Err(e) => {
                    println!("[ERROR] Invalid JSON: {}", e);
                    return Ok(());
                }
            };

            let diagnostics = validate_config(&raw);
            for diag in &diagnostics {
                println!("{}", diag);
            }

            let errors = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Error)
                .count();
            let warnings = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Warn)
                .count();

            if errors == 0 && warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s), {} warning(s)", errors, warnings);
            }
        }
        ConfigAction::Show => {
            let mut config = load_config(config_path)?;
            for provider in [&mut config.providers.openai, &mut config.providers.ollama]
                .into_iter()
                .flatten()
            {
                if provider.api_key.is_some() {
                    provider.api_key = Some("***".to_string());
                }
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
