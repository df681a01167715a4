//! Logging initialization for NexusAgent.
//!
//! Supports three formats:
//! - `pretty`: multi-line tracing output with colours
//! - `component`: `[timestamp] [LEVEL] target message {fields}` on one line;
//!   use the [`log_component!`] macro to add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators
//!
//! Event names on the standard fields follow the dotted scheme used by the bus
//! (`event.handler_error`, `plugin.loaded`, `orchestrator.plan_failed`).

use std::fs::{File, OpenOptions};
use std::sync::Arc;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{NexusError, Result};

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted. A second
/// call is ignored. Falls back to `RUST_LOG` env var; if unset, uses `cfg.level`.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let file = cfg.file.as_deref().map(open_log_file).transpose()?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    // try_init fails only when a subscriber is already installed
    let _ = match (cfg.format, file) {
        (LogFormat::Json, Some(file)) => builder.json().with_writer(file).try_init(),
        (LogFormat::Json, None) => builder.json().try_init(),
        (LogFormat::Pretty, Some(file)) => builder.pretty().with_writer(file).try_init(),
        (LogFormat::Pretty, None) => builder.pretty().try_init(),
        (LogFormat::Component, Some(file)) => builder.compact().with_writer(file).try_init(),
        (LogFormat::Component, None) => builder.compact().try_init(),
    };

    Ok(())
}

fn open_log_file(path: &str) -> Result<Arc<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| NexusError::Config(format!("cannot open log file '{}': {}", path, e)))?;
    Ok(Arc::new(file))
}

/// Emit a component-tagged tracing event.
///
/// Works with any tracing level (`trace`, `debug`, `info`, `warn`, `error`).
/// The `component` field makes it easy to grep logs by subsystem:
///
/// ```
/// # use nexus_agent::log_component;
/// log_component!(info, "bus", "event emitted");
/// log_component!(warn, "plugins", "dependency missing", plugin = "weather", missing = "http");
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_deserialize_json() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");
    }

    #[test]
    fn test_log_format_partial_config_uses_defaults() {
        let cfg: LoggingConfig = serde_json::from_str(r#"{"format":"pretty"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert_eq!(cfg.level, "info");
        assert!(cfg.file.is_none());
    }

    #[test]
    fn test_open_log_file_bad_path() {
        let err = open_log_file("/nonexistent-dir/nested/nexus.log").unwrap_err();
        assert!(err.to_string().contains("cannot open log file"));
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            format: LogFormat::Json,
            level: "warn".to_string(),
            file: Some(dir.path().join("nexus.log").display().to_string()),
        };
        init_logging(&cfg).unwrap();
        init_logging(&cfg).unwrap();
        log_component!(warn, "tests", "logging initialised", attempt = 2u32);
    }
}
