//! Error types for NexusAgent
//!
//! This module defines all error types used throughout the runtime.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for NexusAgent operations.
#[derive(Error, Debug)]
pub enum NexusError {
    /// Configuration-related errors (invalid config, unreadable file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Completion provider errors (API failures, malformed responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// A completion provider was requested by name but never registered.
    #[error("Provider '{name}' not registered. Available: {available:?}")]
    ProviderNotFound {
        /// The requested provider name
        name: String,
        /// Names of every registered provider
        available: Vec<String>,
    },

    /// Plugin lifecycle errors (unknown factory, failed `on_load`, bad manifest)
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// An event handler failed while processing an event.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Profile persistence errors
    #[error("Profile error: {0}")]
    Profile(String),

    /// Resource not found (plugins, documents, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML manifest parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for NexusAgent operations.
pub type Result<T> = std::result::Result<T, NexusError>;
