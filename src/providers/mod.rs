//! Providers module - completion backends (OpenAI, Ollama, ...)
//!
//! This module defines the `LLMProvider` trait the orchestrator plans and
//! synthesizes with, an OpenAI-compatible HTTP implementation and a
//! `ProviderRouter` that selects among named providers.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nexus_agent::providers::{ChatMessage, ChatOptions, OpenAIProvider, ProviderRouter};
//!
//! async fn example() {
//!     let mut router = ProviderRouter::new();
//!     router.add_provider(Arc::new(OpenAIProvider::ollama("http://localhost:11434")), true);
//!
//!     let response = router
//!         .complete(vec![ChatMessage::user("Hola!")], None, ChatOptions::new())
//!         .await
//!         .unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

pub mod openai;
mod router;
mod types;

pub use openai::OpenAIProvider;
pub use router::ProviderRouter;
pub use types::{
    ChatMessage, ChatOptions, LLMProvider, LLMResponse, Role, StreamEvent, Usage,
};
