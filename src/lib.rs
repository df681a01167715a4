//! NexusAgent - modular agent runtime
//!
//! Three pieces cooperate over one shared [`EventBus`]:
//!
//! - [`bus`]: topic-based publish/subscribe with wildcards, priorities,
//!   middleware and a bounded history
//! - [`plugins`]: plugin discovery, registration, reload and shutdown
//! - [`orchestrator`]: turns an instruction into a plan of bus events and a
//!   synthesized reply using an [`LLMProvider`](providers::LLMProvider)

pub mod bus;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod plugins;
pub mod profile;
pub mod providers;
pub mod utils;

pub use bus::{Event, EventBus, Payload};
pub use config::Config;
pub use error::{NexusError, Result};
pub use orchestrator::{Orchestrator, TaskResult};
pub use plugins::{Capability, Plugin, PluginRegistry};
pub use providers::{ChatMessage, ChatOptions, LLMProvider, LLMResponse};
