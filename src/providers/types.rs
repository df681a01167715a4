//! Provider types for NexusAgent
//!
//! This module defines the completion capability used by the orchestrator:
//! the `LLMProvider` trait, chat messages, options and response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{NexusError, Result};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message sent to a completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an explicit role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::providers::{ChatMessage, Role};
    ///
    /// let msg = ChatMessage::system("Responde SOLO con JSON válido.");
    /// assert_eq!(msg.role, Role::System);
    /// ```
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Options for chat completion requests.
///
/// Use the builder pattern to construct options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Model override (uses the provider default if None)
    pub model: Option<String>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter
    pub top_p: Option<f32>,
    /// Stop sequences that halt generation
    pub stop: Option<Vec<String>>,
}

impl ChatOptions {
    /// Create new default chat options.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::providers::ChatOptions;
    ///
    /// let options = ChatOptions::new().with_temperature(0.3).with_max_tokens(4096);
    /// assert_eq!(options.temperature, Some(0.3));
    /// assert_eq!(options.max_tokens, Some(4096));
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model to use for this request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for sampling.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the top_p (nucleus sampling) parameter.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set stop sequences that will halt generation.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Token usage information from a completion request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub input_tokens: u32,
    /// Number of tokens in the completion
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used (prompt + completion)
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Response from a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Text content of the response (may be empty)
    pub content: String,
    /// Model that produced the response
    pub model: String,
    /// Provider that served the request
    pub provider: String,
    /// Token usage information (if available)
    pub usage: Option<Usage>,
}

impl LLMResponse {
    /// Create a plain text response.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::providers::LLMResponse;
    ///
    /// let response = LLMResponse::text("Hola!");
    /// assert_eq!(response.content, "Hola!");
    /// assert!(response.usage.is_none());
    /// ```
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: String::new(),
            provider: String::new(),
            usage: None,
        }
    }

    /// Set the model and provider fields.
    pub fn from_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    /// Set usage information for this response.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Incremental output of a streaming completion.
#[derive(Debug)]
pub enum StreamEvent {
    /// A chunk of generated text
    Delta(String),
    /// Generation finished; `content` is the full assembled text
    Done {
        content: String,
        usage: Option<Usage>,
    },
    /// The stream failed mid-way
    Error(NexusError),
}

/// Trait for completion providers (OpenAI, Ollama, ...).
///
/// Implement this trait to add support for a new text-generation backend.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name (e.g., "openai", "ollama")
    fn name(&self) -> &str;

    /// Model used when `ChatOptions::model` is None.
    fn default_model(&self) -> &str;

    /// Send a chat completion request.
    async fn chat(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<LLMResponse>;

    /// Streaming variant of [`LLMProvider::chat`].
    ///
    /// The default implementation calls `chat` and emits a single
    /// [`StreamEvent::Done`].
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self.chat(messages, options).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(StreamEvent::Done {
                content: response.content,
                usage: response.usage,
            })
            .await;
        Ok(rx)
    }
}
