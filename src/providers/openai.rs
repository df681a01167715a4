//! OpenAI-compatible Provider Implementation
//!
//! This module implements the `LLMProvider` trait for the OpenAI Chat
//! Completions API. The same client serves any compatible endpoint; Ollama
//! exposes one under `<base>/v1`.
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_agent::providers::{ChatMessage, ChatOptions, LLMProvider, OpenAIProvider};
//!
//! async fn example() {
//!     let provider = OpenAIProvider::ollama("http://localhost:11434");
//!
//!     let messages = vec![
//!         ChatMessage::system("Responde en español."),
//!         ChatMessage::user("Hola!"),
//!     ];
//!
//!     let response = provider
//!         .chat(messages, ChatOptions::new().with_temperature(0.3))
//!         .await
//!         .unwrap();
//!
//!     println!("{}: {}", response.model, response.content);
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{NexusError, Result};

use super::{ChatMessage, ChatOptions, LLMProvider, LLMResponse, StreamEvent, Usage};

/// The OpenAI API endpoint URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// The default OpenAI model to use.
const DEFAULT_MODEL: &str = "gpt-4o";

/// Default local Ollama server.
pub const OLLAMA_DEFAULT_BASE: &str = "http://localhost:11434";

/// The default Ollama model to use.
const OLLAMA_DEFAULT_MODEL: &str = "deepseek-r1:14b";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// OpenAI API Request Types
// ============================================================================

/// OpenAI API request body.
#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

// ============================================================================
// OpenAI API Response Types
// ============================================================================

/// OpenAI API response body.
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<OpenAIUsage> for Usage {
    fn from(u: OpenAIUsage) -> Self {
        Usage::new(u.prompt_tokens, u.completion_tokens)
    }
}

/// One server-sent chunk of a streaming response.
#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(default)]
    r#type: String,
}

// ============================================================================
// OpenAI Provider
// ============================================================================

/// OpenAI-compatible completion provider.
pub struct OpenAIProvider {
    /// Registry name ("openai", "ollama", ...)
    name: String,
    /// API key for authentication
    api_key: String,
    /// API base URL (without trailing slash)
    api_base: String,
    /// Model used when the request does not override it
    model: String,
    /// HTTP client for making requests
    client: Client,
}

impl OpenAIProvider {
    /// Create a provider for the public OpenAI endpoint.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::providers::{LLMProvider, OpenAIProvider};
    ///
    /// let provider = OpenAIProvider::new("sk-xxx");
    /// assert_eq!(provider.name(), "openai");
    /// assert_eq!(provider.default_model(), "gpt-4o");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, OPENAI_API_URL)
    }

    /// Create an OpenAI provider with a custom base URL (trailing slash removed).
    pub fn with_base_url(api_key: &str, api_base: &str) -> Self {
        Self {
            name: "openai".to_string(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            client: default_client(),
        }
    }

    /// Create a provider for a local Ollama server.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::providers::{LLMProvider, OpenAIProvider};
    ///
    /// let provider = OpenAIProvider::ollama("http://localhost:11434/");
    /// assert_eq!(provider.name(), "ollama");
    /// assert_eq!(provider.api_base(), "http://localhost:11434/v1");
    /// ```
    pub fn ollama(base_url: &str) -> Self {
        Self {
            name: "ollama".to_string(),
            // Ollama ignores the key but the header must be present
            api_key: "ollama".to_string(),
            api_base: format!("{}/v1", base_url.trim_end_matches('/')),
            model: OLLAMA_DEFAULT_MODEL.to_string(),
            client: default_client(),
        }
    }

    /// Override the default model.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Override the registry name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Use a custom HTTP client (timeouts, proxies, tests).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// The API base URL requests are sent to.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a ChatOptions,
        stream: bool,
    ) -> OpenAIRequest<'a> {
        OpenAIRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.as_deref(),
            stream,
        }
    }

    async fn send(&self, body: &OpenAIRequest<'_>) -> Result<reqwest::Response> {
        debug!(provider = %self.name, model = body.model, stream = body.stream, "provider.request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| NexusError::Provider(format!("{} request failed: {}", self.name, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(NexusError::Provider(describe_error(&self.name, status, &error_text)));
        }
        Ok(response)
    }
}

fn default_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn describe_error(provider: &str, status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<OpenAIErrorResponse>(body) {
        Ok(parsed) if parsed.error.r#type.is_empty() => format!(
            "{} API error ({}): {}",
            provider, status, parsed.error.message
        ),
        Ok(parsed) => format!(
            "{} API error ({}): {} - {}",
            provider, status, parsed.error.r#type, parsed.error.message
        ),
        Err(_) => format!("{} API error ({}): {}", provider, status, body),
    }
}

fn convert_response(provider: &str, response: OpenAIResponse) -> LLMResponse {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    let mut out = LLMResponse::text(content).from_model(provider, response.model);
    if let Some(usage) = response.usage {
        out = out.with_usage(usage.into());
    }
    out
}

/// Extract the JSON payload of an SSE `data:` line. `None` for other lines.
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(str::trim)
}

// ============================================================================
// LLMProvider Implementation
// ============================================================================

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<LLMResponse> {
        let body = self.request_body(&messages, &options, false);
        let response = self.send(&body).await?;

        let parsed: OpenAIResponse = response.json().await.map_err(|e| {
            NexusError::Provider(format!("Failed to parse {} response: {}", self.name, e))
        })?;

        info!(provider = %self.name, model = %parsed.model, "provider.response");
        Ok(convert_response(&self.name, parsed))
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = self.request_body(&messages, &options, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel::<StreamEvent>(32);
        let byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut assembled = String::new();
            let mut usage: Option<Usage> = None;
            let mut line_buffer = String::new();

            tokio::pin!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(NexusError::Provider(format!(
                                "Stream read error: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };

                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline_pos).collect();
                    let Some(data) = sse_data(line.trim()) else {
                        continue;
                    };

                    if data == "[DONE]" {
                        let _ = tx
                            .send(StreamEvent::Done {
                                content: assembled,
                                usage,
                            })
                            .await;
                        return;
                    }

                    let Ok(parsed) = serde_json::from_str::<OpenAIStreamChunk>(data) else {
                        continue;
                    };
                    if let Some(u) = parsed.usage {
                        usage = Some(u.into());
                    }
                    for choice in parsed.choices {
                        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                            assembled.push_str(&text);
                            if tx.send(StreamEvent::Delta(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            let _ = tx
                .send(StreamEvent::Done {
                    content: assembled,
                    usage,
                })
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_provider_creation() {
        let provider = OpenAIProvider::new("sk-test");
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.api_base(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let provider = OpenAIProvider::with_base_url("k", "https://my-api.com/v1/");
        assert_eq!(provider.api_base(), "https://my-api.com/v1");
    }

    #[test]
    fn test_ollama_defaults() {
        let provider = OpenAIProvider::ollama(OLLAMA_DEFAULT_BASE).with_model("llama3");
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.default_model(), "llama3");
        assert_eq!(provider.api_base(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_request_serialization() {
        let provider = OpenAIProvider::new("k");
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let options = ChatOptions::new().with_temperature(0.3).with_max_tokens(4096);
        let body = provider.request_body(&messages, &options, false);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
        assert_eq!(json["max_tokens"], 4096);
        assert!(json.get("stream").is_none());
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn test_request_model_override_and_stream_flag() {
        let provider = OpenAIProvider::new("k");
        let options = ChatOptions::new().with_model("gpt-4o-mini");
        let body = provider.request_body(&[], &options, true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_convert_response() {
        let raw = r#"{
            "model": "gpt-4o-2024",
            "choices": [{"message": {"role": "assistant", "content": "{\"steps\": []}"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let parsed: OpenAIResponse = serde_json::from_str(raw).unwrap();
        let response = convert_response("openai", parsed);
        assert_eq!(response.content, "{\"steps\": []}");
        assert_eq!(response.model, "gpt-4o-2024");
        assert_eq!(response.provider, "openai");
        assert_eq!(response.usage, Some(Usage::new(12, 4)));
    }

    #[test]
    fn test_convert_response_null_content_and_no_choices() {
        let null_content: OpenAIResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert_eq!(convert_response("ollama", null_content).content, "");

        let empty: OpenAIResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(convert_response("ollama", empty).content, "");
    }

    #[test]
    fn test_describe_error() {
        let status = reqwest::StatusCode::UNAUTHORIZED;
        let body = r#"{"error": {"message": "bad key", "type": "invalid_request_error"}}"#;
        assert_eq!(
            describe_error("openai", status, body),
            "openai API error (401 Unauthorized): invalid_request_error - bad key"
        );
        assert_eq!(
            describe_error("ollama", status, "plain failure"),
            "ollama API error (401 Unauthorized): plain failure"
        );
    }

    #[test]
    fn test_sse_data() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: message"), None);
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let chunk: OpenAIStreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hola"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hola"));
        assert!(chunk.usage.is_none());
    }
}
