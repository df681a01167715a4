//! Named provider registry with a default selection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::ProvidersConfig;
use crate::error::{NexusError, Result};

use super::openai::OpenAIProvider;
use super::{ChatMessage, ChatOptions, LLMProvider, LLMResponse, StreamEvent};

/// Routes completion requests to one of several named providers.
///
/// The first provider added becomes the default unless a later one is added
/// with `default = true`. The router is itself an [`LLMProvider`] that
/// delegates to the default provider.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use nexus_agent::providers::{OpenAIProvider, ProviderRouter};
///
/// let mut router = ProviderRouter::new();
/// router.add_provider(Arc::new(OpenAIProvider::new("sk-xxx")), false);
/// router.add_provider(Arc::new(OpenAIProvider::ollama("http://localhost:11434")), true);
///
/// assert_eq!(router.default_name(), Some("ollama"));
/// assert!(router.get_provider(Some("anthropic")).is_err());
/// ```
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    order: Vec<String>,
    default: Option<String>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a router from the `providers` config section.
    ///
    /// OpenAI is added when an API key is configured; Ollama whenever its
    /// section is present. A configured default must name one of them.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let mut router = Self::new();

        if let Some(openai) = &config.openai {
            if let Some(key) = openai.api_key.as_deref().filter(|k| !k.is_empty()) {
                let mut provider = match openai.api_base.as_deref() {
                    Some(base) => OpenAIProvider::with_base_url(key, base),
                    None => OpenAIProvider::new(key),
                };
                if let Some(model) = &openai.model {
                    provider = provider.with_model(model);
                }
                router.add_provider(Arc::new(provider), false);
            }
        }

        if let Some(ollama) = &config.ollama {
            let base = ollama
                .api_base
                .as_deref()
                .unwrap_or(super::openai::OLLAMA_DEFAULT_BASE);
            let mut provider = OpenAIProvider::ollama(base);
            if let Some(model) = &ollama.model {
                provider = provider.with_model(model);
            }
            router.add_provider(Arc::new(provider), false);
        }

        if let Some(name) = &config.default {
            router.set_default(name)?;
        }

        Ok(router)
    }

    /// Register a provider under its own name. Replaces a provider with the same name.
    pub fn add_provider(&mut self, provider: Arc<dyn LLMProvider>, default: bool) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        if default || self.default.is_none() {
            self.default = Some(name.clone());
        }
        info!(provider = %name, default = self.default.as_deref() == Some(name.as_str()), "provider.added");
        self.providers.insert(name, provider);
    }

    /// Make a registered provider the default.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.providers.contains_key(name) {
            return Err(self.not_found(name));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    /// Name of the default provider, if any provider is registered.
    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Registered provider names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Look up a provider by name, or the default with `None`.
    pub fn get_provider(&self, name: Option<&str>) -> Result<Arc<dyn LLMProvider>> {
        let wanted = name.or(self.default.as_deref()).unwrap_or_default();
        self.providers
            .get(wanted)
            .cloned()
            .ok_or_else(|| self.not_found(wanted))
    }

    /// Complete with the named (or default) provider.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        provider: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        self.get_provider(provider)?.chat(messages, options).await
    }

    /// Stream with the named (or default) provider.
    pub async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        provider: Option<&str>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.get_provider(provider)?
            .chat_stream(messages, options)
            .await
    }

    fn not_found(&self, name: &str) -> NexusError {
        NexusError::ProviderNotFound {
            name: name.to_string(),
            available: self.order.clone(),
        }
    }
}

#[async_trait]
impl LLMProvider for ProviderRouter {
    fn name(&self) -> &str {
        self.default.as_deref().unwrap_or("router")
    }

    fn default_model(&self) -> &str {
        self.default
            .as_deref()
            .and_then(|name| self.providers.get(name))
            .map_or("", |p| p.default_model())
    }

    async fn chat(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<LLMResponse> {
        self.complete(messages, None, options).await
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.stream(messages, None, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    struct Named(&'static str);

    #[async_trait]
    impl LLMProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn default_model(&self) -> &str {
            "m"
        }

        async fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            Ok(LLMResponse::text(self.0))
        }
    }

    #[test]
    fn test_first_provider_is_default() {
        let mut router = ProviderRouter::new();
        router.add_provider(Arc::new(Named("a")), false);
        router.add_provider(Arc::new(Named("b")), false);
        assert_eq!(router.default_name(), Some("a"));

        router.add_provider(Arc::new(Named("c")), true);
        assert_eq!(router.default_name(), Some("c"));
        assert_eq!(router.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_provider_lists_available() {
        let mut router = ProviderRouter::new();
        router.add_provider(Arc::new(Named("a")), false);
        let err = router.get_provider(Some("zzz")).err().unwrap();
        match err {
            NexusError::ProviderNotFound { name, available } => {
                assert_eq!(name, "zzz");
                assert_eq!(available, vec!["a"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_router_has_no_default() {
        let router = ProviderRouter::new();
        assert!(router.is_empty());
        assert!(router.get_provider(None).is_err());
    }

    #[tokio::test]
    async fn test_complete_routes_by_name() {
        let mut router = ProviderRouter::new();
        router.add_provider(Arc::new(Named("a")), false);
        router.add_provider(Arc::new(Named("b")), false);

        let by_default = router.chat(vec![], ChatOptions::new()).await.unwrap();
        assert_eq!(by_default.content, "a");
        let by_name = router
            .complete(vec![], Some("b"), ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(by_name.content, "b");
    }

    #[test]
    fn test_from_config() {
        let config = ProvidersConfig {
            default: Some("ollama".into()),
            openai: Some(ProviderConfig {
                api_key: Some("sk-test".into()),
                ..Default::default()
            }),
            ollama: Some(ProviderConfig {
                model: Some("llama3".into()),
                ..Default::default()
            }),
        };
        let router = ProviderRouter::from_config(&config).unwrap();
        assert_eq!(router.names(), vec!["openai", "ollama"]);
        assert_eq!(router.default_name(), Some("ollama"));
        assert_eq!(router.default_model(), "llama3");
    }

    #[test]
    fn test_from_config_skips_keyless_openai() {
        let config = ProvidersConfig {
            default: Some("openai".into()),
            openai: Some(ProviderConfig::default()),
            ollama: None,
        };
        assert!(matches!(
            ProviderRouter::from_config(&config),
            Err(NexusError::ProviderNotFound { .. })
        ));
    }
}
