use crate::config::*;
use crate::error::{LLMError, Result};
use crate::providers::trait_impl::Provider as ProviderTrait;
use crate::providers::{anthropic::AnthropicProvider, openai::OpenAIProvider};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;

pub struct LLMManager {
    providers: Arc<RwLock<HashMap<Provider, Arc<ProviderBox>>>>,
    default_provider: Arc<RwLock<Option<Provider>>>,
    config: Arc<RwLock<LLMConfig>>,
}

enum ProviderBox {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

#[async_trait::async_trait]
impl ProviderTrait for ProviderBox {
    fn name(&self) -> &'static str {
        match self {
            ProviderBox::OpenAI(p) => p.name(),
            ProviderBox::Anthropic(p) => p.name(),
        }
    }

    fn has_api_key(&self) -> bool {
        match self {
            ProviderBox::OpenAI(p) => p.has_api_key(),
            ProviderBox::Anthropic(p) => p.has_api_key(),
        }
    }

    fn set_api_key(&mut self, key: String) {
        match self {
            ProviderBox::OpenAI(p) => p.set_api_key(key),
            ProviderBox::Anthropic(p) => p.set_api_key(key),
        }
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        match self {
            ProviderBox::OpenAI(p) => p.chat(request).await,
            ProviderBox::Anthropic(p) => p.chat(request).await,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderBox::OpenAI(p) => p.default_model(),
            ProviderBox::Anthropic(p) => p.default_model(),
        }
    }
}

impl LLMManager {
    pub fn new() -> Self {
        Self::with_config(LLMConfig::default())
    }

    /// Manager with explicit settings; API keys are still read from the environment.
    pub fn with_config(config: LLMConfig) -> Self {
        let manager = Self::without_env(config);
        manager.initialize_from_env();
        manager
    }

    /// Manager with no providers; keys must be added with `set_api_key`.
    pub fn without_env(config: LLMConfig) -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            default_provider: Arc::new(RwLock::new(None)),
            config: Arc::new(RwLock::new(config)),
        }
    }

    fn initialize_from_env(&self) {
        for provider in [Provider::OpenAI, Provider::Anthropic] {
            if let Ok(key) = env::var(provider.env_var_name()) {
                self.set_api_key(provider, key);
            }
        }

        // A configured provider wins over whichever key happened to load first.
        let preferred = self.config.read().default_provider;
        if let Some(preferred) = preferred {
            if self.providers.read().contains_key(&preferred) {
                *self.default_provider.write() = Some(preferred);
            }
        }
    }

    /// Set API key for a provider
    pub fn set_api_key(&self, provider: Provider, key: String) {
        if key.is_empty() {
            tracing::warn!("Empty API key provided for {:?}", provider);
            return;
        }

        if key.len() > 1000 {
            tracing::warn!("API key too long for {:?}", provider);
            return;
        }

        if !key.starts_with("sk-") {
            tracing::debug!("API key format may be invalid for {:?}", provider);
        }

        let timeout = Duration::from_secs(self.config.read().request_timeout_secs.max(1));
        let mut provider_box = match provider {
            Provider::OpenAI => ProviderBox::OpenAI(OpenAIProvider::new().with_timeout(timeout)),
            Provider::Anthropic => {
                ProviderBox::Anthropic(AnthropicProvider::new().with_timeout(timeout))
            }
        };
        provider_box.set_api_key(key);
        self.providers.write().insert(provider, Arc::new(provider_box));

        let mut default = self.default_provider.write();
        if default.is_none() {
            *default = Some(provider);
        }
    }

    pub fn set_default_provider(&self, provider: Provider) -> Result<()> {
        if !self.providers.read().contains_key(&provider) {
            return Err(LLMError::MissingApiKey(format!(
                "Provider {:?} not configured",
                provider
            )));
        }
        *self.default_provider.write() = Some(provider);
        Ok(())
    }

    pub fn default_provider(&self) -> Option<Provider> {
        *self.default_provider.read()
    }

    pub fn is_configured(&self) -> bool {
        !self.providers.read().is_empty()
    }

    /// Get the provider to use (default or specified)
    fn get_provider(&self, provider: Option<Provider>) -> Result<Provider> {
        let provider = provider.or_else(|| *self.default_provider.read());

        provider.ok_or_else(|| LLMError::MissingApiKey("No provider configured".to_string()))
    }

    /// Chat completion. Responses are never cached.
    pub async fn chat(&self, messages: Vec<Message>, provider: Option<Provider>) -> Result<String> {
        if messages.is_empty() {
            return Err(LLMError::InvalidInput("Messages cannot be empty".to_string()));
        }

        if messages.len() > 100 {
            return Err(LLMError::InvalidInput("Too many messages (max 100)".to_string()));
        }

        for msg in &messages {
            if msg.content.len() > 100_000 {
                return Err(LLMError::InvalidInput(
                    "Individual message too large (max 100KB)".to_string(),
                ));
            }
        }

        let provider = self.get_provider(provider)?;
        let provider_box = self
            .providers
            .read()
            .get(&provider)
            .cloned()
            .ok_or_else(|| LLMError::MissingApiKey(format!("Provider {:?} not configured", provider)))?;

        let request = {
            let config = self.config.read();
            ChatRequest {
                messages,
                // The configured model only applies to the configured provider.
                model: config
                    .default_model
                    .clone()
                    .filter(|_| config.default_provider.map_or(true, |p| p == provider))
                    .or_else(|| Some(provider_box.default_model().to_string())),
                temperature: Some(config.temperature),
                max_tokens: config.max_tokens,
            }
        };

        tracing::debug!("sending chat request to {}", provider_box.name());
        let response = provider_box.chat(request).await?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                "{} used {} prompt + {} completion tokens",
                response.model,
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        Ok(response.content)
    }
}

impl Default for LLMManager {
    fn default() -> Self {
        Self::new()
    }
}
