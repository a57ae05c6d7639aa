use async_trait::async_trait;
use crate::config::*;
use crate::error::{LLMError, Result};
use crate::providers::trait_impl::{key_prefix, sanitize_model, truncate_error_body, Provider as ProviderTrait};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAIProvider {
    api_key: Arc<RwLock<Option<String>>>,
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new() -> Self {
        Self {
            api_key: Arc::new(RwLock::new(None)),
            client: Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(api_key: String) -> Self {
        let mut provider = Self::new();
        provider.set_api_key(api_key);
        provider
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get_api_key(&self) -> Result<String> {
        self.api_key
            .read()
            .as_ref()
            .cloned()
            .ok_or_else(|| LLMError::MissingApiKey("OpenAI".to_string()))
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderTrait for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn has_api_key(&self) -> bool {
        self.api_key.read().is_some()
    }

    fn set_api_key(&mut self, key: String) {
        *self.api_key.write() = Some(key);
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let api_key = self.get_api_key()?;
        let model = sanitize_model(request.model.as_ref(), DEFAULT_MODEL);

        let max_tokens = request.max_tokens.map(|t| t.min(4096)).unwrap_or(500);

        let body = json!({
            "model": model,
            "messages": request.messages.iter().map(|m| {
                json!({
                    "role": match m.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    "content": m.content
                })
            }).collect::<Vec<_>>(),
            "temperature": request.temperature.unwrap_or(0.0).clamp(0.0, 2.0),
            "max_tokens": max_tokens,
        });

        if !self.base_url.starts_with("https://") {
            return Err(LLMError::InvalidResponse("Invalid base URL".to_string()));
        }

        tracing::debug!("Making request to OpenAI with key {}...", key_prefix(&api_key));

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == 429 {
            return Err(LLMError::RateLimit);
        }

        if status == 401 || status == 403 {
            return Err(LLMError::AuthenticationFailed);
        }

        if status == 404 {
            return Err(LLMError::ModelNotAvailable(model));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::InvalidResponse(truncate_error_body(status, &text)));
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json, &model)
    }
}

pub(crate) fn parse_chat_response(json: &serde_json::Value, model: &str) -> Result<ChatResponse> {
    let choices = json.get("choices").and_then(|c| c.as_array()).ok_or_else(|| {
        LLMError::InvalidResponse("Invalid response format: no choices array".to_string())
    })?;

    let choice = choices
        .first()
        .and_then(|c| c.as_object())
        .ok_or_else(|| LLMError::InvalidResponse("No choices in response".to_string()))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let usage = json.get("usage").and_then(|u| {
        Some(Usage {
            prompt_tokens: u["prompt_tokens"].as_u64()? as u32,
            completion_tokens: u["completion_tokens"].as_u64()? as u32,
            total_tokens: u["total_tokens"].as_u64()? as u32,
        })
    });

    Ok(ChatResponse {
        content,
        model: json["model"].as_str().unwrap_or(model).to_string(),
        usage,
        finish_reason: choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string()),
    })
}
