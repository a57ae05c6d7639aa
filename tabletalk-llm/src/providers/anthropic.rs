use async_trait::async_trait;
use crate::config::*;
use crate::error::{LLMError, Result};
use crate::providers::trait_impl::{key_prefix, sanitize_model, truncate_error_body, Provider as ProviderTrait};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;

const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

pub struct AnthropicProvider {
    api_key: Arc<RwLock<Option<String>>>,
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            api_key: Arc::new(RwLock::new(None)),
            client: Client::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
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

    fn get_api_key(&self) -> Result<String> {
        self.api_key
            .read()
            .as_ref()
            .cloned()
            .ok_or_else(|| LLMError::MissingApiKey("Anthropic".to_string()))
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderTrait for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
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
        let body = build_request_body(&request, &model);

        if !self.base_url.starts_with("https://") {
            return Err(LLMError::InvalidResponse("Invalid base URL".to_string()));
        }

        tracing::debug!("Making request to Anthropic with key {}...", key_prefix(&api_key));

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
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

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::InvalidResponse(truncate_error_body(status, &text)));
        }

        let json: serde_json::Value = response.json().await?;

        // Concatenate every text block; tool_use and other block types are ignored.
        let content = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let usage = json.get("usage").and_then(|u| {
            Some(Usage {
                prompt_tokens: u["input_tokens"].as_u64()? as u32,
                completion_tokens: u["output_tokens"].as_u64()? as u32,
                total_tokens: (u["input_tokens"].as_u64()? + u["output_tokens"].as_u64()?) as u32,
            })
        });

        Ok(ChatResponse {
            content,
            model: json["model"].as_str().unwrap_or(&model).to_string(),
            usage,
            finish_reason: json["stop_reason"].as_str().map(|s| s.to_string()),
        })
    }
}

/// Anthropic takes the system prompt as a top-level field, not a message.
pub(crate) fn build_request_body(request: &ChatRequest, model: &str) -> serde_json::Value {
    let mut messages = Vec::new();
    let mut system: Option<String> = None;

    for msg in &request.messages {
        match msg.role {
            MessageRole::System => {
                system = Some(match system {
                    Some(existing) => format!("{}\n\n{}", existing, msg.content),
                    None => msg.content.clone(),
                });
            }
            MessageRole::User => messages.push(json!({
                "role": "user",
                "content": msg.content
            })),
            MessageRole::Assistant => messages.push(json!({
                "role": "assistant",
                "content": msg.content
            })),
        }
    }

    let max_tokens = request.max_tokens.map(|t| t.min(4096)).unwrap_or(500);

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
    });

    if let Some(sys) = system {
        body["system"] = json!(sys);
    }

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp.clamp(0.0, 1.0));
    }

    body
}
