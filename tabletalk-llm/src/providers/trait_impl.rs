use async_trait::async_trait;
use crate::config::*;
use crate::error::Result;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Check if API key is set
    fn has_api_key(&self) -> bool;

    /// Set API key
    fn set_api_key(&mut self, key: String);

    /// Chat completion
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Model used when a request names none
    fn default_model(&self) -> &'static str;
}

/// Keep the part of a model name that is safe to place in a request body.
pub(crate) fn sanitize_model(model: Option<&String>, fallback: &str) -> String {
    model
        .map(|m| {
            m.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
                .take(100)
                .collect::<String>()
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Never log more than the first 8 characters of a key.
pub(crate) fn key_prefix(api_key: &str) -> &str {
    match api_key.get(..8) {
        Some(prefix) if api_key.len() > 8 => prefix,
        _ => "***",
    }
}

/// Error body trimmed to 500 bytes on a char boundary.
pub(crate) fn truncate_error_body(status: reqwest::StatusCode, text: &str) -> String {
    let mut end = text.len().min(500);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("HTTP {}: {}", status, &text[..end])
}
