use crate::config::Message;
use crate::error::Result;
use crate::manager::LLMManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instruction payload sent to a completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// System text: what the service must produce.
    pub instruction: String,
    /// User text: schema, samples, question and rules.
    pub body: String,
}

impl Prompt {
    pub fn messages(&self) -> Vec<Message> {
        vec![
            Message::system(self.instruction.clone()),
            Message::user(self.body.clone()),
        ]
    }
}

/// Anything that turns a prompt into raw completion text.
///
/// Failures to obtain text surface as `LLMError::ServiceUnavailable`; no retries.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

#[async_trait]
impl CompletionService for LLMManager {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.chat(prompt.messages(), None)
            .await
            .map_err(|e| e.into_service_unavailable())
    }
}
