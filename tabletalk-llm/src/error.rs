use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("API key not set for provider: {0}")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// Messages rejected locally, before any provider is contacted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The completion service could not produce a completion at all.
    #[error("Completion service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The completion contained no recognisable statement.
    #[error("No query found in completion")]
    NoQueryFound,

    /// More than one fenced block in the completion held a statement.
    #[error("Completion is ambiguous: {0} candidate queries found")]
    AmbiguousCompletion(usize),
}

impl LLMError {
    /// Collapse transport, auth and quota failures into `ServiceUnavailable`.
    pub fn into_service_unavailable(self) -> Self {
        match self {
            LLMError::ServiceUnavailable(_)
            | LLMError::InvalidInput(_)
            | LLMError::NoQueryFound
            | LLMError::AmbiguousCompletion(_) => self,
            other => LLMError::ServiceUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;
