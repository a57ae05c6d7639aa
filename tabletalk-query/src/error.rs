use serde::Serialize;
use tabletalk_llm::LLMError;
use thiserror::Error;

/// Why a candidate query was refused before reaching storage.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ValidationRejection {
    #[error("query contains more than one statement")]
    MultipleStatements,

    #[error("only SELECT queries are allowed (found {})", .found.as_deref().unwrap_or("nothing"))]
    NotReadOnly { found: Option<String> },

    #[error("forbidden keyword detected: {0}")]
    ForbiddenKeyword(String),

    #[error("query references unknown table '{0}'")]
    UnknownTable(String),
}

/// The engine rejected or failed on a validated statement. Carries its message verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(err: rusqlite::Error) -> Self {
        ExecutionError::new(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Table '{0}' not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Llm(LLMError),

    #[error("Query rejected: {0}")]
    Rejected(#[from] ValidationRejection),

    #[error("Query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Outward `error_kind` label.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::NotFound(_) => "not_found",
            QueryError::InvalidRequest(_) => "invalid_request",
            QueryError::Llm(_) => "completion_failure",
            QueryError::Rejected(_) => "validation_rejected",
            QueryError::Execution(_) => "execution_failed",
            QueryError::Internal(_) => "internal",
        }
    }

    pub fn rejection(&self) -> Option<&ValidationRejection> {
        match self {
            QueryError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

/// Input the completion client refused locally is the caller's fault, not an outage.
impl From<LLMError> for QueryError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::InvalidInput(detail) => QueryError::InvalidRequest(detail),
            other => QueryError::Llm(other),
        }
    }
}

impl From<tabletalk_core::Error> for QueryError {
    fn from(err: tabletalk_core::Error) -> Self {
        match err {
            tabletalk_core::Error::NotFound(name) => QueryError::NotFound(name),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
