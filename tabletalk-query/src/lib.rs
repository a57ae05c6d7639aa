//! Natural-language query pipeline.
//!
//! A question about one uploaded table becomes a prompt, the completion service's
//! reply is reduced to a single candidate statement, the validator decides whether
//! it may run, and the executor runs it on a read-only connection.

pub mod error;
pub mod executor;
pub mod lexer;
pub mod pipeline;
pub mod prompt;
pub mod validator;

pub use error::{ExecutionError, QueryError, Result, ValidationRejection};
pub use executor::{QueryExecutor, QueryResult, SqliteExecutor};
pub use pipeline::{PipelineFailure, PipelineResult, PipelineState, QueryPipeline, QueryRequest};
pub use prompt::{extract_candidate, PromptBuilder};
pub use validator::{validate, ValidatedQuery, FORBIDDEN_KEYWORDS};
