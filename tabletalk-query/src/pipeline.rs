// Question-to-rows pipeline: resolve, prompt, extract, validate, execute

use crate::error::QueryError;
use crate::executor::{QueryExecutor, QueryResult};
use crate::prompt::{extract_candidate, PromptBuilder};
use crate::validator::validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tabletalk_llm::CompletionService;
use tabletalk_storage::TableCatalog;
use tracing::{debug, info, warn};

/// Stages a request moves through. A failure records the stage being entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    SchemaResolved,
    PromptSent,
    CandidateExtracted,
    Validated,
    Executed,
    Responded,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "received",
            PipelineState::SchemaResolved => "schema_resolved",
            PipelineState::PromptSent => "prompt_sent",
            PipelineState::CandidateExtracted => "candidate_extracted",
            PipelineState::Validated => "validated",
            PipelineState::Executed => "executed",
            PipelineState::Responded => "responded",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct PipelineFailure {
    pub failed_at: PipelineState,
    pub error: QueryError,
}

impl PipelineFailure {
    fn at(failed_at: PipelineState, error: impl Into<QueryError>) -> Self {
        Self {
            failed_at,
            error: error.into(),
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed entering {}: {}", self.failed_at, self.error)
    }
}

impl std::error::Error for PipelineFailure {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub table_name: String,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            table_name: table_name.into(),
        }
    }
}

pub type PipelineResult = std::result::Result<QueryResult, PipelineFailure>;

/// Runs one question through every stage. Holds no state between requests.
pub struct QueryPipeline {
    catalog: Arc<TableCatalog>,
    completion: Arc<dyn CompletionService>,
    executor: Arc<dyn QueryExecutor>,
    prompt_builder: PromptBuilder,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<TableCatalog>,
        completion: Arc<dyn CompletionService>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            catalog,
            completion,
            executor,
            prompt_builder: PromptBuilder::default(),
        }
    }

    pub fn with_prompt_builder(mut self, prompt_builder: PromptBuilder) -> Self {
        self.prompt_builder = prompt_builder;
        self
    }

    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    pub async fn run(&self, request: &QueryRequest) -> PipelineResult {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(PipelineFailure::at(
                PipelineState::Received,
                QueryError::InvalidRequest("question cannot be empty".to_string()),
            ));
        }
        debug!("pipeline received question for '{}'", request.table_name);

        let schema = self
            .catalog
            .get(&request.table_name)
            .map_err(|e| PipelineFailure::at(PipelineState::SchemaResolved, e))?;
        debug!("schema resolved: {} ({} columns)", schema.name, schema.columns.len());

        let prompt = self
            .prompt_builder
            .build(question, &schema)
            .map_err(|e| PipelineFailure::at(PipelineState::PromptSent, e))?;
        let completion = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|e| PipelineFailure::at(PipelineState::PromptSent, e))?;
        debug!("completion received ({} bytes)", completion.len());

        let candidate = extract_candidate(&completion)
            .map_err(|e| PipelineFailure::at(PipelineState::CandidateExtracted, e))?;
        debug!("candidate extracted: {}", candidate);

        let result = self.validate_and_execute(&schema.name, &candidate).await?;
        info!(
            "answered question on '{}' with {} rows in {:.2}ms",
            schema.name, result.row_count, result.elapsed_ms
        );
        Ok(result)
    }

    /// Validate and run caller-supplied SQL against `table`, exactly like a generated query.
    pub async fn execute_sql(&self, table: &str, sql: &str) -> PipelineResult {
        let schema = self
            .catalog
            .get(table)
            .map_err(|e| PipelineFailure::at(PipelineState::SchemaResolved, e))?;
        self.validate_and_execute(&schema.name, sql).await
    }

    async fn validate_and_execute(&self, table: &str, sql: &str) -> PipelineResult {
        // Held until the rows are read so a concurrent replace or delete of this table waits.
        let lease = self
            .catalog
            .read(table)
            .await
            .map_err(|e| PipelineFailure::at(PipelineState::Validated, e))?;

        let validated = validate(sql, self.catalog.as_ref()).map_err(|rejection| {
            warn!("rejected query for '{}': {}", table, rejection);
            PipelineFailure::at(PipelineState::Validated, rejection)
        })?;

        let result = self
            .executor
            .execute(&validated, lease.table_name())
            .await
            .map_err(|e| {
                warn!("execution failed for '{}': {}", table, e);
                PipelineFailure::at(PipelineState::Executed, e)
            })?;

        drop(lease);
        debug!("pipeline responded for '{}'", table);
        Ok(result)
    }
}
