use crate::error::ExecutionError;
use crate::validator::ValidatedQuery;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;
use tabletalk_core::RowMap;
use tabletalk_storage::{read_row, SqliteStore};
use tracing::debug;

/// Rows produced by one validated statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub sql_text: String,
    pub columns: Vec<String>,
    pub rows: Vec<RowMap>,
    pub row_count: usize,
    /// Prepare, step and row conversion only.
    pub elapsed_ms: f64,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &ValidatedQuery, table: &str) -> Result<QueryResult, ExecutionError>;
}

/// Runs statements on a fresh read-only SQLite connection each time.
pub struct SqliteExecutor {
    store: SqliteStore,
}

impl SqliteExecutor {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Blocking execution; callers on the async runtime go through [`QueryExecutor::execute`].
    pub fn execute_blocking(&self, query: &ValidatedQuery) -> Result<QueryResult, ExecutionError> {
        let conn = self.store.read_only_connection()?;

        let start = Instant::now();
        let mut stmt = conn.prepare(query.statement())?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            rows.push(read_row(row, &columns)?);
        }
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(QueryResult {
            sql_text: query.sql().to_string(),
            columns,
            row_count: rows.len(),
            rows,
            elapsed_ms,
        })
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, query: &ValidatedQuery, table: &str) -> Result<QueryResult, ExecutionError> {
        debug!("executing validated query against '{}'", table);
        let executor = SqliteExecutor::new(self.store.clone());
        let query = query.clone();
        tokio::task::spawn_blocking(move || executor.execute_blocking(&query))
            .await
            .map_err(|e| ExecutionError::new(format!("execution task failed: {}", e)))?
    }
}
