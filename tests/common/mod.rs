// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tabletalk_core::TableSchema;
use tabletalk_llm::{CompletionService, LLMError, Prompt};
use tabletalk_query::{ExecutionError, QueryExecutor, QueryResult, SqliteExecutor, ValidatedQuery};
use tabletalk_storage::{parse_csv, IngestOptions, SqliteStore, TableCatalog};
use tempfile::TempDir;

pub const EMPLOYEES_CSV: &str = "name,salary,department\n\
alice,120000,Engineering\n\
bob,80000,Sales\n\
carol,95000,Engineering\n";

/// Store in a temp dir holding the `employees` table, plus a catalog that knows it.
pub struct Fixture {
    pub dir: TempDir,
    pub store: SqliteStore,
    pub catalog: Arc<TableCatalog>,
    pub schema: TableSchema,
}

pub fn employees_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("tabletalk.db")).unwrap();
    let dataset = parse_csv(EMPLOYEES_CSV.as_bytes(), &IngestOptions::default()).unwrap();
    let schema = store.create_table("employees", &dataset).unwrap();
    let catalog = Arc::new(TableCatalog::with_tables(vec![schema.clone()]));
    Fixture {
        dir,
        store,
        catalog,
        schema,
    }
}

/// Completion service that replays canned replies in order and records every prompt.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, LLMError>>>,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedCompletion {
    pub fn replying(replies: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: LLMError) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(error)])),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &Prompt) -> tabletalk_llm::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LLMError::ServiceUnavailable("no scripted reply left".into())))
    }
}

/// Real SQLite executor that counts invocations.
pub struct CountingExecutor {
    inner: SqliteExecutor,
    calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: SqliteExecutor::new(store),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute(&self, query: &ValidatedQuery, table: &str) -> Result<QueryResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(query, table).await
    }
}
