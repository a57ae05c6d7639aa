// Per-table exclusion between running queries and catalog mutations

mod common;

use async_trait::async_trait;
use common::{employees_fixture, ScriptedCompletion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabletalk_query::{
    ExecutionError, QueryExecutor, QueryPipeline, QueryRequest, QueryResult, SqliteExecutor,
    ValidatedQuery,
};
use tabletalk_storage::TableCatalog;
use tokio::sync::Notify;

/// Executor that parks inside `execute` until released.
struct GatedExecutor {
    inner: SqliteExecutor,
    entered: Notify,
    release: Notify,
    finished: AtomicBool,
}

#[async_trait]
impl QueryExecutor for GatedExecutor {
    async fn execute(&self, query: &ValidatedQuery, table: &str) -> Result<QueryResult, ExecutionError> {
        self.entered.notify_one();
        self.release.notified().await;
        let result = self.inner.execute(query, table).await;
        self.finished.store(true, Ordering::SeqCst);
        result
    }
}

#[tokio::test]
async fn test_delete_waits_for_in_flight_query() {
    let fixture = employees_fixture();
    let executor = Arc::new(GatedExecutor {
        inner: SqliteExecutor::new(fixture.store.clone()),
        entered: Notify::new(),
        release: Notify::new(),
        finished: AtomicBool::new(false),
    });
    let pipeline = Arc::new(QueryPipeline::new(
        fixture.catalog.clone(),
        Arc::new(ScriptedCompletion::replying(["SELECT * FROM employees"])),
        executor.clone(),
    ));

    let query = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(&QueryRequest::new("everyone", "employees")).await })
    };
    executor.entered.notified().await;

    let catalog = fixture.catalog.clone();
    let executor_for_delete = executor.clone();
    let delete = tokio::spawn(async move {
        let lease = catalog.lock_for_write("employees").await;
        // The query must have completed before the writer gets in.
        assert!(executor_for_delete.finished.load(Ordering::SeqCst));
        lease.unregister().unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!delete.is_finished());

    executor.release.notify_one();
    let result = query.await.unwrap().unwrap();
    assert_eq!(result.row_count, 3);
    delete.await.unwrap();
    assert!(!fixture.catalog.contains("employees"));
}

#[tokio::test]
async fn test_readers_share_a_table() {
    let catalog = Arc::new(TableCatalog::with_tables(vec![employees_fixture().schema]));
    let first = catalog.read("employees").await.unwrap();
    let second = tokio::time::timeout(Duration::from_millis(200), catalog.read("employees"))
        .await
        .expect("second reader should not wait")
        .unwrap();
    assert_eq!(first.table_name(), second.table_name());
}

#[tokio::test]
async fn test_unrelated_tables_do_not_contend() {
    let catalog = Arc::new(TableCatalog::new());
    let _writer = catalog.lock_for_write("sales").await;

    let other = tokio::time::timeout(Duration::from_millis(200), catalog.lock_for_write("employees"))
        .await
        .expect("writer on another table should not wait");
    assert!(!other.exists());
}

#[tokio::test]
async fn test_query_after_delete_is_not_found() {
    let fixture = employees_fixture();
    let pipeline = QueryPipeline::new(
        fixture.catalog.clone(),
        Arc::new(ScriptedCompletion::replying(["SELECT * FROM employees"])),
        Arc::new(SqliteExecutor::new(fixture.store.clone())),
    );
    fixture.catalog.unregister("employees").await.unwrap();

    let failure = pipeline
        .run(&QueryRequest::new("everyone", "employees"))
        .await
        .unwrap_err();
    assert_eq!(failure.error.kind(), "not_found");
}

#[tokio::test]
async fn test_many_concurrent_queries() {
    let fixture = employees_fixture();
    let replies: Vec<&'static str> = vec!["SELECT COUNT(*) AS n FROM employees"; 16];
    let pipeline = Arc::new(QueryPipeline::new(
        fixture.catalog.clone(),
        Arc::new(ScriptedCompletion::replying(replies)),
        Arc::new(SqliteExecutor::new(fixture.store.clone())),
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(&QueryRequest::new("how many?", "employees")).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.row_count, 1);
    }
}
