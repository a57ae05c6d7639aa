// HTTP API: upload, ask, browse, drop and download tables

use crate::export::{self, ResultSheet};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tabletalk_core::{RowMap, TableSchema};
use tabletalk_query::{
    PipelineFailure, PipelineState, QueryError, QueryPipeline, QueryRequest, QueryResult,
    ValidationRejection,
};
use tabletalk_storage::{
    generate_table_name, parse_upload, unique_suffix, validate_upload, IngestOptions, SqliteStore,
    TableCatalog, TableWriteLease,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const PREVIEW_ROWS: usize = 10;
const NAME_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<TableCatalog>,
    pub store: SqliteStore,
    pub pipeline: Arc<QueryPipeline>,
    pub ingest: IngestOptions,
    pub display_row_limit: usize,
    pub cors_allow_any_origin: bool,
}

// Response types
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub table_name: String,
    pub rows_count: u64,
    pub columns: Vec<String>,
    pub table_schema: Vec<ColumnInfo>,
    pub preview: Vec<RowMap>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub question: String,
    pub table_name: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub question: String,
    pub sql_text: String,
    pub columns: Vec<String>,
    pub rows: Vec<RowMap>,
    /// Rows produced by the query, before display truncation.
    pub row_count: usize,
    pub elapsed_ms: f64,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
    pub columns: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub success: bool,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub success: bool,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub sample_data: Vec<RowMap>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    #[serde(default = "default_download_name")]
    pub filename: String,
}

fn default_download_name() -> String {
    "results".to_string()
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error_kind: String,
    pub error_detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<PipelineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<ValidationRejection>,
}

/// Failed request: status code plus the outward failure body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                success: false,
                error_kind: kind.to_string(),
                error_detail: detail.into(),
                failed_at: None,
                rejection: None,
            },
        }
    }

    fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", detail)
    }

    /// Details stay in the log; callers only see a generic message.
    fn internal(detail: impl std::fmt::Display) -> Self {
        error!("internal error: {}", detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "An internal error occurred")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(error: &QueryError) -> StatusCode {
    match error {
        QueryError::NotFound(_) => StatusCode::NOT_FOUND,
        QueryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        QueryError::Llm(_) => StatusCode::BAD_GATEWAY,
        QueryError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::Execution(_) => StatusCode::BAD_REQUEST,
        QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        if let QueryError::Internal(detail) = &err {
            return ApiError::internal(detail);
        }
        let mut api = ApiError::new(status_for(&err), err.kind(), err.to_string());
        api.body.rejection = err.rejection().cloned();
        api
    }
}

impl From<PipelineFailure> for ApiError {
    fn from(failure: PipelineFailure) -> Self {
        let mut api = ApiError::from(failure.error);
        api.body.failed_at = Some(failure.failed_at);
        api
    }
}

impl From<tabletalk_core::Error> for ApiError {
    fn from(err: tabletalk_core::Error) -> Self {
        match err {
            tabletalk_core::Error::NotFound(name) => ApiError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Table '{}' not found", name),
            ),
            tabletalk_core::Error::Ingest(detail) | tabletalk_core::Error::SchemaMismatch(detail) => {
                ApiError::invalid_request(detail)
            }
            other => ApiError::internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Create HTTP router with all API routes
pub fn create_router(state: ApiState) -> Router {
    let cors = if state.cors_allow_any_origin {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    // Leave headroom for multipart framing; the file size itself is checked on upload.
    let body_limit = state.ingest.max_bytes.saturating_add(1024 * 1024);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/query", post(query_handler))
        .route("/api/tables", get(tables_handler))
        .route("/api/schema/:table", get(schema_handler))
        .route("/api/table/:table", delete(delete_table_handler))
        .route("/api/download/csv", post(download_csv_handler))
        .route("/api/download/excel", post(download_excel_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn column_infos(schema: &TableSchema) -> Vec<ColumnInfo> {
    schema
        .columns
        .iter()
        .map(|c| ColumnInfo {
            name: c.name.clone(),
            column_type: c.column_type.display_name().to_string(),
        })
        .collect()
}

async fn upload_handler(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::invalid_request(format!("Could not read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::invalid_request("Missing 'file' field"))?;

    validate_upload(&filename, bytes.len(), &state.ingest)?;
    let options = state.ingest.clone();
    let source = filename.clone();
    let dataset = tokio::task::spawn_blocking(move || parse_upload(&source, &bytes, &options))
        .await
        .map_err(ApiError::internal)??;
    let preview = dataset.preview(PREVIEW_ROWS);

    let lease = reserve_table_name(&state, &generate_table_name(&filename)).await?;
    let table_name = lease.table_name().to_string();

    let store = state.store.clone();
    let schema = tokio::task::spawn_blocking(move || store.create_table(&table_name, &dataset))
        .await
        .map_err(ApiError::internal)??;

    lease.register(schema.clone())?;
    drop(lease);
    info!(
        "uploaded '{}' as table '{}' ({} rows)",
        filename, schema.name, schema.row_count
    );

    Ok(Json(UploadResponse {
        success: true,
        table_name: schema.name.clone(),
        rows_count: schema.row_count,
        columns: schema.column_names().iter().map(|c| c.to_string()).collect(),
        table_schema: column_infos(&schema),
        preview,
        message: format!("Successfully uploaded {} as table '{}'", filename, schema.name),
    }))
}

/// Exclusive lease on an unused table name, adding a random suffix on collision.
async fn reserve_table_name(state: &ApiState, base: &str) -> ApiResult<TableWriteLease> {
    let mut candidate = base.to_string();
    for _ in 0..NAME_ATTEMPTS {
        let lease = state.catalog.lock_for_write(&candidate).await;
        if !lease.exists() && !state.store.table_exists(&candidate)? {
            return Ok(lease);
        }
        candidate = format!("{}_{}", base, unique_suffix());
    }
    Err(ApiError::internal(format!("no free table name for '{}'", base)))
}

async fn query_handler(
    State(state): State<ApiState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> ApiResult<Json<QueryResponse>> {
    let Json(body) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    if body.table_name.trim().is_empty() {
        return Err(ApiError::invalid_request("table_name cannot be empty"));
    }

    let request = QueryRequest::new(body.question.clone(), body.table_name.clone());
    let result = state.pipeline.run(&request).await.map_err(|failure| {
        warn!(
            "query on '{}' failed at {}: {}",
            body.table_name, failure.failed_at, failure.error
        );
        ApiError::from(failure)
    })?;

    Ok(Json(query_response(body.question, result, state.display_row_limit)))
}

fn query_response(question: String, result: QueryResult, limit: usize) -> QueryResponse {
    let QueryResult {
        sql_text,
        columns,
        mut rows,
        row_count,
        elapsed_ms,
    } = result;
    let truncated = rows.len() > limit;
    rows.truncate(limit);

    QueryResponse {
        success: true,
        question,
        sql_text,
        columns,
        rows,
        row_count,
        elapsed_ms,
        truncated,
    }
}

async fn tables_handler(State(state): State<ApiState>) -> Json<TablesResponse> {
    let tables = state
        .catalog
        .list()
        .into_iter()
        .map(|schema| TableInfo {
            columns: schema.column_names().iter().map(|c| c.to_string()).collect(),
            name: schema.name,
            row_count: schema.row_count,
            created_at: schema.created_at,
        })
        .collect();

    Json(TablesResponse {
        success: true,
        tables,
    })
}

async fn schema_handler(
    State(state): State<ApiState>,
    Path(table): Path<String>,
) -> ApiResult<Json<SchemaResponse>> {
    let schema = state.catalog.get(&table)?;
    Ok(Json(SchemaResponse {
        success: true,
        columns: column_infos(&schema),
        table_name: schema.name,
        sample_data: schema.sample_rows,
    }))
}

async fn delete_table_handler(
    State(state): State<ApiState>,
    Path(table): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    if !state.catalog.contains(&table) {
        return Err(tabletalk_core::Error::NotFound(table).into());
    }
    let lease = state.catalog.lock_for_write(&table).await;
    // Another request may have dropped it while this one waited.
    if !lease.exists() {
        return Err(tabletalk_core::Error::NotFound(table).into());
    }
    let name = state.catalog.get(&table)?.name;

    let store = state.store.clone();
    let dropped = name.clone();
    tokio::task::spawn_blocking(move || store.drop_table(&dropped))
        .await
        .map_err(ApiError::internal)??;
    lease.unregister()?;
    info!("deleted table '{}'", name);

    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Table '{}' deleted successfully", name),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadFormat {
    Csv,
    Excel,
}

impl DownloadFormat {
    fn extension(self) -> &'static str {
        match self {
            DownloadFormat::Csv => "csv",
            DownloadFormat::Excel => "xlsx",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            DownloadFormat::Csv => "text/csv; charset=utf-8",
            DownloadFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

async fn download_csv_handler(
    State(state): State<ApiState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    download(state, payload, DownloadFormat::Csv).await
}

async fn download_excel_handler(
    State(state): State<ApiState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    download(state, payload, DownloadFormat::Excel).await
}

async fn download(
    state: ApiState,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
    format: DownloadFormat,
) -> ApiResult<Response> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;

    let sheet = match (&request.sql_query, &request.table_name, &request.data) {
        (Some(sql), Some(table), _) => {
            let result = state.pipeline.execute_sql(table, sql).await?;
            if result.rows.is_empty() {
                return Err(ApiError::invalid_request("Query returned no results"));
            }
            ResultSheet::from_rows(result.columns, &result.rows)
        }
        (_, _, Some(data)) if !data.is_empty() => ResultSheet::from_json(data),
        _ => {
            return Err(ApiError::invalid_request(
                "Either data or sql_query with table_name must be provided",
            ))
        }
    };

    let body = match format {
        DownloadFormat::Csv => export::to_csv(&sheet).map_err(ApiError::internal)?,
        DownloadFormat::Excel => tokio::task::spawn_blocking(move || export::to_xlsx(&sheet))
            .await
            .map_err(ApiError::internal)?
            .map_err(ApiError::internal)?,
    };

    let extension = format.extension();
    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        sanitize_filename(&request.filename, extension),
        extension
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

fn sanitize_filename(name: &str, extension: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let suffix = format!(".{}", extension);
    let cleaned = cleaned.trim_end_matches(suffix.as_str()).trim_matches('.').to_string();
    if cleaned.is_empty() {
        default_download_name()
    } else {
        cleaned
    }
}
