// Wiring from configuration to a ready `ApiState`

use crate::http::ApiState;
use std::sync::Arc;
use tabletalk_core::{ConfigError, TabletalkConfig};
use tabletalk_llm::{CompletionService, LLMConfig, LLMManager};
use tabletalk_query::{PromptBuilder, QueryPipeline, SqliteExecutor};
use tabletalk_storage::{IngestOptions, SqliteStore, TableCatalog};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization failed: {0}")]
    InitializationFailed(#[from] tabletalk_core::Error),
}

/// Open storage, restore the catalog and build the provider-backed pipeline.
pub fn build_state(config: &TabletalkConfig) -> Result<ApiState, StartupError> {
    let manager = LLMManager::with_config(LLMConfig::from(&config.llm));
    match manager.default_provider() {
        Some(provider) => info!("completion provider: {}", provider.as_str()),
        None => warn!(
            "no completion provider configured; set OPENAI_API_KEY or ANTHROPIC_API_KEY to enable questions"
        ),
    }
    build_state_with(config, Arc::new(manager))
}

/// Same as [`build_state`] with a caller-supplied completion service.
pub fn build_state_with(
    config: &TabletalkConfig,
    completion: Arc<dyn CompletionService>,
) -> Result<ApiState, StartupError> {
    config.validate()?;

    let store = SqliteStore::open(config.storage.database_path())?;
    let catalog = Arc::new(TableCatalog::with_tables(store.load_catalog()?));
    info!(
        "storage ready at {} with {} table(s)",
        store.path().display(),
        catalog.len()
    );

    let executor = Arc::new(SqliteExecutor::new(store.clone()));
    let pipeline = QueryPipeline::new(catalog.clone(), completion, executor)
        .with_prompt_builder(PromptBuilder::new(config.query.sample_rows_in_prompt));

    Ok(ApiState {
        catalog,
        store,
        pipeline: Arc::new(pipeline),
        ingest: IngestOptions {
            max_bytes: config.storage.max_upload_bytes,
            ..IngestOptions::default()
        },
        display_row_limit: config.query.display_row_limit,
        cors_allow_any_origin: config.server.cors_allow_any_origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_state_restores_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TabletalkConfig::default();
        config.storage.data_dir = dir.path().display().to_string();
        config.storage.max_upload_bytes = 1024;

        let store = SqliteStore::open(config.storage.database_path()).unwrap();
        let dataset = tabletalk_storage::parse_csv(b"a,b\n1,x\n", &IngestOptions::default()).unwrap();
        store.create_table("sales", &dataset).unwrap();

        let manager = LLMManager::without_env(LLMConfig::default());
        let state = build_state_with(&config, Arc::new(manager)).unwrap();
        assert!(state.catalog.contains("sales"));
        assert_eq!(state.ingest.max_bytes, 1024);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = TabletalkConfig::default();
        config.query.display_row_limit = 0;
        let manager = LLMManager::without_env(LLMConfig::default());
        assert!(matches!(
            build_state_with(&config, Arc::new(manager)),
            Err(StartupError::Config(_))
        ));
    }
}
