use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allow_any_origin: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allow_any_origin: true,
            log_level: "info".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub database_file: String,
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            database_file: "tabletalk.db".to_string(),
            max_upload_bytes: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.database_file)
    }
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// "openai" or "anthropic"
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 500,
            request_timeout_secs: 60,
        }
    }
}

/// Query pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub sample_rows_in_prompt: usize,
    pub display_row_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            sample_rows_in_prompt: 3,
            display_row_limit: 1000,
        }
    }
}

/// Complete tabletalk configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletalkConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmSettings,
    pub query: QuerySettings,
}

impl TabletalkConfig {
    /// Load configuration from a TOML or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::parse(&content)
    }

    /// Parse configuration text, trying TOML first and then YAML
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let toml_err = match toml::from_str::<TabletalkConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        match serde_yaml::from_str::<TabletalkConfig>(content) {
            Ok(config) => Ok(config),
            Err(yaml_err) => Err(ConfigError::Parse(format!(
                "not valid TOML ({}) or YAML ({})",
                toml_err, yaml_err
            ))),
        }
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `PORT`, `HOST`, `TABLETALK_DATA_DIR`, `TABLETALK_LOG_LEVEL` and `LLM_PROVIDER`
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                self.server.port = p;
            }
        }

        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(data_dir) = std::env::var("TABLETALK_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        if let Ok(log_level) = std::env::var("TABLETALK_LOG_LEVEL") {
            self.server.log_level = log_level;
        }

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_string(),
            ));
        }

        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.database_file cannot be empty".to_string(),
            ));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "storage.max_upload_bytes must be > 0".to_string(),
            ));
        }

        if !matches!(self.llm.provider.as_str(), "openai" | "anthropic") {
            return Err(ConfigError::Validation(format!(
                "llm.provider must be 'openai' or 'anthropic', got '{}'",
                self.llm.provider
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Validation(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.query.display_row_limit == 0 {
            return Err(ConfigError::Validation(
                "query.display_row_limit must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
