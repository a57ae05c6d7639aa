pub mod error;
pub mod schema;
pub mod row;
pub mod config;
pub mod lookup;

pub use error::{Error, Result};
pub use schema::{normalize_table_name, ColumnDef, ColumnType, TableSchema};
pub use row::{RowMap, ScalarValue};
pub use config::{ConfigError, LlmSettings, QuerySettings, ServerConfig, StorageConfig, TabletalkConfig};
pub use lookup::TableLookup;
