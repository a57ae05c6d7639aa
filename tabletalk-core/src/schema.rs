use crate::error::{Error, Result};
use crate::row::RowMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Column type inferred for an uploaded dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Datetime,
}

impl ColumnType {
    /// SQLite storage class used when the table is created.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Datetime => "TEXT",
        }
    }

    /// Name shown to the completion service. Booleans and datetimes keep their logical
    /// type so the model knows to compare against 0/1 and ISO-8601 text.
    pub fn display_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Datetime => "DATETIME",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Catalog entry for one uploaded dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub row_count: u64,
    #[serde(default)]
    pub sample_rows: Vec<RowMap>,
    #[serde(default)]
    pub created_at: String,
}

impl TableSchema {
    /// Build a schema, rejecting empty names and duplicate column names.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::SchemaMismatch("table name cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::SchemaMismatch(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, name
                )));
            }
        }

        Ok(Self {
            name,
            columns,
            row_count: 0,
            sample_rows: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_sample_rows(mut self, sample_rows: Vec<RowMap>) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    /// Lookup key; table names resolve case-insensitively like SQLite identifiers.
    pub fn key(&self) -> String {
        normalize_table_name(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub fn normalize_table_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
