// SQLite-backed table storage and persisted catalog metadata

use crate::ingest::Dataset;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabletalk_core::{ColumnDef, Error, Result, RowMap, ScalarValue, TableSchema};
use tracing::{debug, info, warn};

pub const METADATA_TABLE: &str = "_tabletalk_metadata";

/// Rows kept on each catalog entry for prompt grounding.
pub const SAMPLE_ROW_LIMIT: usize = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One SQLite database file holding every uploaded table plus catalog metadata.
///
/// Connections are opened per operation and dropped on return.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

fn db_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

impl SqliteStore {
    /// Open (creating if needed) the database file and its metadata table.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if path.is_dir() {
            return Err(Error::Storage(format!(
                "database path '{}' is a directory",
                path.display()
            )));
        }

        let store = Self { path };
        let conn = store.write_connection()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT PRIMARY KEY,
                row_count INTEGER NOT NULL,
                columns TEXT NOT NULL,
                sample_rows TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );",
            METADATA_TABLE
        ))
        .map_err(db_err)?;

        info!("opened table store at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_connection(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        Ok(conn)
    }

    /// A fresh connection that the engine itself refuses to write through.
    pub fn read_only_connection(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }

    /// Create or replace `name` with the dataset's rows and record its metadata.
    ///
    /// Callers hold the catalog's write lease for `name`.
    pub fn create_table(&self, name: &str, dataset: &Dataset) -> Result<TableSchema> {
        let schema = TableSchema::new(name, dataset.columns.clone())?;
        if schema.is_empty() {
            return Err(Error::SchemaMismatch(format!("table '{}' has no columns", name)));
        }

        let mut conn = self.write_connection()?;
        let tx = conn.transaction().map_err(db_err)?;

        let table = quote_identifier(name);
        let column_defs = dataset
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({column_defs});"
        ))
        .map_err(db_err)?;

        {
            let column_list = dataset
                .columns
                .iter()
                .map(|c| quote_identifier(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=dataset.columns.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let mut insert = tx
                .prepare(&format!(
                    "INSERT INTO {table} ({column_list}) VALUES ({placeholders})"
                ))
                .map_err(db_err)?;
            for row in &dataset.rows {
                insert
                    .execute(params_from_iter(row.iter().map(to_sql_value)))
                    .map_err(db_err)?;
            }
        }

        let schema = schema
            .with_row_count(dataset.rows.len() as u64)
            .with_sample_rows(dataset.preview(SAMPLE_ROW_LIMIT));

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (table_name, row_count, columns, sample_rows, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                METADATA_TABLE
            ),
            params![
                schema.name,
                schema.row_count as i64,
                serde_json::to_string(&schema.columns)?,
                serde_json::to_string(&schema.sample_rows)?,
                schema.created_at,
            ],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        info!(
            "stored table '{}' ({} rows, {} columns)",
            schema.name,
            schema.row_count,
            schema.len()
        );
        Ok(schema)
    }

    /// Drop a table and its metadata. Returns whether metadata existed.
    pub fn drop_table(&self, name: &str) -> Result<bool> {
        let mut conn = self.write_connection()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_identifier(name)))
            .map_err(db_err)?;
        let removed = tx
            .execute(
                &format!("DELETE FROM {} WHERE table_name = ?1 COLLATE NOCASE", METADATA_TABLE),
                params![name],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        debug!("dropped table '{}'", name);
        Ok(removed > 0)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.write_connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                params![name],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Catalog entries persisted by earlier runs, newest first.
    pub fn load_catalog(&self) -> Result<Vec<TableSchema>> {
        let conn = self.write_connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT table_name, row_count, columns, sample_rows, created_at
                 FROM {} ORDER BY created_at DESC",
                METADATA_TABLE
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut tables = Vec::new();
        for row in rows {
            let (name, row_count, columns, sample_rows, created_at) = row.map_err(db_err)?;
            let columns: Vec<ColumnDef> = match serde_json::from_str(&columns) {
                Ok(columns) => columns,
                Err(e) => {
                    warn!("skipping table '{}': unreadable column metadata: {}", name, e);
                    continue;
                }
            };
            let sample_rows: Vec<RowMap> = serde_json::from_str(&sample_rows).unwrap_or_default();
            tables.push(TableSchema {
                name,
                columns,
                row_count: row_count.max(0) as u64,
                sample_rows,
                created_at,
            });
        }

        info!("loaded {} table(s) from {}", tables.len(), self.path.display());
        Ok(tables)
    }

    /// First `limit` rows of a table, read through a read-only connection.
    pub fn preview(&self, name: &str, limit: usize) -> Result<Vec<RowMap>> {
        let conn = self.read_only_connection().map_err(db_err)?;
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} LIMIT {}", quote_identifier(name), limit))
            .map_err(db_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            out.push(read_row(row, &columns).map_err(db_err)?);
        }
        Ok(out)
    }
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &ScalarValue) -> Value {
    match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Integer(i) => Value::Integer(*i),
        ScalarValue::Real(r) => Value::Real(*r),
        ScalarValue::Text(s) => Value::Text(s.clone()),
        ScalarValue::Boolean(b) => Value::Integer(i64::from(*b)),
    }
}

/// Engine value to JSON-friendly scalar. Text that is not UTF-8 is decoded lossily.
pub fn scalar_from_ref(value: ValueRef<'_>) -> ScalarValue {
    match value {
        ValueRef::Null => ScalarValue::Null,
        ValueRef::Integer(i) => ScalarValue::Integer(i),
        ValueRef::Real(r) => ScalarValue::Real(r),
        ValueRef::Text(t) => ScalarValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => ScalarValue::from_blob(b),
    }
}

/// Convert one engine row into a `RowMap` keyed by `columns`, in order.
pub fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<RowMap> {
    let mut map = RowMap::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        map.push(name.clone(), scalar_from_ref(row.get_ref(idx)?));
    }
    Ok(map)
}
