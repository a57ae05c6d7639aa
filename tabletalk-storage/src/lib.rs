pub mod catalog;
pub mod ingest;
pub mod sqlite_store;

pub use catalog::{TableCatalog, TableReadLease, TableWriteLease};
pub use ingest::{
    clean_column_name, generate_table_name, parse_csv, parse_excel, parse_upload, unique_suffix,
    validate_upload, Dataset, IngestOptions, ALLOWED_EXTENSIONS,
};
pub use sqlite_store::{quote_identifier, read_row, scalar_from_ref, SqliteStore};
