// Upload ingestion - CSV and Excel parsing, header cleaning, type inference, table naming

use calamine::{Data, DataType, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use tabletalk_core::{ColumnDef, ColumnType, Error, Result, RowMap, ScalarValue};
use tracing::debug;

pub const ALLOWED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

const MAX_TABLE_NAME_LEN: usize = 50;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%b %d, %Y", "%d %b %Y"];

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_bytes: usize,
    /// Non-empty values per column examined during inference
    pub inference_sample: usize,
    /// Share of sampled values that must conform for a typed column
    pub inference_threshold: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            inference_sample: 100,
            inference_threshold: 0.8,
        }
    }
}

/// Parsed upload: typed columns and rows in file order.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl Dataset {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First `limit` rows keyed by column name.
    pub fn preview(&self, limit: usize) -> Vec<RowMap> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.name.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Reject uploads by extension and size before parsing.
pub fn validate_upload(filename: &str, size: usize, options: &IngestOptions) -> Result<()> {
    match extension(filename) {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => {
            return Err(Error::Ingest(format!(
                "Invalid file type. Allowed: .{}",
                ALLOWED_EXTENSIONS.join(", .")
            )))
        }
    }

    if size == 0 {
        return Err(Error::Ingest("File is empty".to_string()));
    }

    if size > options.max_bytes {
        return Err(Error::Ingest(format!(
            "File exceeds maximum size of {}MB",
            options.max_bytes / (1024 * 1024)
        )));
    }

    Ok(())
}

/// Parse an upload by its extension: `.csv` as CSV, `.xlsx`/`.xls` as a workbook.
pub fn parse_upload(filename: &str, bytes: &[u8], options: &IngestOptions) -> Result<Dataset> {
    match extension(filename).as_deref() {
        Some("csv") => parse_csv(bytes, options),
        Some("xlsx") | Some("xls") => parse_excel(bytes, options),
        _ => Err(Error::Ingest(format!("Unsupported file type: {}", filename))),
    }
}

/// Parse CSV bytes into a typed dataset. Input that is not valid UTF-8 is read as Latin-1.
pub fn parse_csv(bytes: &[u8], options: &IngestOptions) -> Result<Dataset> {
    let text = decode(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::Ingest(format!("Error parsing file: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::Ingest(format!("Error parsing file: {}", e)))?;
        raw_rows.push(record.iter().map(|f| f.to_string()).collect());
    }

    build_dataset(headers, raw_rows, options)
}

/// Parse the first worksheet of an `.xlsx` or `.xls` workbook. The first row holds the headers
/// and rows with no values are skipped.
pub fn parse_excel(bytes: &[u8], options: &IngestOptions) -> Result<Dataset> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| Error::Ingest(format!("Error reading file: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Ingest("File is empty or contains no data".to_string()))?
        .map_err(|e| Error::Ingest(format!("Error reading file: {}", e)))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let headers = rows.next().unwrap_or_default();
    let raw_rows: Vec<Vec<String>> = rows
        .filter(|row| row.iter().any(|v| !v.trim().is_empty()))
        .collect();

    build_dataset(headers, raw_rows, options)
}

/// Cell rendered as the text a CSV export of the sheet would hold.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

fn build_dataset(
    headers: Vec<String>,
    raw_rows: Vec<Vec<String>>,
    options: &IngestOptions,
) -> Result<Dataset> {
    if headers.is_empty() || raw_rows.is_empty() {
        return Err(Error::Ingest("File is empty or contains no data".to_string()));
    }

    let names = dedupe_names(headers.iter().map(|h| clean_column_name(h)).collect());
    fn cell(row: &[String], idx: usize) -> &str {
        row.get(idx).map(String::as_str).unwrap_or("")
    }

    let mut columns = Vec::with_capacity(names.len());
    for (idx, name) in names.into_iter().enumerate() {
        let column_type = infer_column_type(raw_rows.iter().map(|r| cell(r, idx)), options);
        debug!("inferred column '{}' as {}", name, column_type);
        columns.push(ColumnDef::new(name, column_type));
    }

    let rows = raw_rows
        .iter()
        .map(|raw| {
            columns
                .iter()
                .enumerate()
                .map(|(idx, column)| convert_value(cell(raw, idx), column.column_type))
                .collect()
        })
        .collect();

    Ok(Dataset { columns, rows })
}

fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// SQLite-friendly column name: `[a-z0-9_]`, starting with a letter.
pub fn clean_column_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut name = replaced.trim_matches('_').to_string();

    if name.is_empty() {
        return "column".to_string();
    }

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name = format!("col_{}", name);
    }

    name.to_ascii_lowercase()
}

fn dedupe_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut n = 1;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        out.push(candidate);
    }
    out
}

/// Table name derived from an upload's filename.
pub fn generate_table_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name = format!("table_{}", name);
    }

    let mut name = name.to_ascii_lowercase();
    name.truncate(MAX_TABLE_NAME_LEN);
    name
}

/// Six hex characters appended when a generated name is already taken.
pub fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

pub fn infer_column_type<'a>(
    values: impl Iterator<Item = &'a str>,
    options: &IngestOptions,
) -> ColumnType {
    let sample: Vec<&str> = values
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .take(options.inference_sample)
        .collect();

    if sample.is_empty() {
        return ColumnType::Text;
    }

    let total = sample.len() as f64;
    let share = |count: usize| count as f64 / total;

    let datetimes = sample.iter().filter(|v| parse_datetime(v).is_some()).count();
    if share(datetimes) > options.inference_threshold {
        return ColumnType::Datetime;
    }

    let integers = sample.iter().filter(|v| parse_integer(v).is_some()).count();
    let numbers = sample.iter().filter(|v| parse_real(v).is_some()).count();
    if share(numbers) > options.inference_threshold {
        return if integers == numbers {
            ColumnType::Integer
        } else {
            ColumnType::Real
        };
    }

    let booleans = sample.iter().filter(|v| parse_boolean(v).is_some()).count();
    if share(booleans) > options.inference_threshold {
        return ColumnType::Boolean;
    }

    ColumnType::Text
}

/// Values that do not conform to the column type become NULL; empty text stays "".
pub fn convert_value(raw: &str, column_type: ColumnType) -> ScalarValue {
    let trimmed = raw.trim();
    let converted = match column_type {
        ColumnType::Text => return ScalarValue::Text(raw.to_string()),
        ColumnType::Integer => parse_integer(trimmed).map(ScalarValue::Integer),
        ColumnType::Real => parse_real(trimmed).map(ScalarValue::Real),
        ColumnType::Boolean => parse_boolean(trimmed).map(ScalarValue::Boolean),
        ColumnType::Datetime => parse_datetime(trimmed)
            .map(|dt| ScalarValue::Text(dt.format("%Y-%m-%dT%H:%M:%S").to_string())),
    };
    converted.unwrap_or(ScalarValue::Null)
}

fn parse_integer(value: &str) -> Option<i64> {
    value.parse::<i64>().ok()
}

fn parse_real(value: &str) -> Option<f64> {
    // Reject "inf"/"nan" spellings that f64::from_str accepts.
    if !value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
    {
        return None;
    }
    value.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}
