// Download encodings for query results: CSV and Excel

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde_json::{Map, Value};
use tabletalk_core::{RowMap, ScalarValue};

const SHEET_NAME: &str = "Results";

/// Column names plus positional cell values, ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSheet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl ResultSheet {
    pub fn from_rows(columns: Vec<String>, rows: &[RowMap]) -> Self {
        Self {
            columns,
            rows: rows.iter().map(|row| row.values().cloned().collect()).collect(),
        }
    }

    /// Client-supplied row objects. Columns follow first appearance across all rows and
    /// missing keys become NULL.
    pub fn from_json(data: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for object in data {
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = data
            .iter()
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).map(json_scalar).unwrap_or(ScalarValue::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }
}

fn json_scalar(value: &Value) -> ScalarValue {
    match value {
        Value::Null => ScalarValue::Null,
        Value::Bool(b) => ScalarValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ScalarValue::Integer(i),
            None => n.as_f64().map(ScalarValue::Real).unwrap_or(ScalarValue::Null),
        },
        Value::String(s) => ScalarValue::Text(s.clone()),
        other => ScalarValue::Text(other.to_string()),
    }
}

pub fn to_csv(sheet: &ResultSheet) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&sheet.columns)?;
    for row in &sheet.rows {
        writer.write_record(row.iter().map(ScalarValue::render))?;
    }
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// Single-sheet workbook with a bold, frozen header row. NULL cells are left blank.
pub fn to_xlsx(sheet: &ResultSheet) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let header = Format::new().set_bold();
    for (col, name) in sheet.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header)?;
    }

    for (idx, row) in sheet.rows.iter().enumerate() {
        let r = idx as u32 + 1;
        for (col, value) in row.iter().enumerate() {
            let c = col as u16;
            match value {
                ScalarValue::Null => {}
                ScalarValue::Boolean(b) => {
                    worksheet.write_boolean(r, c, *b)?;
                }
                ScalarValue::Integer(i) => {
                    worksheet.write_number(r, c, *i as f64)?;
                }
                ScalarValue::Real(f) => {
                    worksheet.write_number(r, c, *f)?;
                }
                ScalarValue::Text(s) => {
                    worksheet.write_string(r, c, s)?;
                }
            }
        }
    }

    worksheet.set_freeze_panes(1, 0)?;
    workbook.save_to_buffer()
}
