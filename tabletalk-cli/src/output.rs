// Plain-text rendering of server responses

use serde_json::Value;

const MAX_CELL_WIDTH: usize = 40;

/// Render a JSON value as a table cell.
pub fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_WIDTH {
        let mut cut: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
        cut.push('…');
        cut
    } else {
        text
    }
}

/// Box-free aligned table: header, separator, one line per row.
pub fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(value.chars().count());
            }
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}

/// Rows of `{column: value}` objects, in `columns` order.
pub fn object_rows(columns: &[String], rows: &[Value]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map(cell).unwrap_or_default())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_table_aligns_columns() {
        let columns = vec!["name".to_string(), "salary".to_string()];
        let rows = vec![
            vec!["alice".to_string(), "120000".to_string()],
            vec!["bo".to_string(), "1".to_string()],
        ];
        let table = render_table(&columns, &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "name  | salary");
        assert_eq!(lines[1], "------+-------");
        assert_eq!(lines[2], "alice | 120000");
        assert_eq!(lines[3], "bo    | 1");
    }

    #[test]
    fn test_cells() {
        assert_eq!(cell(&json!(null)), "NULL");
        assert_eq!(cell(&json!("x")), "x");
        assert_eq!(cell(&json!(1.5)), "1.5");
        assert_eq!(cell(&json!("y".repeat(100))).chars().count(), MAX_CELL_WIDTH);
    }

    #[test]
    fn test_object_rows_follow_column_order() {
        let columns = vec!["b".to_string(), "a".to_string()];
        let rows = vec![json!({"a": 1, "b": "two"})];
        assert_eq!(object_rows(&columns, &rows), vec![vec!["two".to_string(), "1".to_string()]]);
    }
}
