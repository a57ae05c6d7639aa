use crate::error::{QueryError, Result};
use crate::lexer::{first_terminator_end, tokenize, TokenKind};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tabletalk_core::TableSchema;
use tabletalk_llm::{LLMError, Prompt};

const INSTRUCTION: &str = "You are a SQL expert. Convert natural language questions to SQLite queries. \
Return ONLY one read-only SELECT statement that reads from the given table. \
Do not include explanations or markdown formatting.";

const SAMPLE_VALUE_CHARS: usize = 30;

/// Words that can open a statement, read-only or not. Extraction uses them to find
/// where the statement starts; deciding whether it may run is the validator's job.
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "EXPLAIN", "INSERT", "UPDATE", "DELETE", "REPLACE", "UPSERT",
    "MERGE", "DROP", "CREATE", "ALTER", "TRUNCATE", "ATTACH", "DETACH", "PRAGMA", "VACUUM",
    "REINDEX", "ANALYZE", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "GRANT",
    "REVOKE",
];

const LABELS: &[&str] = &["SQL Query:", "SQL:", "Query:"];

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    sample_rows: usize,
}

impl PromptBuilder {
    pub fn new(sample_rows: usize) -> Self {
        Self { sample_rows }
    }

    pub fn build(&self, question: &str, schema: &TableSchema) -> Result<Prompt> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::InvalidRequest("question cannot be empty".to_string()));
        }

        let columns: String = schema
            .columns
            .iter()
            .map(|c| format!("  - {} ({})\n", c.name, c.column_type))
            .collect();

        let body = format!(
            "Convert the following natural language question into a SQLite query.\n\n\
             Database Information:\nTable Name: {table}\n\nColumns:\n{columns}{samples}\n\
             Question: {question}\n\n\
             Important Instructions:\n\
             1. Return ONLY the SQL query, nothing else\n\
             2. Use SQLite syntax\n\
             3. Use proper column names from the schema\n\
             4. Only a single SELECT on table {table} is allowed (no DROP/DELETE/UPDATE/INSERT)\n\
             5. Handle case-insensitive searches with LOWER() if needed\n\
             6. Do not include any markdown formatting or explanations\n\n\
             SQL Query:",
            table = schema.name,
            columns = columns,
            samples = self.sample_table(schema),
            question = question,
        );

        Ok(Prompt {
            instruction: INSTRUCTION.to_string(),
            body,
        })
    }

    /// Markdown table of the first sample rows, or nothing when there are none to show.
    fn sample_table(&self, schema: &TableSchema) -> String {
        let samples = &schema.sample_rows[..schema.sample_rows.len().min(self.sample_rows)];
        if samples.is_empty() {
            return String::new();
        }

        let names = schema.column_names();
        let rows: String = samples
            .iter()
            .map(|row| {
                let cells: Vec<String> = names
                    .iter()
                    .map(|name| {
                        let value = row.get(name).map(|v| v.render()).unwrap_or_default();
                        value.chars().take(SAMPLE_VALUE_CHARS).collect()
                    })
                    .collect();
                format!("| {} |\n", cells.join(" | "))
            })
            .collect();

        format!(
            "\nSample Data (first few rows):\n| {} |\n|{}|\n{}",
            names.join(" | "),
            vec!["---"; names.len()].join("|"),
            rows
        )
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pull the single candidate statement out of raw completion text.
///
/// The candidate starts at the first statement keyword whose span parses, so prose that
/// merely mentions a keyword is skipped. When nothing parses, the first line opening with a
/// keyword is taken as is and left for the validator to judge. A second statement further
/// on, separated from the first by prose, makes the completion ambiguous.
pub fn extract_candidate(text: &str) -> std::result::Result<String, LLMError> {
    if text.trim().is_empty() {
        return Err(LLMError::NoQueryFound);
    }

    let blocks: Vec<&str> = fenced_blocks(text)
        .into_iter()
        .filter(|block| locate(block).is_some())
        .collect();
    let source = match blocks.as_slice() {
        [] => text,
        [only] => *only,
        many => return Err(LLMError::AmbiguousCompletion(many.len())),
    };

    let span = locate(source).ok_or(LLMError::NoQueryFound)?;
    let others = count_statements(&source[span.end..]);
    if others > 0 {
        return Err(LLMError::AmbiguousCompletion(others + 1));
    }

    let candidate = source[span.start..span.end].trim();
    if candidate.is_empty() {
        return Err(LLMError::NoQueryFound);
    }
    Ok(candidate.to_string())
}

/// Byte range of a candidate within its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

fn locate(text: &str) -> Option<Span> {
    keyword_offsets(text)
        .into_iter()
        .find_map(|start| parsed_span(text, start))
        .or_else(|| line_starts(text).first().map(|&start| raw_span(text, start)))
}

/// Statements that open a line of `text`, each counted once.
fn count_statements(text: &str) -> usize {
    let mut count = 0;
    let mut rest = text;
    while let Some(span) = line_starts(rest)
        .into_iter()
        .find_map(|start| parsed_span(rest, start))
    {
        count += 1;
        rest = &rest[span.end..];
    }
    count
}

/// Span starting at `start` that the SQL parser accepts as a statement.
///
/// A terminator inside the paragraph ends the span, unless another statement follows it, in
/// which case the rest of the text is kept so the validator sees the chain. Without a
/// terminator the span is the longest run of whole lines in the paragraph that parses.
fn parsed_span(text: &str, start: usize) -> Option<Span> {
    let rest = &text[start..];
    let paragraph_end = paragraph_end(rest);

    if let Some(end) = first_terminator_end(rest).filter(|&end| end <= paragraph_end) {
        if !parses(&rest[..end]) {
            return None;
        }
        let end = if chains(&rest[end..]) { rest.len() } else { end };
        return Some(Span { start, end: start + end });
    }

    let mut line_ends = Vec::new();
    let mut offset = 0;
    for line in rest[..paragraph_end].split_inclusive('\n') {
        offset += line.len();
        line_ends.push(offset);
    }
    line_ends
        .into_iter()
        .rev()
        .find(|&end| parses(&rest[..end]))
        .map(|end| Span { start, end: start + end })
}

/// Span for a statement the parser could not read: up to the first terminator in the
/// paragraph, or the whole paragraph.
fn raw_span(text: &str, start: usize) -> Span {
    let rest = &text[start..];
    let paragraph_end = paragraph_end(rest);
    let end = match first_terminator_end(rest) {
        Some(end) if end <= paragraph_end => {
            if opens_statement(&rest[end..]) {
                rest.len()
            } else {
                end
            }
        }
        _ => paragraph_end,
    };
    Span { start, end: start + end }
}

fn parses(sql: &str) -> bool {
    Parser::parse_sql(&SQLiteDialect {}, sql).map_or(false, |statements| !statements.is_empty())
}

/// Byte offsets of every whole-word statement keyword, in order.
fn keyword_offsets(text: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut word_start = None;
    for (idx, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        match (word_start, is_word_char(c)) {
            (None, true) => word_start = Some(idx),
            (Some(start), false) => {
                if is_statement_keyword(&text[start..idx]) {
                    offsets.push(start);
                }
                word_start = None;
            }
            _ => {}
        }
    }
    offsets
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || !c.is_ascii()
}

/// Contents of every ``` fenced block, info string removed. An unclosed fence runs to the end.
fn fenced_blocks(text: &str) -> Vec<&str> {
    text.split("```")
        .skip(1)
        .step_by(2)
        .map(|block| match block.split_once('\n') {
            Some((info, body)) if !info.trim().contains(char::is_whitespace) => body,
            _ => block,
        })
        .collect()
}

/// Byte offsets of statement keywords that open a line, after an optional label.
fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let mut pos = offset + (line.len() - trimmed.len());
        let mut content = trimmed;

        if let Some(label) = LABELS
            .iter()
            .find(|label| starts_with_ignore_case(content, label))
        {
            let after = &content[label.len()..];
            let after_trimmed = after.trim_start();
            pos += label.len() + (after.len() - after_trimmed.len());
            content = after_trimmed;
        }

        let word = match content.find(|c: char| !is_word_char(c)) {
            Some(end) => &content[..end],
            None => content,
        };
        if is_statement_keyword(word) {
            starts.push(pos);
        }
        offset += line.len();
    }
    starts
}

/// Length of the first paragraph: everything before the first blank line.
fn paragraph_end(text: &str) -> usize {
    let mut end = 0;
    for line in text.split_inclusive('\n') {
        if end > 0 && line.trim().is_empty() {
            break;
        }
        end += line.len();
    }
    end
}

/// Whether `text` begins with another statement the parser accepts.
fn chains(text: &str) -> bool {
    tokenize(text)
        .first()
        .filter(|t| t.kind == TokenKind::Word && is_statement_keyword(t.text))
        .map_or(false, |t| parsed_span(text, t.offset).is_some())
}

fn opens_statement(text: &str) -> bool {
    tokenize(text)
        .first()
        .map_or(false, |t| t.kind == TokenKind::Word && is_statement_keyword(t.text))
}

fn is_statement_keyword(word: &str) -> bool {
    STATEMENT_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletalk_core::{ColumnDef, ColumnType, RowMap, ScalarValue};

    fn employees() -> TableSchema {
        let mut row = RowMap::new();
        row.push("name", ScalarValue::from("alice"));
        row.push("salary", ScalarValue::Integer(120000));
        row.push("notes", ScalarValue::from("x".repeat(80)));
        TableSchema::new(
            "employees",
            vec![
                ColumnDef::new("name", ColumnType::Text),
                ColumnDef::new("salary", ColumnType::Integer),
                ColumnDef::new("notes", ColumnType::Text),
            ],
        )
        .unwrap()
        .with_sample_rows(vec![row.clone(), row.clone(), row.clone(), row])
    }

    #[test]
    fn test_prompt_lists_schema_and_question() {
        let prompt = PromptBuilder::new(2)
            .build("  who earns more than 100k?  ", &employees())
            .unwrap();

        assert!(prompt.instruction.contains("SELECT"));
        assert!(prompt.body.contains("Table Name: employees"));
        assert!(prompt.body.contains("  - name (TEXT)"));
        assert!(prompt.body.contains("  - salary (INTEGER)"));
        assert!(prompt.body.contains("| name | salary | notes |"));
        assert!(prompt.body.contains("Question: who earns more than 100k?\n"));
        assert!(prompt.body.contains("LOWER()"));
        assert!(prompt.body.ends_with("SQL Query:"));
        assert_eq!(prompt.body.matches("| alice |").count(), 2);
    }

    #[test]
    fn test_sample_values_are_truncated() {
        let prompt = PromptBuilder::default().build("q", &employees()).unwrap();
        assert!(prompt.body.contains(&format!("| {} |", "x".repeat(30))));
        assert!(!prompt.body.contains(&"x".repeat(31)));
    }

    #[test]
    fn test_no_samples_section_when_disabled() {
        let prompt = PromptBuilder::new(0).build("q", &employees()).unwrap();
        assert!(!prompt.body.contains("Sample Data"));
    }

    #[test]
    fn test_empty_question_is_invalid() {
        let err = PromptBuilder::default().build("   ", &employees()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn test_extract_plain_statement() {
        assert_eq!(
            extract_candidate("SELECT * FROM employees WHERE salary > 100000;").unwrap(),
            "SELECT * FROM employees WHERE salary > 100000;"
        );
    }

    #[test]
    fn test_extract_from_fenced_block() {
        let text = "Here you go:\n```sql\nSELECT name FROM employees;\n```\nThis lists names.";
        assert_eq!(extract_candidate(text).unwrap(), "SELECT name FROM employees;");
    }

    #[test]
    fn test_extract_ignores_fenced_blocks_without_statements() {
        let text = "```text\nresult table\n```\n```sql\nSELECT 1;\n```";
        assert_eq!(extract_candidate(text).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_two_statement_blocks_are_ambiguous() {
        let text = "```sql\nSELECT 1;\n```\nor\n```sql\nSELECT 2;\n```";
        assert!(matches!(
            extract_candidate(text),
            Err(LLMError::AmbiguousCompletion(2))
        ));
    }

    #[test]
    fn test_extract_after_label() {
        assert_eq!(
            extract_candidate("SQL Query: SELECT COUNT(*) FROM employees").unwrap(),
            "SELECT COUNT(*) FROM employees"
        );
        assert_eq!(
            extract_candidate("Query:\nselect 1").unwrap(),
            "select 1"
        );
    }

    #[test]
    fn test_prose_after_terminator_is_dropped() {
        let text = "SELECT name FROM employees; This returns every name.";
        assert_eq!(extract_candidate(text).unwrap(), "SELECT name FROM employees;");
    }

    #[test]
    fn test_chained_statements_are_kept_whole() {
        let text = "SELECT * FROM employees; DROP TABLE employees;";
        assert_eq!(extract_candidate(text).unwrap(), text);

        let text = "SELECT 1;\n\nDELETE FROM employees";
        assert_eq!(extract_candidate(text).unwrap(), text);
    }

    #[test]
    fn test_semicolon_in_literal_does_not_end_statement() {
        let text = "SELECT * FROM employees WHERE name = 'a;b'; done";
        assert_eq!(
            extract_candidate(text).unwrap(),
            "SELECT * FROM employees WHERE name = 'a;b';"
        );
    }

    #[test]
    fn test_unterminated_statement_ends_at_blank_line() {
        let text = "SELECT name\nFROM employees\n\nIt's sorted; enjoy.";
        assert_eq!(extract_candidate(text).unwrap(), "SELECT name\nFROM employees");
    }

    #[test]
    fn test_non_select_statement_is_still_extracted() {
        assert_eq!(
            extract_candidate("UPDATE employees SET salary = 0").unwrap(),
            "UPDATE employees SET salary = 0"
        );
    }

    #[test]
    fn test_nothing_to_extract() {
        assert!(matches!(extract_candidate(""), Err(LLMError::NoQueryFound)));
        assert!(matches!(extract_candidate("  \n "), Err(LLMError::NoQueryFound)));
        assert!(matches!(
            extract_candidate("I cannot answer that question."),
            Err(LLMError::NoQueryFound)
        ));
    }

    #[test]
    fn test_keyword_must_be_a_whole_word() {
        assert!(matches!(
            extract_candidate("Selection criteria unclear"),
            Err(LLMError::NoQueryFound)
        ));
    }

    #[test]
    fn test_statement_after_inline_prose() {
        assert_eq!(
            extract_candidate("The query is: SELECT * FROM employees;").unwrap(),
            "SELECT * FROM employees;"
        );
        assert_eq!(
            extract_candidate("You can select them with: SELECT name FROM employees").unwrap(),
            "SELECT name FROM employees"
        );
    }

    #[test]
    fn test_prose_line_opening_with_keyword_is_skipped() {
        let text = "With pleasure! Here's the query:\nSELECT * FROM employees;";
        assert_eq!(extract_candidate(text).unwrap(), "SELECT * FROM employees;");

        let text = "Select the rows you need:\n\nSELECT name\nFROM employees\nWHERE salary > 10";
        assert_eq!(
            extract_candidate(text).unwrap(),
            "SELECT name\nFROM employees\nWHERE salary > 10"
        );
    }

    #[test]
    fn test_statements_separated_by_prose_are_ambiguous() {
        let text = "SELECT name FROM employees;\nAlternatively:\nSELECT * FROM employees;";
        assert!(matches!(
            extract_candidate(text),
            Err(LLMError::AmbiguousCompletion(2))
        ));

        let text = "SELECT 1;\nor\nSQL: SELECT 2;\nor even\nSELECT 3";
        assert!(matches!(
            extract_candidate(text),
            Err(LLMError::AmbiguousCompletion(3))
        ));
    }

    #[test]
    fn test_trailing_prose_with_keyword_is_not_a_second_statement() {
        let text = "SELECT name FROM employees;\nSelect a different column to see more.";
        assert_eq!(extract_candidate(text).unwrap(), "SELECT name FROM employees;");
    }

    #[test]
    fn test_unparseable_statement_falls_back_to_line_start() {
        let text = "Here it is:\nSELECT name FROM employees WHERE salary >;";
        assert_eq!(
            extract_candidate(text).unwrap(),
            "SELECT name FROM employees WHERE salary >;"
        );
    }

    #[test]
    fn test_keyword_offsets_are_whole_words() {
        let text = "Selecting: select x, deleted; UPDATE";
        assert_eq!(keyword_offsets(text), vec![11, 30]);
    }
}
