// Query validator - the only gate between a candidate query and storage

use crate::error::ValidationRejection;
use crate::lexer::{split_statements, tokenize, Token, TokenKind};
use sqlparser::ast::{ObjectName, Query, Visit, Visitor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use tabletalk_core::TableLookup;
use tracing::debug;

/// Words that may not appear anywhere outside string literals and quoted identifiers.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "create",
    "drop",
    "delete",
    "update",
    "insert",
    "alter",
    "truncate",
    "attach",
    "detach",
    "pragma",
    "exec",
    "execute",
    "grant",
    "revoke",
    "replace",
    "rename",
    "vacuum",
    "reindex",
    "analyze",
    "begin",
    "commit",
    "rollback",
    "savepoint",
    "merge",
    "upsert",
    "call",
    "copy",
    "into",
    "load_extension",
    "shutdown",
];

const READ_VERB: &str = "select";

/// Words that end a FROM/JOIN source list in the token-level fallback.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "group", "order", "limit", "offset", "having", "window", "join", "inner", "left",
    "right", "full", "outer", "cross", "natural", "on", "using", "union", "except", "intersect",
    "as", "select", "from", "values",
];

/// A candidate that passed every check. Only [`validate`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    statement: String,
    tables: Vec<String>,
}

impl ValidatedQuery {
    /// The candidate exactly as validated.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The single statement with its trailing terminator and comments removed.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Table names referenced by the statement.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

/// Decide whether `sql` may run. Checks run in order and stop at the first failure:
/// single statement, leading SELECT, forbidden keywords, known tables.
pub fn validate<L>(sql: &str, tables: &L) -> Result<ValidatedQuery, ValidationRejection>
where
    L: TableLookup + ?Sized,
{
    let tokens = tokenize(sql);
    let statements = split_statements(&tokens);

    if statements.len() > 1 {
        return Err(ValidationRejection::MultipleStatements);
    }

    let statement = match statements.first() {
        Some(statement) => *statement,
        None => return Err(ValidationRejection::NotReadOnly { found: None }),
    };

    let first = statement[0];
    if !first.is_word(READ_VERB) {
        return Err(ValidationRejection::NotReadOnly {
            found: Some(first.text.to_string()),
        });
    }

    if let Some(keyword) = find_forbidden_keyword(statement) {
        return Err(ValidationRejection::ForbiddenKeyword(keyword));
    }

    let statement_text = statement_span(sql, statement);
    let referenced = referenced_tables(statement_text, statement);
    for name in &referenced {
        if !tables.contains_table(name) {
            return Err(ValidationRejection::UnknownTable(name.clone()));
        }
    }

    debug!("validated query referencing {:?}", referenced);
    Ok(ValidatedQuery {
        sql: sql.to_string(),
        statement: statement_text.to_string(),
        tables: referenced,
    })
}

fn find_forbidden_keyword(statement: &[Token<'_>]) -> Option<String> {
    statement
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.text.to_ascii_lowercase())
        .find(|word| FORBIDDEN_KEYWORDS.contains(&word.as_str()))
}

/// Source text from the first to the last token of a statement.
fn statement_span<'a>(sql: &'a str, statement: &[Token<'_>]) -> &'a str {
    match (statement.first(), statement.last()) {
        (Some(first), Some(last)) => &sql[first.offset..last.end()],
        _ => "",
    }
}

/// Relation names in the statement, CTE names excluded, deduplicated in order of appearance.
pub fn referenced_tables(statement: &str, tokens: &[Token<'_>]) -> Vec<String> {
    let names = match Parser::parse_sql(&SQLiteDialect {}, statement) {
        Ok(parsed) => {
            let mut collector = RelationCollector::default();
            let _ = parsed.visit(&mut collector);
            collector.into_tables()
        }
        Err(e) => {
            debug!("parser rejected statement ({}); scanning tokens for table names", e);
            scan_table_refs(tokens)
        }
    };

    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|n| seen.insert(n.to_ascii_lowercase()))
        .collect()
}

/// Collects relation names, skipping names bound by a CTE in an enclosing query.
#[derive(Default)]
struct RelationCollector {
    relations: Vec<String>,
    scopes: Vec<HashSet<String>>,
}

impl RelationCollector {
    fn into_tables(self) -> Vec<String> {
        self.relations
    }

    fn is_cte(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.scopes.iter().any(|scope| scope.contains(&name))
    }
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let scope = query
            .with
            .as_ref()
            .map(|with| {
                with.cte_tables
                    .iter()
                    .map(|cte| cte.alias.name.value.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();
        self.scopes.push(scope);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(ident) = relation.0.last() {
            if relation.0.len() > 1 || !self.is_cte(&ident.value) {
                self.relations.push(ident.value.clone());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Names following FROM and JOIN, including comma-separated source lists.
fn scan_table_refs(tokens: &[Token<'_>]) -> Vec<String> {
    let mut refs = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if !(tokens[i].is_word("from") || tokens[i].is_word("join")) {
            i += 1;
            continue;
        }
        i += 1;

        while let Some((name, next)) = read_object_name(tokens, i) {
            refs.push(name);
            i = skip_alias(tokens, next);
            if tokens.get(i).map_or(false, |t| t.is_symbol(',')) {
                i += 1;
            } else {
                break;
            }
        }
    }

    refs
}

fn is_clause_keyword(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Word
        && CLAUSE_KEYWORDS
            .iter()
            .any(|k| token.text.eq_ignore_ascii_case(k))
}

/// Read `a`, `a.b` or quoted forms starting at `i`; returns the last segment.
fn read_object_name(tokens: &[Token<'_>], mut i: usize) -> Option<(String, usize)> {
    let token = tokens.get(i)?;
    // SQLite also accepts a string literal as a table name here.
    let nameable = token.is_identifier() || token.is_string_literal();
    if !nameable || is_clause_keyword(token) {
        return None;
    }
    let mut name = token.unquoted();
    i += 1;

    while tokens.get(i).map_or(false, |t| t.is_symbol('.')) {
        match tokens.get(i + 1) {
            Some(next) if next.is_identifier() => {
                name = next.unquoted();
                i += 2;
            }
            _ => break,
        }
    }

    Some((name, i))
}

fn skip_alias(tokens: &[Token<'_>], i: usize) -> usize {
    match tokens.get(i) {
        Some(t) if t.is_word("as") => i + 2,
        Some(t) if t.is_identifier() && !is_clause_keyword(t) => i + 1,
        _ => i,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &[&str] = &["employees", "Departments"];

    fn check(sql: &str) -> Result<ValidatedQuery, ValidationRejection> {
        validate(sql, CATALOG)
    }

    #[test]
    fn test_accepts_simple_select() {
        let validated = check("select * from employees where salary > 100000").unwrap();
        assert_eq!(validated.tables(), ["employees"]);
        assert_eq!(validated.statement(), "select * from employees where salary > 100000");
    }

    #[test]
    fn test_trailing_terminator_and_comment_allowed() {
        let validated = check("SELECT name FROM employees; -- done").unwrap();
        assert_eq!(validated.statement(), "SELECT name FROM employees");
        assert_eq!(validated.sql(), "SELECT name FROM employees; -- done");
    }

    #[test]
    fn test_chained_statement_rejected() {
        assert_eq!(
            check("SELECT * FROM employees; DROP TABLE employees"),
            Err(ValidationRejection::MultipleStatements)
        );
        assert_eq!(
            check("SELECT 1; SELECT 2"),
            Err(ValidationRejection::MultipleStatements)
        );
    }

    #[test]
    fn test_non_select_rejected() {
        assert_eq!(
            check("UPDATE employees SET salary = 0"),
            Err(ValidationRejection::NotReadOnly {
                found: Some("UPDATE".to_string())
            })
        );
        assert!(matches!(
            check("WITH x AS (SELECT 1) SELECT * FROM x"),
            Err(ValidationRejection::NotReadOnly { .. })
        ));
        assert!(matches!(
            check("  -- nothing here\n"),
            Err(ValidationRejection::NotReadOnly { found: None })
        ));
    }

    #[test]
    fn test_leading_comment_is_skipped() {
        assert!(check("/* report */ SELECT COUNT(*) FROM employees").is_ok());
    }

    #[test]
    fn test_forbidden_keyword_rejected() {
        assert_eq!(
            check("SELECT * FROM employees WHERE name IN (SELECT name FROM employees) OR 1=1 AND (DELETE)"),
            Err(ValidationRejection::ForbiddenKeyword("delete".to_string()))
        );
        assert_eq!(
            check("SELECT replace(name, 'a', 'b') FROM employees"),
            Err(ValidationRejection::ForbiddenKeyword("replace".to_string()))
        );
        assert_eq!(
            check("SELECT * INTO backup FROM employees"),
            Err(ValidationRejection::ForbiddenKeyword("into".to_string()))
        );
    }

    #[test]
    fn test_keywords_inside_literals_and_identifiers_ignored() {
        assert!(check("SELECT * FROM employees WHERE name = 'drop table; delete'").is_ok());
        assert!(check("SELECT \"update\" FROM employees").is_ok());
        assert!(check("SELECT updated_at, created_by FROM employees").is_ok());
    }

    #[test]
    fn test_unknown_table_rejected() {
        assert_eq!(
            check("SELECT * FROM customers"),
            Err(ValidationRejection::UnknownTable("customers".to_string()))
        );
        assert_eq!(
            check("SELECT * FROM employees e JOIN sqlite_master m ON 1=1"),
            Err(ValidationRejection::UnknownTable("sqlite_master".to_string()))
        );
    }

    #[test]
    fn test_table_names_case_insensitive_and_qualified() {
        assert!(check("SELECT * FROM EMPLOYEES").is_ok());
        assert!(check("SELECT * FROM main.\"employees\"").is_ok());
        assert!(check("SELECT * FROM departments d, employees e WHERE d.id = e.dept").is_ok());
    }

    #[test]
    fn test_subquery_cte_alias_is_not_a_table() {
        let sql = "SELECT * FROM (WITH high_paid AS (SELECT * FROM employees) SELECT * FROM high_paid)";
        let validated = check(sql).unwrap();
        assert_eq!(validated.tables(), ["employees"]);
    }

    #[test]
    fn test_cte_name_does_not_hide_outer_table() {
        let sql = "SELECT * FROM (WITH customers AS (SELECT 1) SELECT * FROM customers), customers";
        assert_eq!(
            check(sql),
            Err(ValidationRejection::UnknownTable("customers".to_string()))
        );
    }

    #[test]
    fn test_string_literal_table_name_checked() {
        assert_eq!(
            check("SELECT * FROM 'sqlite_master'"),
            Err(ValidationRejection::UnknownTable("sqlite_master".to_string()))
        );
    }

    #[test]
    fn test_no_table_reference_accepted() {
        assert!(check("SELECT 1").is_ok());
    }

    #[test]
    fn test_token_scan_fallback() {
        let tokens = tokenize("SELECT * FROM a x, \"b\" AS y JOIN main.c ON 1 WHERE z IN (SELECT 1 FROM d)");
        assert_eq!(scan_table_refs(&tokens), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_unparseable_statement_still_checked() {
        // SQLite-only syntax the parser may not accept still has its sources checked.
        assert_eq!(
            check("SELECT * FROM customers INDEXED BY idx"),
            Err(ValidationRejection::UnknownTable("customers".to_string()))
        );
    }
}
