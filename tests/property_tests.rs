use proptest::prelude::*;
use tabletalk_core::{ColumnDef, ColumnType, TableSchema};
use tabletalk_query::{extract_candidate, validate, ValidationRejection, FORBIDDEN_KEYWORDS};
use tabletalk_storage::TableCatalog;

fn catalog() -> TableCatalog {
    let schema = TableSchema::new(
        "employees",
        vec![
            ColumnDef::new("name", ColumnType::Text),
            ColumnDef::new("salary", ColumnType::Integer),
            ColumnDef::new("department", ColumnType::Text),
        ],
    )
    .unwrap();
    TableCatalog::with_tables(vec![schema])
}

fn mixed_case(word: &str, mask: u32) -> String {
    word.chars()
        .enumerate()
        .map(|(i, c)| {
            if mask & (1 << (i % 32)) != 0 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn test_anything_after_a_terminator_is_a_second_statement(tail in "[a-z]{1,12}( [a-z0-9]{1,6}){0,3}") {
        let sql = format!("SELECT * FROM employees; {}", tail);
        prop_assert_eq!(validate(&sql, &catalog()), Err(ValidationRejection::MultipleStatements));
    }

    #[test]
    fn test_non_select_leading_word_is_not_read_only(verb in "[a-z]{1,10}") {
        prop_assume!(verb != "select");
        let sql = format!("{} * FROM employees", verb);
        let rejection = validate(&sql, &catalog()).unwrap_err();
        prop_assert_eq!(rejection, ValidationRejection::NotReadOnly { found: Some(verb) });
    }

    #[test]
    fn test_forbidden_word_anywhere_is_rejected(
        index in 0..FORBIDDEN_KEYWORDS.len(),
        mask in any::<u32>(),
    ) {
        let keyword = FORBIDDEN_KEYWORDS[index];
        let sql = format!(
            "SELECT name FROM employees WHERE {} = 1",
            mixed_case(keyword, mask)
        );
        prop_assert_eq!(
            validate(&sql, &catalog()),
            Err(ValidationRejection::ForbiddenKeyword(keyword.to_string()))
        );
    }

    #[test]
    fn test_unregistered_table_is_unknown(suffix in "[a-z]{1,8}") {
        let table = format!("zz_{}", suffix);
        let sql = format!("SELECT * FROM {}", table);
        prop_assert_eq!(validate(&sql, &catalog()), Err(ValidationRejection::UnknownTable(table)));
    }

    #[test]
    fn test_accepted_query_starts_with_select(
        column in prop::sample::select(vec!["name", "salary", "department", "*"]),
        limit in 1u32..500,
        mask in any::<u32>(),
        trailing in prop::sample::select(vec!["", ";", " ;\n", "\n"]),
    ) {
        let sql = format!(
            "{} {} FROM employees LIMIT {}{}",
            mixed_case("select", mask),
            column,
            limit,
            trailing
        );
        let query = validate(&sql, &catalog()).unwrap();
        prop_assert!(query.statement().to_ascii_lowercase().starts_with("select"));
        prop_assert!(!query.statement().ends_with(';'));
        prop_assert_eq!(query.tables(), &["employees".to_string()]);
    }

    #[test]
    fn test_extraction_never_panics(text in "\\PC{0,200}") {
        if let Ok(candidate) = extract_candidate(&text) {
            prop_assert!(!candidate.trim().is_empty());
        }
    }

    #[test]
    fn test_fenced_select_is_extracted(column in "[a-z]{1,8}", prose in "[A-Za-z ,.]{0,40}") {
        let text = format!("{}\n```sql\nSELECT {} FROM employees\n```\n", prose, column);
        prop_assert_eq!(
            extract_candidate(&text).unwrap(),
            format!("SELECT {} FROM employees", column)
        );
    }
}
