// Validator behaviour against a catalog-backed table lookup

mod common;

use tabletalk_query::{validate, ValidationRejection};
use tabletalk_storage::TableCatalog;

fn catalog() -> TableCatalog {
    TableCatalog::with_tables(vec![common::employees_fixture().schema])
}

#[test]
fn test_employees_select_is_accepted() {
    let catalog = catalog();
    let query = validate("select * from employees where salary > 100000", &catalog).unwrap();
    assert_eq!(query.tables(), &["employees".to_string()]);
    assert_eq!(query.sql(), "select * from employees where salary > 100000");
}

#[test]
fn test_chained_drop_is_rejected() {
    let catalog = catalog();
    assert_eq!(
        validate("SELECT * FROM employees; DROP TABLE employees", &catalog).unwrap_err(),
        ValidationRejection::MultipleStatements
    );
}

#[test]
fn test_update_is_not_read_only() {
    let catalog = catalog();
    assert_eq!(
        validate("UPDATE employees SET salary = 0", &catalog).unwrap_err(),
        ValidationRejection::NotReadOnly {
            found: Some("UPDATE".to_string())
        }
    );
}

#[test]
fn test_unknown_table_is_rejected() {
    let catalog = catalog();
    assert_eq!(
        validate("SELECT * FROM customers", &catalog).unwrap_err(),
        ValidationRejection::UnknownTable("customers".to_string())
    );
}

#[test]
fn test_smuggled_mutation_is_caught_by_keyword_scan() {
    let catalog = catalog();
    let err = validate(
        "SELECT * FROM employees WHERE name IN (SELECT name FROM employees) AND 1 = (DELETE FROM employees)",
        &catalog,
    )
    .unwrap_err();
    assert_eq!(err, ValidationRejection::ForbiddenKeyword("delete".to_string()));
}

#[test]
fn test_keyword_inside_string_literal_is_allowed() {
    let catalog = catalog();
    assert!(validate("SELECT * FROM employees WHERE department = 'drop zone'", &catalog).is_ok());
}

#[test]
fn test_keyword_as_identifier_substring_is_allowed() {
    let catalog = catalog();
    assert!(validate("SELECT name AS updated_name FROM employees", &catalog).is_ok());
}

#[test]
fn test_trailing_terminator_is_allowed() {
    let catalog = catalog();
    let query = validate("SELECT COUNT(*) FROM employees;  \n", &catalog).unwrap();
    assert_eq!(query.statement(), "SELECT COUNT(*) FROM employees");
}

#[test]
fn test_leading_comment_is_skipped() {
    let catalog = catalog();
    assert!(validate("-- top earners\nSELECT name FROM employees", &catalog).is_ok());
    assert!(validate("/* x */ SELECT name FROM employees", &catalog).is_ok());
}

#[test]
fn test_after_unregister_table_is_unknown() {
    let catalog = catalog();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(catalog.unregister("employees")).unwrap();
    assert_eq!(
        validate("SELECT * FROM employees", &catalog).unwrap_err(),
        ValidationRejection::UnknownTable("employees".to_string())
    );
}
