use std::collections::HashSet;

/// Resolves table names referenced by a query.
///
/// Names arrive as written in the query text; implementations compare them
/// case-insensitively.
pub trait TableLookup: Send + Sync {
    fn contains_table(&self, name: &str) -> bool;
}

impl TableLookup for HashSet<String> {
    fn contains_table(&self, name: &str) -> bool {
        self.iter().any(|t| t.eq_ignore_ascii_case(name))
    }
}

impl TableLookup for [&str] {
    fn contains_table(&self, name: &str) -> bool {
        self.iter().any(|t| t.eq_ignore_ascii_case(name))
    }
}

impl<T: TableLookup + ?Sized> TableLookup for &T {
    fn contains_table(&self, name: &str) -> bool {
        (**self).contains_table(name)
    }
}
