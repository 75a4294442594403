//! SQLite dialect
//!
//! `PRAGMA foreign_keys` is a no-op inside a transaction, so the executor
//! issues it before `BEGIN` and after `COMMIT`.

use super::{quote_with, DialectAdapter};
use crate::backends::DatabaseBackendType;
use crate::tables::TableDescriptor;

#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl DialectAdapter for SqliteDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn enumerate_tables_sql(&self) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name != 'sqlite_sequence' ORDER BY name"
            .to_string()
    }

    fn is_system_table(&self, name: &str) -> bool {
        name.starts_with("sqlite_")
    }

    fn disable_constraints_sql(&self) -> Option<String> {
        Some("PRAGMA foreign_keys = OFF".to_string())
    }

    fn enable_constraints_sql(&self) -> Option<String> {
        Some("PRAGMA foreign_keys = ON".to_string())
    }

    fn drop_tables_sql(&self, batch: &[TableDescriptor]) -> Vec<String> {
        batch
            .iter()
            .map(|table| format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table.name())))
            .collect()
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn default_batch_size(&self) -> usize {
        0
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn data_size_sql(&self) -> String {
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()".to_string()
    }

    fn foreign_key_count_sql(&self) -> String {
        "SELECT COUNT(*) FROM sqlite_master AS m, pragma_foreign_key_list(m.name) AS fk \
         WHERE m.type = 'table'"
            .to_string()
    }

    fn analyze_sql(&self) -> Option<String> {
        Some("ANALYZE".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_tables_are_excluded() {
        let dialect = SqliteDialect::new();
        assert!(dialect.enumerate_tables_sql().contains("name != 'sqlite_sequence'"));
        assert!(dialect.is_system_table("sqlite_sequence"));
        assert!(dialect.is_system_table("sqlite_stat1"));
        assert!(!dialect.is_system_table("users"));
    }

    #[test]
    fn test_one_drop_statement_per_table() {
        let dialect = SqliteDialect::new();
        let batch = vec![TableDescriptor::new("a"), TableDescriptor::new("b")];
        assert_eq!(
            dialect.drop_tables_sql(&batch),
            vec![
                "DROP TABLE IF EXISTS \"a\"".to_string(),
                "DROP TABLE IF EXISTS \"b\"".to_string(),
            ]
        );
    }
}
