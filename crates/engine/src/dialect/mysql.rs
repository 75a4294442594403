//! MySQL / MariaDB dialect
//!
//! `DROP TABLE` does not cascade, so foreign-key checks are switched off for
//! the session around each batch. DDL commits implicitly on this engine.

use super::{quote_with, DialectAdapter};
use crate::backends::DatabaseBackendType;
use crate::tables::TableDescriptor;

#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl DialectAdapter for MySqlDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    fn enumerate_tables_sql(&self) -> String {
        "SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'".to_string()
    }

    fn is_system_table(&self, _name: &str) -> bool {
        // SHOW TABLES is already scoped to the connected database
        false
    }

    fn disable_constraints_sql(&self) -> Option<String> {
        Some("SET FOREIGN_KEY_CHECKS = 0".to_string())
    }

    fn enable_constraints_sql(&self) -> Option<String> {
        Some("SET FOREIGN_KEY_CHECKS = 1".to_string())
    }

    fn drop_tables_sql(&self, batch: &[TableDescriptor]) -> Vec<String> {
        if batch.is_empty() {
            return Vec::new();
        }

        let tables = batch
            .iter()
            .map(|table| self.quote_identifier(table.name()))
            .collect::<Vec<_>>()
            .join(", ");

        vec![format!("DROP TABLE IF EXISTS {}", tables)]
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn default_batch_size(&self) -> usize {
        100
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '`')
    }

    fn data_size_sql(&self) -> String {
        "SELECT CAST(COALESCE(SUM(data_length + index_length), 0) AS SIGNED) \
         FROM information_schema.tables WHERE table_schema = DATABASE()"
            .to_string()
    }

    fn foreign_key_count_sql(&self) -> String {
        "SELECT COUNT(*) FROM information_schema.table_constraints \
         WHERE constraint_type = 'FOREIGN KEY' AND table_schema = DATABASE()"
            .to_string()
    }

    fn analyze_sql(&self) -> Option<String> {
        // ANALYZE TABLE needs explicit table names
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_checks_bracket_the_drop() {
        let dialect = MySqlDialect::new();
        assert_eq!(
            dialect.disable_constraints_sql().as_deref(),
            Some("SET FOREIGN_KEY_CHECKS = 0")
        );
        assert_eq!(
            dialect.enable_constraints_sql().as_deref(),
            Some("SET FOREIGN_KEY_CHECKS = 1")
        );
        assert!(!dialect.supports_transactional_ddl());
    }

    #[test]
    fn test_drop_uses_backticks() {
        let dialect = MySqlDialect::new();
        let batch = vec![TableDescriptor::new("orders"), TableDescriptor::new("order items")];
        assert_eq!(
            dialect.drop_tables_sql(&batch),
            vec!["DROP TABLE IF EXISTS `orders`, `order items`".to_string()]
        );
    }
}
