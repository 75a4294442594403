//! PostgreSQL dialect
//!
//! Tables are listed from `pg_tables` in one schema and dropped with a single
//! `DROP TABLE ... CASCADE` per batch, so foreign keys never need suspending.

use super::{quote_with, DialectAdapter};
use crate::backends::DatabaseBackendType;
use crate::tables::TableDescriptor;

#[derive(Debug, Clone)]
pub struct PostgresDialect {
    schema: String,
}

impl PostgresDialect {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn schema_literal(&self) -> String {
        format!("'{}'", self.schema.replace('\'', "''"))
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new("public")
    }
}

impl DialectAdapter for PostgresDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn enumerate_tables_sql(&self) -> String {
        format!(
            "SELECT tablename::text FROM pg_tables WHERE schemaname = {} ORDER BY tablename",
            self.schema_literal()
        )
    }

    /// `pg_tables` is already scoped to one schema; nothing it returns there
    /// belongs to the catalog
    fn is_system_table(&self, _name: &str) -> bool {
        false
    }

    fn disable_constraints_sql(&self) -> Option<String> {
        None
    }

    fn enable_constraints_sql(&self) -> Option<String> {
        None
    }

    fn drop_tables_sql(&self, batch: &[TableDescriptor]) -> Vec<String> {
        if batch.is_empty() {
            return Vec::new();
        }

        let schema = self.quote_identifier(&self.schema);
        let tables = batch
            .iter()
            .map(|table| format!("{}.{}", schema, self.quote_identifier(table.name())))
            .collect::<Vec<_>>()
            .join(", ");

        vec![format!("DROP TABLE IF EXISTS {} CASCADE", tables)]
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
        "SELECT pg_database_size(current_database())".to_string()
    }

    fn foreign_key_count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM information_schema.table_constraints \
             WHERE constraint_type = 'FOREIGN KEY' AND table_schema = {}",
            self.schema_literal()
        )
    }

    fn analyze_sql(&self) -> Option<String> {
        Some("ANALYZE".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_is_scoped_to_schema() {
        let dialect = PostgresDialect::new("billing");
        let sql = dialect.enumerate_tables_sql();
        assert!(sql.contains("FROM pg_tables"));
        assert!(sql.contains("schemaname = 'billing'"));
    }

    #[test]
    fn test_one_cascading_drop_per_batch() {
        let dialect = PostgresDialect::default();
        let batch = vec![TableDescriptor::new("users"), TableDescriptor::new("posts")];

        assert_eq!(
            dialect.drop_tables_sql(&batch),
            vec![r#"DROP TABLE IF EXISTS "public"."users", "public"."posts" CASCADE"#.to_string()]
        );
        assert!(dialect.disable_constraints_sql().is_none());
        assert!(dialect.enable_constraints_sql().is_none());
    }

    #[test]
    fn test_schema_literal_is_escaped() {
        let dialect = PostgresDialect::new("o'brien");
        assert!(dialect.enumerate_tables_sql().contains("'o''brien'"));
    }
}
