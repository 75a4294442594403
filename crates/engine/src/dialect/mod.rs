//! Vendor Dialect Adapters
//!
//! Everything vendor-specific about a reset is generated here: how to list
//! tables, how to suspend and restore foreign-key enforcement, and how to drop
//! a batch. The rest of the engine only sees [`DialectAdapter`].

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::fmt::Debug;
use std::sync::Arc;

use crate::backends::DatabaseBackendType;
use crate::descriptor::ConnectionDescriptor;
use crate::error::EngineResult;
use crate::tables::TableDescriptor;

/// SQL generation for one database vendor
pub trait DialectAdapter: Debug + Send + Sync {
    fn backend_type(&self) -> DatabaseBackendType;

    /// Query listing the tables of the current schema; the table name is the
    /// first column of each row
    fn enumerate_tables_sql(&self) -> String;

    /// Internal tables that must never be dropped
    fn is_system_table(&self, name: &str) -> bool;

    /// Statement suspending foreign-key enforcement, when the vendor needs one
    fn disable_constraints_sql(&self) -> Option<String>;

    /// Statement restoring foreign-key enforcement
    fn enable_constraints_sql(&self) -> Option<String>;

    /// Statements that drop one batch, in execution order
    fn drop_tables_sql(&self, batch: &[TableDescriptor]) -> Vec<String>;

    /// Whether DDL can be rolled back inside a transaction
    fn supports_transactional_ddl(&self) -> bool;

    /// Batch size used when the caller does not choose one (0 = unbatched)
    fn default_batch_size(&self) -> usize;

    fn quote_identifier(&self, name: &str) -> String;

    /// Single-value query estimating the data size in bytes
    fn data_size_sql(&self) -> String;

    /// Single-value query counting foreign-key constraints
    fn foreign_key_count_sql(&self) -> String;

    /// Statistics refresh run after the schema is rebuilt
    fn analyze_sql(&self) -> Option<String>;
}

/// Build the adapter for the descriptor's vendor.
///
/// Fails with `UnsupportedVendor` before anything touches the database.
pub fn adapter_for(
    descriptor: &ConnectionDescriptor,
    postgres_schema: &str,
) -> EngineResult<Arc<dyn DialectAdapter>> {
    let adapter: Arc<dyn DialectAdapter> = match descriptor.backend_type()? {
        DatabaseBackendType::PostgreSQL => Arc::new(PostgresDialect::new(postgres_schema)),
        DatabaseBackendType::MySQL => Arc::new(MySqlDialect::new()),
        DatabaseBackendType::SQLite => Arc::new(SqliteDialect::new()),
    };
    Ok(adapter)
}

/// Wrap `name` in `quote`, doubling any embedded quote characters
pub(crate) fn quote_with(name: &str, quote: char) -> String {
    let escaped = name.replace(quote, &format!("{quote}{quote}"));
    format!("{quote}{escaped}{quote}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_adapter_selection_by_vendor() {
        let pg = ConnectionDescriptor::from_url("postgres://localhost/app").unwrap();
        let my = ConnectionDescriptor::from_url("mysql://localhost/app").unwrap();
        let lite = ConnectionDescriptor::from_url("sqlite://app.db").unwrap();

        assert_eq!(adapter_for(&pg, "public").unwrap().backend_type(), DatabaseBackendType::PostgreSQL);
        assert_eq!(adapter_for(&my, "public").unwrap().backend_type(), DatabaseBackendType::MySQL);
        assert_eq!(adapter_for(&lite, "public").unwrap().backend_type(), DatabaseBackendType::SQLite);
    }

    #[test]
    fn test_unknown_vendor_fails_at_construction() {
        let descriptor = ConnectionDescriptor::from_url("oracle://localhost/app").unwrap();
        assert!(matches!(
            adapter_for(&descriptor, "public"),
            Err(EngineError::UnsupportedVendor(vendor)) if vendor == "oracle"
        ));
    }

    #[test]
    fn test_quote_doubles_embedded_quotes() {
        assert_eq!(quote_with("users", '"'), "\"users\"");
        assert_eq!(quote_with("we\"ird", '"'), "\"we\"\"ird\"");
        assert_eq!(quote_with("o`dd", '`'), "`o``dd`");
    }
}
