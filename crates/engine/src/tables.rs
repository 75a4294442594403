//! Table enumeration

use serde::Serialize;

use crate::backends::DatabaseConnection;
use crate::dialect::DialectAdapter;
use crate::error::{EngineError, EngineResult};

/// A user table found by enumeration. Never cached between resets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TableDescriptor {
    name: String,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// List the user tables visible on `conn`, in the vendor's listing order.
///
/// System tables are filtered out. An empty schema yields an empty list.
pub async fn enumerate_tables(
    conn: &mut dyn DatabaseConnection,
    dialect: &dyn DialectAdapter,
) -> EngineResult<Vec<TableDescriptor>> {
    let sql = dialect.enumerate_tables_sql();
    tracing::debug!(sql = %sql, "Enumerating tables");

    let rows = conn.fetch_all(&sql).await.map_err(|e| match e {
        EngineError::Query(message) => EngineError::EnumerationFailure(message),
        other => other,
    })?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        match row.get_str(0) {
            Some(name) if dialect.is_system_table(name) => {
                tracing::debug!(table = name, "Skipping system table");
            }
            Some(name) => tables.push(TableDescriptor::new(name)),
            None => {
                return Err(EngineError::EnumerationFailure(format!(
                    "Unexpected row shape from table listing: {:?}",
                    row.column_names()
                )))
            }
        }
    }

    tracing::info!(count = tables.len(), vendor = %dialect.backend_type(), "Enumerated tables");
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::fake::{FakeDatabase, FakeScript};

    #[tokio::test]
    async fn test_enumeration_filters_system_tables() {
        let db = FakeDatabase::with_tables(&["users", "sqlite_stat1", "posts"]);
        let mut conn = db.connection();

        let tables = enumerate_tables(&mut conn, &SqliteDialect::new()).await.unwrap();
        let names: Vec<_> = tables.iter().map(TableDescriptor::name).collect();
        assert_eq!(names, vec!["users", "posts"]);
    }

    #[tokio::test]
    async fn test_postgres_keeps_tables_with_catalog_like_prefixes() {
        let db = FakeDatabase::with_tables(&["users", "sql_reports", "pg_audit"]);
        let mut conn = db.connection();

        let tables = enumerate_tables(&mut conn, &PostgresDialect::default()).await.unwrap();
        let mut names: Vec<_> = tables.iter().map(TableDescriptor::name).collect();
        names.sort();
        assert_eq!(names, vec!["pg_audit", "sql_reports", "users"]);
    }

    #[tokio::test]
    async fn test_empty_schema_is_not_an_error() {
        let db = FakeDatabase::with_tables(&[]);
        let mut conn = db.connection();

        let tables = enumerate_tables(&mut conn, &PostgresDialect::default()).await.unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_query_error_becomes_enumeration_failure() {
        let db = FakeDatabase::with_script(FakeScript {
            fail_enumeration: true,
            ..FakeScript::default()
        });
        let mut conn = db.connection();

        let result = enumerate_tables(&mut conn, &PostgresDialect::default()).await;
        assert!(matches!(result, Err(EngineError::EnumerationFailure(_))));
    }
}
