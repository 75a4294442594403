//! Core Database Backend Traits
//!
//! The engine never talks to a driver directly. It acquires a
//! [`DatabaseConnection`] from a [`DatabasePool`] created by the
//! [`DatabaseBackend`] registered for the descriptor's vendor. Keeping one
//! connection per phase matters: constraint suspension on MySQL and SQLite is
//! scoped to the session that issued it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::DatabaseBackendType;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EngineError, EngineResult};

/// A single database session
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute a statement and return the affected rows count
    async fn execute(&mut self, sql: &str) -> EngineResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, sql: &str) -> EngineResult<Vec<DatabaseRow>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(&mut self, sql: &str) -> EngineResult<Option<DatabaseRow>> {
        Ok(self.fetch_all(sql).await?.into_iter().next())
    }

    /// First column of the first row as an integer, if any
    async fn fetch_scalar_i64(&mut self, sql: &str) -> EngineResult<Option<i64>> {
        Ok(self
            .fetch_optional(sql)
            .await?
            .and_then(|row| row.get_i64(0)))
    }

    async fn begin(&mut self) -> EngineResult<()> {
        self.execute("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> EngineResult<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a dedicated connection from the pool
    async fn acquire(&self) -> EngineResult<Box<dyn DatabaseConnection>>;

    /// Round-trip a trivial query and report how long it took
    async fn health_check(&self) -> EngineResult<Duration>;

    /// Close the pool
    async fn close(&self);

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;
}

/// Database pool statistics
#[derive(Debug, Clone, Default)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
}

/// Driver entry point for one vendor
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    fn backend_type(&self) -> DatabaseBackendType;

    /// Create a connection pool for the descriptor
    async fn create_pool(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &DatabasePoolConfig,
    ) -> EngineResult<Arc<dyn DatabasePool>>;
}

/// Pool sizing used for a reset run
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            // One session for the drop/replay phases plus one per concurrent post step
            max_connections: 5,
            acquire_timeout_seconds: 30,
        }
    }
}

/// Database value as decoded from a result row
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value. Text is parsed, floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Float64(f) => Some(*f as i64),
            DatabaseValue::Bool(b) => Some(i64::from(*b)),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::Null => None,
        }
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

/// A decoded result row
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    /// Build a row of unnamed columns
    pub fn from_values(values: Vec<DatabaseValue>) -> Self {
        let columns = (0..values.len()).map(|i| format!("column_{}", i)).collect();
        Self { columns, values }
    }

    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|index| self.values.get(index))
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get_by_index(index).and_then(DatabaseValue::as_str)
    }

    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get_by_index(index).and_then(DatabaseValue::as_i64)
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }
}

/// Registry of the backends available to the engine
#[derive(Clone, Default)]
pub struct DatabaseBackendRegistry {
    backends: HashMap<DatabaseBackendType, Arc<dyn DatabaseBackend>>,
}

impl DatabaseBackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the sqlx backends for PostgreSQL, MySQL and SQLite
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::PostgresBackend::new()));
        registry.register(Arc::new(super::MySqlBackend::new()));
        registry.register(Arc::new(super::SqliteBackend::new()));
        registry
    }

    /// Register a backend, replacing any previous one for the same vendor
    pub fn register(&mut self, backend: Arc<dyn DatabaseBackend>) {
        self.backends.insert(backend.backend_type(), backend);
    }

    pub fn get(&self, backend_type: &DatabaseBackendType) -> Option<Arc<dyn DatabaseBackend>> {
        self.backends.get(backend_type).cloned()
    }

    /// Create a pool for the descriptor using the backend registered for its vendor
    pub async fn create_pool(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &DatabasePoolConfig,
    ) -> EngineResult<Arc<dyn DatabasePool>> {
        let backend_type = descriptor.backend_type()?;
        let backend = self.get(&backend_type).ok_or_else(|| {
            EngineError::ConnectionFailure(format!("No backend registered for {}", backend_type))
        })?;
        backend.create_pool(descriptor, config).await
    }
}

impl std::fmt::Debug for DatabaseBackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_integer_views() {
        assert_eq!(DatabaseValue::Int64(7).as_i64(), Some(7));
        assert_eq!(DatabaseValue::String(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(DatabaseValue::Float64(3.9).as_i64(), Some(3));
        assert_eq!(DatabaseValue::Null.as_i64(), None);
        assert_eq!(DatabaseValue::String("users".into()).as_i64(), None);
    }

    #[test]
    fn test_row_access_by_name_and_index() {
        let row = DatabaseRow::new(
            vec!["name".to_string(), "size".to_string()],
            vec!["users".into(), 1024i64.into()],
        );

        assert_eq!(row.get_str(0), Some("users"));
        assert_eq!(row.get_by_name("size"), Some(&DatabaseValue::Int64(1024)));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.column_count(), 2);
    }

    #[test]
    fn test_default_registry_covers_all_vendors() {
        let registry = DatabaseBackendRegistry::with_defaults();
        assert!(registry.get(&DatabaseBackendType::PostgreSQL).is_some());
        assert!(registry.get(&DatabaseBackendType::MySQL).is_some());
        assert!(registry.get(&DatabaseBackendType::SQLite).is_some());
    }
}
