//! Database Backend Abstractions
//!
//! This module provides database backend abstractions for the three supported
//! vendors (PostgreSQL, MySQL, SQLite) through common traits, with sqlx as the
//! underlying driver.

pub mod core;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use self::core::*;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use serde::Serialize;

use crate::error::EngineError;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pgsql" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" | "sqlite3" => Ok(DatabaseBackendType::SQLite),
            _ => Err(EngineError::UnsupportedVendor(s.to_string())),
        }
    }
}

/// Decode an sqlx row into a [`DatabaseRow`], trying integer, float, boolean,
/// text and raw bytes in that order for each column.
pub(crate) fn decode_row<'r, R>(row: &'r R) -> DatabaseRow
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
    i64: sqlx::Type<R::Database> + sqlx::Decode<'r, R::Database>,
    f64: sqlx::Type<R::Database> + sqlx::Decode<'r, R::Database>,
    bool: sqlx::Type<R::Database> + sqlx::Decode<'r, R::Database>,
    String: sqlx::Type<R::Database> + sqlx::Decode<'r, R::Database>,
    Vec<u8>: sqlx::Type<R::Database> + sqlx::Decode<'r, R::Database>,
{
    use sqlx::Column;

    let columns: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let values = (0..columns.len())
        .map(|index| {
            if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
                return value.map(DatabaseValue::Int64).unwrap_or(DatabaseValue::Null);
            }
            if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
                return value.map(DatabaseValue::Float64).unwrap_or(DatabaseValue::Null);
            }
            if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
                return value.map(DatabaseValue::Bool).unwrap_or(DatabaseValue::Null);
            }
            if let Ok(value) = row.try_get::<Option<String>, _>(index) {
                return value.map(DatabaseValue::String).unwrap_or(DatabaseValue::Null);
            }
            match row.try_get::<Option<Vec<u8>>, _>(index) {
                Ok(Some(bytes)) => DatabaseValue::String(String::from_utf8_lossy(&bytes).into_owned()),
                _ => DatabaseValue::Null,
            }
        })
        .collect();

    DatabaseRow::new(columns, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_aliases() {
        assert_eq!("postgres".parse::<DatabaseBackendType>().unwrap(), DatabaseBackendType::PostgreSQL);
        assert_eq!("MariaDB".parse::<DatabaseBackendType>().unwrap(), DatabaseBackendType::MySQL);
        assert_eq!("sqlite3".parse::<DatabaseBackendType>().unwrap(), DatabaseBackendType::SQLite);
    }

    #[test]
    fn test_unknown_vendor_is_unsupported() {
        match "oracle".parse::<DatabaseBackendType>() {
            Err(EngineError::UnsupportedVendor(vendor)) => assert_eq!(vendor, "oracle"),
            other => panic!("Expected UnsupportedVendor, got {:?}", other),
        }
    }
}
