//! PostgreSQL Backend Implementation
//!
//! PostgreSQL-specific implementation of the database backend traits using
//! sqlx as the underlying driver. Statements are sent as plain SQL strings,
//! which sqlx runs through the simple query protocol.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, Pool, Postgres};

use super::core::*;
use super::{decode_row, DatabaseBackendType};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EngineError, EngineResult};

/// PostgreSQL database backend implementation
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn create_pool(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &DatabasePoolConfig,
    ) -> EngineResult<Arc<dyn DatabasePool>> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(descriptor.url())
            .await
            .map_err(|e| {
                EngineError::ConnectionFailure(format!("Failed to create PostgreSQL pool: {}", e))
            })?;

        Ok(Arc::new(PostgresPool::new(pool)))
    }
}

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> EngineResult<Box<dyn DatabaseConnection>> {
        let conn = self.pool.acquire().await.map_err(|e| {
            EngineError::ConnectionFailure(format!("Failed to acquire connection: {}", e))
        })?;

        Ok(Box::new(PostgresConnection { conn }))
    }

    async fn health_check(&self) -> EngineResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::ConnectionFailure(format!("Health check failed: {}", e)))?;

        Ok(start.elapsed())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats {
            total_connections: self.pool.size(),
            idle_connections: self.pool.num_idle() as u32,
        }
    }
}

/// A pooled PostgreSQL session
pub struct PostgresConnection {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str) -> EngineResult<u64> {
        let result = (&mut *self.conn)
            .execute(sql)
            .await
            .map_err(|e| EngineError::Query(format!("Statement failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str) -> EngineResult<Vec<DatabaseRow>> {
        let rows = (&mut *self.conn)
            .fetch_all(sql)
            .await
            .map_err(|e| EngineError::Query(format!("Query fetch failed: {}", e)))?;

        Ok(rows.iter().map(decode_row).collect())
    }
}
