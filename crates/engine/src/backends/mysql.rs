//! MySQL Backend Implementation
//!
//! MySQL-specific implementation of the database backend traits using
//! sqlx as the underlying driver. Statements are sent as plain SQL strings,
//! which sqlx sends as text-protocol queries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Executor, MySql, Pool};

use super::core::*;
use super::{decode_row, DatabaseBackendType};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EngineError, EngineResult};

/// MySQL database backend implementation
#[derive(Debug, Default)]
pub struct MySqlBackend;

impl MySqlBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    async fn create_pool(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &DatabasePoolConfig,
    ) -> EngineResult<Arc<dyn DatabasePool>> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(descriptor.url())
            .await
            .map_err(|e| {
                EngineError::ConnectionFailure(format!("Failed to create MySQL pool: {}", e))
            })?;

        Ok(Arc::new(MySqlPool::new(pool)))
    }
}

/// MySQL connection pool implementation
pub struct MySqlPool {
    pool: Pool<MySql>,
}

impl MySqlPool {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for MySqlPool {
    async fn acquire(&self) -> EngineResult<Box<dyn DatabaseConnection>> {
        let conn = self.pool.acquire().await.map_err(|e| {
            EngineError::ConnectionFailure(format!("Failed to acquire connection: {}", e))
        })?;

        Ok(Box::new(MySqlConnection { conn }))
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

/// A pooled MySQL session
pub struct MySqlConnection {
    conn: PoolConnection<MySql>,
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
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
