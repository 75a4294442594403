//! SQL file replayer
//!
//! Applies every pending migration file in order and records its id in the
//! tracking table. After a reset the tracking table is gone with everything
//! else, so all migrations apply; on a live schema only new ones do.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;

use super::definitions::{Migration, MigrationConfig, ReplaySummary};
use super::manager::MigrationManager;
use super::MigrationReplayer;
use crate::backends::{DatabaseBackendType, DatabaseConnection};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct SqlMigrationReplayer {
    manager: MigrationManager,
}

impl SqlMigrationReplayer {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            manager: MigrationManager::new(config),
        }
    }

    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    fn table(&self) -> &str {
        &self.manager.config().migrations_table
    }

    fn create_migrations_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                id VARCHAR(255) PRIMARY KEY, \
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                batch INTEGER NOT NULL\
            )",
            self.table()
        )
    }

    fn record_migration_sql(&self, migration_id: &str, batch: i64) -> String {
        format!(
            "INSERT INTO {} (id, batch) VALUES ('{}', {})",
            self.table(),
            migration_id.replace('\'', "''"),
            batch
        )
    }

    async fn applied_ids(&self, conn: &mut dyn DatabaseConnection) -> EngineResult<HashSet<String>> {
        let rows = conn
            .fetch_all(&format!("SELECT id FROM {}", self.table()))
            .await
            .map_err(|e| EngineError::ReplayFailure(format!("Failed to query applied migrations: {}", e)))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get_str(0).map(str::to_string))
            .collect())
    }

    async fn next_batch(&self, conn: &mut dyn DatabaseConnection) -> EngineResult<i64> {
        let latest = conn
            .fetch_scalar_i64(&format!("SELECT COALESCE(MAX(batch), 0) FROM {}", self.table()))
            .await
            .map_err(|e| EngineError::ReplayFailure(format!("Failed to read latest batch: {}", e)))?;

        Ok(latest.unwrap_or(0) + 1)
    }

    async fn apply(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &Migration,
        batch: i64,
        backend: DatabaseBackendType,
    ) -> EngineResult<()> {
        tracing::info!(id = %migration.id, name = %migration.name, "Applying migration");

        conn.begin().await?;

        let result = async {
            for statement in MigrationManager::split_sql_statements(&migration.up_sql, backend) {
                tracing::debug!(sql = %statement, "Executing migration statement");
                conn.execute(&statement).await?;
            }
            conn.execute(&self.record_migration_sql(&migration.id, batch)).await?;
            conn.commit().await
        }
        .await;

        if let Err(e) = result {
            if let Err(rollback_error) = conn.rollback().await {
                tracing::warn!(error = %rollback_error, "Rollback of failed migration failed");
            }
            return Err(EngineError::ReplayFailure(format!(
                "Migration {} failed: {}",
                migration.id, e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl MigrationReplayer for SqlMigrationReplayer {
    async fn replay(
        &self,
        descriptor: &ConnectionDescriptor,
        conn: &mut dyn DatabaseConnection,
    ) -> EngineResult<ReplaySummary> {
        let start = Instant::now();
        let backend = descriptor.backend_type()?;

        let migrations = self
            .manager
            .load_migrations()
            .map_err(|e| EngineError::ReplayFailure(e.to_string()))?;

        conn.execute(&self.create_migrations_table_sql())
            .await
            .map_err(|e| EngineError::ReplayFailure(format!("Failed to create migrations table: {}", e)))?;

        let applied = self.applied_ids(conn).await?;
        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|migration| !applied.contains(&migration.id))
            .collect();

        let mut summary = ReplaySummary {
            applied: Vec::with_capacity(pending.len()),
            skipped: migrations.len() - pending.len(),
            elapsed_ms: 0,
        };

        if !pending.is_empty() {
            let batch = self.next_batch(conn).await?;
            for migration in pending {
                self.apply(conn, migration, batch, backend).await?;
                summary.applied.push(migration.id.clone());
            }
        }

        summary.elapsed_ms = start.elapsed().as_millis();
        tracing::info!(
            applied = summary.applied_count(),
            skipped = summary.skipped,
            "Migration replay finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseValue;
    use crate::fake::{FakeDatabase, FakeScript};

    fn write_migrations(dir: &std::path::Path) {
        std::fs::write(
            dir.join("20240101_000000_create_users.sql"),
            "-- Up\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n-- Down\nDROP TABLE users;\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("20240102_000000_create_posts.sql"),
            "-- Up\nCREATE TABLE posts (id INTEGER PRIMARY KEY);\nCREATE TABLE tags (id INTEGER PRIMARY KEY);\n",
        )
        .unwrap();
    }

    fn replayer(dir: &std::path::Path) -> SqlMigrationReplayer {
        SqlMigrationReplayer::new(MigrationConfig {
            migrations_dir: dir.to_path_buf(),
            migrations_table: "dbfresh_migrations".to_string(),
        })
    }

    #[tokio::test]
    async fn test_replay_on_empty_schema_applies_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_migrations(dir.path());

        let db = FakeDatabase::with_tables(&[]);
        let mut conn = db.connection();
        let descriptor = ConnectionDescriptor::from_url("sqlite://app.db").unwrap();

        let summary = replayer(dir.path()).replay(&descriptor, &mut conn).await.unwrap();

        assert_eq!(
            summary.applied,
            vec!["20240101_000000_create_users", "20240102_000000_create_posts"]
        );
        assert_eq!(summary.skipped, 0);
        assert_eq!(db.tables(), vec!["dbfresh_migrations", "users", "posts", "tags"]);
        assert_eq!(db.statements_starting_with("INSERT INTO dbfresh_migrations").len(), 2);
    }

    #[tokio::test]
    async fn test_already_applied_migrations_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_migrations(dir.path());

        let db = FakeDatabase::with_script(FakeScript {
            tables: vec!["dbfresh_migrations".to_string(), "users".to_string()],
            query_results: vec![(
                "SELECT id FROM dbfresh_migrations".to_string(),
                vec![vec![DatabaseValue::from("20240101_000000_create_users")]],
            )],
            ..FakeScript::default()
        });
        let mut conn = db.connection();
        let descriptor = ConnectionDescriptor::from_url("sqlite://app.db").unwrap();

        let summary = replayer(dir.path()).replay(&descriptor, &mut conn).await.unwrap();
        assert_eq!(summary.applied, vec!["20240102_000000_create_posts"]);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_failing_statement_is_replay_failure_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        write_migrations(dir.path());

        let db = FakeDatabase::with_script(FakeScript {
            fail_statements_containing: vec!["CREATE TABLE posts".to_string()],
            ..FakeScript::default()
        });
        let mut conn = db.connection();
        let descriptor = ConnectionDescriptor::from_url("sqlite://app.db").unwrap();

        let result = replayer(dir.path()).replay(&descriptor, &mut conn).await;
        assert!(matches!(result, Err(EngineError::ReplayFailure(message)) if message.contains("create_posts")));
        assert_eq!(db.statements().last().map(String::as_str), Some("ROLLBACK"));
    }
}
