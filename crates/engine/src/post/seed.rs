//! Seed execution
//!
//! Seeds are plain `.sql` files applied in filename order. Having no seed
//! files at all is a skip, not a failure.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{PostStep, PostStepOutcome};
use crate::backends::DatabaseConnection;
use crate::dialect::DialectAdapter;
use crate::error::{EngineError, EngineResult};
use crate::migrations::MigrationManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Ran { files: usize, statements: usize },
    /// No seed mechanism is available
    Unavailable(String),
}

#[async_trait]
pub trait SeedRunner: Send + Sync {
    async fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<SeedOutcome>;
}

#[derive(Debug, Clone)]
pub struct SqlSeedRunner {
    dir: PathBuf,
}

impl SqlSeedRunner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn seed_files(&self) -> EngineResult<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = std::fs::read_dir(&self.dir)
            .map_err(|e| seed_error(format!("Failed to read seeds directory: {}", e)))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }
}

fn seed_error(message: String) -> EngineError {
    EngineError::PostStep {
        step: RunSeedsStep::NAME.to_string(),
        message,
    }
}

#[async_trait]
impl SeedRunner for SqlSeedRunner {
    async fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<SeedOutcome> {
        let files = self.seed_files()?;
        if files.is_empty() {
            return Ok(SeedOutcome::Unavailable(format!(
                "no seed files in {}",
                self.dir.display()
            )));
        }

        let mut statements = 0;
        for file in &files {
            let sql = tokio::fs::read_to_string(file)
                .await
                .map_err(|e| seed_error(format!("Failed to read {}: {}", file.display(), e)))?;

            tracing::info!(file = %file.display(), "Running seed file");
            for statement in MigrationManager::split_sql_statements(&sql, dialect.backend_type()) {
                conn.execute(&statement).await?;
                statements += 1;
            }
        }

        Ok(SeedOutcome::Ran {
            files: files.len(),
            statements,
        })
    }
}

/// Post step wrapper around a [`SeedRunner`]
pub struct RunSeedsStep {
    runner: Arc<dyn SeedRunner>,
}

impl RunSeedsStep {
    pub const NAME: &'static str = "seed";

    pub fn new(runner: Arc<dyn SeedRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PostStep for RunSeedsStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<PostStepOutcome> {
        match self.runner.run(conn, dialect).await? {
            SeedOutcome::Ran { files, statements } => Ok(PostStepOutcome::Completed(format!(
                "{} seed files, {} statements",
                files, statements
            ))),
            SeedOutcome::Unavailable(reason) => Ok(PostStepOutcome::Skipped(reason)),
        }
    }
}
