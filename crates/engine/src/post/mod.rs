//! Post-processing steps
//!
//! Optional, independent tasks run after the schema is rebuilt. Each step gets
//! its own pooled connection and they run concurrently. A failing step is
//! reported but never cancels its siblings or fails the reset.

pub mod account;
pub mod analyze;
pub mod seed;

pub use account::{AccountProvisioner, ProvisionAccountStep, SqlAccountProvisioner};
pub use analyze::AnalyzeStep;
pub use seed::{RunSeedsStep, SeedOutcome, SeedRunner, SqlSeedRunner};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;

use crate::backends::{DatabaseConnection, DatabasePool};
use crate::dialect::DialectAdapter;
use crate::error::EngineResult;

/// What a step did when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStepOutcome {
    Completed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStepStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostStepReport {
    pub step: String,
    pub status: PostStepStatus,
    pub detail: String,
    pub elapsed_ms: u128,
}

impl PostStepReport {
    pub fn is_failure(&self) -> bool {
        self.status == PostStepStatus::Failed
    }
}

#[async_trait]
pub trait PostStep: Send + Sync {
    /// Name used in reports and in `skip_post_steps`
    fn name(&self) -> &str;

    async fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<PostStepOutcome>;
}

/// Run every step not named in `skip` concurrently, each on its own connection,
/// and wait for all of them
pub async fn run_post_steps(
    pool: &dyn DatabasePool,
    dialect: &dyn DialectAdapter,
    steps: &[Arc<dyn PostStep>],
    skip: &BTreeSet<String>,
) -> Vec<PostStepReport> {
    let runs = steps.iter().map(|step| async move {
        let start = Instant::now();

        if skip.contains(step.name()) {
            return PostStepReport {
                step: step.name().to_string(),
                status: PostStepStatus::Skipped,
                detail: "skipped by request".to_string(),
                elapsed_ms: 0,
            };
        }

        let result = match pool.acquire().await {
            Ok(mut conn) => step.run(conn.as_mut(), dialect).await,
            Err(e) => Err(e),
        };

        let (status, detail) = match result {
            Ok(PostStepOutcome::Completed(detail)) => (PostStepStatus::Completed, detail),
            Ok(PostStepOutcome::Skipped(reason)) => (PostStepStatus::Skipped, reason),
            Err(e) => {
                tracing::warn!(step = step.name(), error = %e, "Post-processing step failed");
                (PostStepStatus::Failed, e.to_string())
            }
        };

        PostStepReport {
            step: step.name().to_string(),
            status,
            detail,
            elapsed_ms: start.elapsed().as_millis(),
        }
    });

    join_all(runs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::error::EngineError;
    use crate::fake::FakeDatabase;

    struct Scripted {
        name: &'static str,
        result: Result<PostStepOutcome, EngineError>,
    }

    #[async_trait]
    impl PostStep for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(
            &self,
            conn: &mut dyn DatabaseConnection,
            _dialect: &dyn DialectAdapter,
        ) -> EngineResult<PostStepOutcome> {
            conn.execute(&format!("-- {}", self.name)).await?;
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let db = FakeDatabase::with_tables(&[]);
        let pool = db.pool();
        let steps: Vec<Arc<dyn PostStep>> = vec![
            Arc::new(Scripted {
                name: "broken",
                result: Err(EngineError::Query("constraint violation".to_string())),
            }),
            Arc::new(Scripted {
                name: "fine",
                result: Ok(PostStepOutcome::Completed("done".to_string())),
            }),
        ];

        let reports = run_post_steps(&pool, &SqliteDialect::new(), &steps, &BTreeSet::new()).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status, PostStepStatus::Failed);
        assert!(reports[0].detail.contains("constraint violation"));
        assert_eq!(reports[1].status, PostStepStatus::Completed);
        assert_eq!(db.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_skipped_steps_never_run() {
        let db = FakeDatabase::with_tables(&[]);
        let pool = db.pool();
        let steps: Vec<Arc<dyn PostStep>> = vec![Arc::new(Scripted {
            name: "seed",
            result: Ok(PostStepOutcome::Completed("seeded".to_string())),
        })];
        let skip = BTreeSet::from(["seed".to_string()]);

        let reports = run_post_steps(&pool, &SqliteDialect::new(), &steps, &skip).await;

        assert_eq!(reports[0].status, PostStepStatus::Skipped);
        assert!(db.statements().is_empty());
    }
}
