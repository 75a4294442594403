//! Planner statistics refresh

use async_trait::async_trait;

use super::{PostStep, PostStepOutcome};
use crate::backends::DatabaseConnection;
use crate::dialect::DialectAdapter;
use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeStep;

impl AnalyzeStep {
    pub const NAME: &'static str = "analyze";
}

#[async_trait]
impl PostStep for AnalyzeStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<PostStepOutcome> {
        match dialect.analyze_sql() {
            Some(sql) => {
                conn.execute(&sql).await?;
                Ok(PostStepOutcome::Completed("statistics refreshed".to_string()))
            }
            None => Ok(PostStepOutcome::Skipped(format!(
                "no statistics refresh for {}",
                dialect.backend_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect};
    use crate::fake::FakeDatabase;

    #[tokio::test]
    async fn test_analyze_per_vendor() {
        let db = FakeDatabase::with_tables(&[]);

        let pg = AnalyzeStep.run(&mut db.connection(), &PostgresDialect::default()).await.unwrap();
        assert!(matches!(pg, PostStepOutcome::Completed(_)));
        assert_eq!(db.statements(), vec!["ANALYZE"]);

        let mysql = AnalyzeStep.run(&mut db.connection(), &MySqlDialect::new()).await.unwrap();
        assert!(matches!(mysql, PostStepOutcome::Skipped(_)));
    }
}
