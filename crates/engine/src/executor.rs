//! Drop execution
//!
//! Batches run strictly in order on a single session. Each batch is bracketed
//! by constraint suspension and, where the vendor allows transactional DDL, by
//! `BEGIN`/`COMMIT`. The first failure aborts the run: earlier batches stay
//! dropped and later ones never start.

use serde::Serialize;

use crate::backends::DatabaseConnection;
use crate::dialect::DialectAdapter;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::ResetPhase;
use crate::plan::DropPlan;
use crate::progress::ProgressSink;
use crate::tables::TableDescriptor;

/// What the executor actually dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub batch_sizes: Vec<usize>,
    pub tables_dropped: usize,
}

/// Session state a failed batch may leave behind
#[derive(Debug, Default)]
struct BatchState {
    constraints_suspended: bool,
    in_transaction: bool,
}

pub struct DropExecutor<'a> {
    dialect: &'a dyn DialectAdapter,
    progress: Option<&'a dyn ProgressSink>,
}

impl<'a> DropExecutor<'a> {
    pub fn new(dialect: &'a dyn DialectAdapter) -> Self {
        Self {
            dialect,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Drop every batch of `plan` on `conn`. An empty plan issues nothing.
    pub async fn execute(
        &self,
        conn: &mut dyn DatabaseConnection,
        plan: &DropPlan,
    ) -> EngineResult<DropReport> {
        let mut report = DropReport::default();
        let total = plan.batch_count();

        for (batch_index, batch) in plan.batches().iter().enumerate() {
            let mut state = BatchState::default();

            if let Err(e) = self.drop_batch(conn, batch, &mut state).await {
                tracing::error!(batch_index, error = %e, "Drop batch failed, aborting");
                self.cleanup(conn, state).await;
                return Err(EngineError::DropFailure {
                    batch_index,
                    message: e.to_string(),
                });
            }

            report.batch_sizes.push(batch.len());
            report.tables_dropped += batch.len();

            tracing::info!(batch = batch_index + 1, total, tables = batch.len(), "Dropped batch");
            if let Some(progress) = self.progress {
                progress.on_phase(
                    ResetPhase::Dropping,
                    &format!("Dropped batch {}/{} ({} tables)", batch_index + 1, total, batch.len()),
                );
            }
        }

        Ok(report)
    }

    async fn drop_batch(
        &self,
        conn: &mut dyn DatabaseConnection,
        batch: &[TableDescriptor],
        state: &mut BatchState,
    ) -> EngineResult<()> {
        let transactional = self.dialect.supports_transactional_ddl();

        if let Some(sql) = self.dialect.disable_constraints_sql() {
            conn.execute(&sql).await?;
            state.constraints_suspended = true;
        }

        if transactional {
            conn.begin().await?;
            state.in_transaction = true;
        }

        for sql in self.dialect.drop_tables_sql(batch) {
            tracing::debug!(sql = %sql, "Executing drop");
            conn.execute(&sql).await?;
        }

        if transactional {
            conn.commit().await?;
            state.in_transaction = false;
        }

        if let Some(sql) = self.dialect.enable_constraints_sql() {
            conn.execute(&sql).await?;
            state.constraints_suspended = false;
        }

        Ok(())
    }

    /// Best-effort restore of the session after a failed batch. Never retried.
    async fn cleanup(&self, conn: &mut dyn DatabaseConnection, state: BatchState) {
        if state.in_transaction {
            if let Err(e) = conn.rollback().await {
                tracing::warn!(error = %e, "Rollback after failed drop batch failed");
            }
        }

        if state.constraints_suspended {
            if let Some(sql) = self.dialect.enable_constraints_sql() {
                if let Err(e) = conn.execute(&sql).await {
                    tracing::warn!(error = %e, "Could not re-enable constraints after failed drop batch");
                }
            }
        }
    }
}
