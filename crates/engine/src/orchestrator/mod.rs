//! Reset Orchestrator
//!
//! Drives one reset through the state machine
//!
//! ```text
//! Idle → Validating → RiskAssessed → AwaitingConfirmation → BackingUp
//!      → Dropping → Replaying → PostProcessing → Succeeded
//! ```
//!
//! with `Failed` and `Cancelled` as the other terminal states. Nothing is
//! mutated before `Dropping`; a backup, when requested, must complete before
//! that phase is entered. Every transition is logged and reported to the
//! progress sink.

pub mod cancellation;
pub mod confirmation;
pub mod options;
pub mod state;

pub use cancellation::CancellationHandle;
pub use confirmation::{ConfirmationGate, ConfirmationRequest};
pub use options::ResetOptions;
pub use state::{PlanPreview, ResetOutcome, ResetPhase, ResetResult};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashSet;

use dbfresh_core::RiskConfig;

use crate::backends::{
    DatabaseBackendRegistry, DatabaseBackendType, DatabaseConnection, DatabasePool, DatabasePoolConfig,
};
use crate::backup::{default_backup_path, BackupProvider, BackupRecord, BackupStatus, ExternalBackup};
use crate::descriptor::ConnectionDescriptor;
use crate::dialect::{adapter_for, DialectAdapter};
use crate::error::{EngineError, EngineResult};
use crate::executor::DropExecutor;
use crate::migrations::MigrationReplayer;
use crate::plan::DropPlan;
use crate::post::{run_post_steps, PostStep};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::risk::{RiskAssessor, RiskSignals};
use crate::steps::{DurationEstimator, OperationStep, StaticEstimator, StepKind};
use crate::tables::enumerate_tables;

/// Removes the descriptor from the in-flight set when the reset ends
struct InFlightGuard {
    in_flight: Arc<DashSet<String>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<DashSet<String>>, key: String) -> Option<Self> {
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// State of one invocation
struct Run<'a> {
    descriptor: &'a ConnectionDescriptor,
    options: &'a ResetOptions,
    cancel: &'a CancellationHandle,
    result: ResetResult,
    phase: ResetPhase,
    dialect: Option<Arc<dyn DialectAdapter>>,
    pool: Option<Arc<dyn DatabasePool>>,
    conn: Option<Box<dyn DatabaseConnection>>,
}

impl Run<'_> {
    fn dialect(&self) -> EngineResult<Arc<dyn DialectAdapter>> {
        self.dialect
            .clone()
            .ok_or_else(|| EngineError::ConnectionFailure("Dialect not initialised".to_string()))
    }

    fn conn(&mut self) -> EngineResult<&mut dyn DatabaseConnection> {
        match self.conn.as_mut() {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(EngineError::ConnectionFailure("No open session".to_string())),
        }
    }

    fn batch_size(&self, dialect: &dyn DialectAdapter) -> usize {
        self.options
            .batch_size
            .unwrap_or_else(|| dialect.default_batch_size())
    }
}

/// Whether the state machine keeps going after a step
enum Flow {
    Continue,
    Finish(ResetOutcome),
}

#[derive(Clone)]
pub struct ResetOrchestrator {
    registry: DatabaseBackendRegistry,
    pool_config: DatabasePoolConfig,
    postgres_schema: String,
    risk: RiskAssessor,
    replayer: Arc<dyn MigrationReplayer>,
    gate: Arc<dyn ConfirmationGate>,
    backup: Arc<dyn BackupProvider>,
    backup_dir: Option<PathBuf>,
    post_steps: Vec<Arc<dyn PostStep>>,
    progress: Option<Arc<dyn ProgressSink>>,
    estimator: Arc<dyn DurationEstimator>,
    in_flight: Arc<DashSet<String>>,
}

impl ResetOrchestrator {
    pub fn builder(
        replayer: Arc<dyn MigrationReplayer>,
        gate: Arc<dyn ConfirmationGate>,
    ) -> ResetOrchestratorBuilder {
        ResetOrchestratorBuilder::new(replayer, gate)
    }

    /// Reset the database behind `descriptor`
    pub async fn reset(&self, descriptor: &ConnectionDescriptor, options: &ResetOptions) -> ResetResult {
        self.reset_with_cancellation(descriptor, options, &CancellationHandle::new())
            .await
    }

    /// Like [`Self::reset`], observing `cancel` up to the confirmation gate
    pub async fn reset_with_cancellation(
        &self,
        descriptor: &ConnectionDescriptor,
        options: &ResetOptions,
        cancel: &CancellationHandle,
    ) -> ResetResult {
        let started = Instant::now();
        let target = descriptor.redacted();

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, target.clone()) else {
            tracing::error!(target = %target, "Rejected reset: another reset is in flight");
            let mut result = ResetResult::new();
            result.outcome = ResetOutcome::Failed {
                phase: ResetPhase::Idle,
                cause: EngineError::ResetInProgress(target),
            };
            return result;
        };

        let mut run = Run {
            descriptor,
            options,
            cancel,
            result: ResetResult::new(),
            phase: ResetPhase::Idle,
            dialect: None,
            pool: None,
            conn: None,
        };

        let has_post_steps = self
            .post_steps
            .iter()
            .any(|step| !options.skips(step.name()));
        run.result.steps = OperationStep::plan(options, has_post_steps, self.estimator.as_ref());

        tracing::info!(
            target = %target,
            dry_run = options.dry_run,
            force = options.force,
            backup = options.backup_requested,
            "Starting schema reset"
        );

        let outcome = match self.drive(&mut run).await {
            Ok(outcome) => outcome,
            Err(cause) => ResetOutcome::Failed {
                phase: run.phase,
                cause,
            },
        };

        // Session first, then the pool it came from
        run.conn = None;
        if let Some(pool) = run.pool.take() {
            let stats = pool.stats();
            tracing::debug!(
                total_connections = stats.total_connections,
                idle_connections = stats.idle_connections,
                "Closing pool"
            );
            pool.close().await;
        }

        self.finish(&mut run, outcome, started);
        run.result
    }

    async fn drive(&self, run: &mut Run<'_>) -> EngineResult<ResetOutcome> {
        let steps = run.result.steps.clone();

        for step in &steps {
            let phase = phase_for(step.kind);
            if !run.cancel.advance(phase) {
                tracing::info!(phase = %run.phase, "Reset cancelled before {}", phase);
                return Ok(ResetOutcome::Cancelled);
            }
            run.phase = phase;
            self.emit(ProgressEvent::new(phase, step_detail(step.kind)).with_estimate(step.estimate));

            let step_started = Instant::now();
            let flow = match step.kind {
                StepKind::Validate => self.validate(run).await?,
                StepKind::AssessRisk => self.assess_risk(run).await?,
                StepKind::Preview => self.preview(run).await?,
                StepKind::Confirm => self.confirm(run).await?,
                StepKind::Backup => self.backup(run).await?,
                StepKind::Drop => self.drop_tables(run).await?,
                StepKind::Replay => self.replay(run).await?,
                StepKind::PostProcess => self.post_process(run).await?,
            };
            self.estimator.record(step.kind, step_started.elapsed());

            if let Flow::Finish(outcome) = flow {
                return Ok(outcome);
            }
        }

        Ok(ResetOutcome::Succeeded)
    }

    async fn validate(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let dialect = adapter_for(run.descriptor, &self.postgres_schema)?;

        // Each pooled connection would open its own empty database
        if dialect.backend_type() == DatabaseBackendType::SQLite && run.descriptor.is_in_memory() {
            return Err(EngineError::Configuration(
                "In-memory SQLite databases cannot be reset: post-processing would run against a different database"
                    .to_string(),
            ));
        }

        let pool = self
            .registry
            .create_pool(run.descriptor, &self.pool_config)
            .await
            .map_err(into_connection_failure)?;
        run.pool = Some(Arc::clone(&pool));

        let latency = pool.health_check().await.map_err(into_connection_failure)?;
        run.conn = Some(pool.acquire().await.map_err(into_connection_failure)?);
        run.dialect = Some(dialect);

        tracing::info!(vendor = %run.descriptor.vendor(), latency_ms = latency.as_millis() as u64, "Connection verified");
        Ok(Flow::Continue)
    }

    async fn assess_risk(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let dialect = run.dialect()?;
        let environment = run.options.environment.clone();

        let signals = self
            .risk
            .collect_signals(run.conn()?, dialect.as_ref(), &environment)
            .await;
        let assessment = self.risk.assess(&signals);

        tracing::info!(
            level = %assessment.level,
            factors = ?assessment.factor_names(),
            "Risk assessed"
        );
        run.result.risk = Some(assessment);
        Ok(Flow::Continue)
    }

    async fn preview(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let dialect = run.dialect()?;
        let tables = enumerate_tables(run.conn()?, dialect.as_ref()).await?;
        let plan = DropPlan::new(tables, run.batch_size(dialect.as_ref()));

        let backup_path = run
            .options
            .backup_requested
            .then(|| self.backup_path(run));

        let preview = PlanPreview {
            vendor: dialect.backend_type(),
            tables: plan.tables().map(|table| table.name().to_string()).collect(),
            batch_size: plan.batch_size(),
            batch_count: plan.batch_count(),
            backup_path,
            steps: preview_steps(run.options, plan.is_empty()),
        };

        tracing::info!(tables = preview.tables.len(), batches = preview.batch_count, "Dry run preview");
        run.result.preview = Some(preview);
        Ok(Flow::Finish(ResetOutcome::Succeeded))
    }

    async fn confirm(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let dialect = run.dialect()?;
        let risk = match run.result.risk.clone() {
            Some(risk) => risk,
            None => self.risk.assess(&RiskSignals {
                environment: run.options.environment.clone(),
                data_size_bytes: None,
                foreign_key_count: None,
            }),
        };

        let request = ConfirmationRequest {
            target: run.descriptor.redacted(),
            database: run.descriptor.database().to_string(),
            vendor: dialect.backend_type(),
            environment: run.options.environment.clone(),
            risk,
            backup_planned: run.options.backup_requested,
        };

        let approved = self.gate.confirm(&request).await.map_err(|e| match e {
            EngineError::ConfirmationInput(_) => e,
            other => EngineError::ConfirmationInput(other.to_string()),
        })?;

        if !approved {
            tracing::info!("Reset declined at confirmation");
            return Ok(Flow::Finish(ResetOutcome::Cancelled));
        }
        Ok(Flow::Continue)
    }

    async fn backup(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let path = self.backup_path(run);
        let attempt = self
            .backup
            .backup(run.descriptor, &path, run.options.backup_timeout)
            .await;

        let (mut record, cause) = match attempt {
            Ok(record) if record.is_completed() => {
                run.result.backup_exists = true;
                run.result.backup = Some(record);
                return Ok(Flow::Continue);
            }
            Ok(record) => {
                let cause = EngineError::BackupFailure(format!(
                    "Backup to {} did not complete",
                    record.path.display()
                ));
                (record, cause)
            }
            Err(cause) => (BackupRecord::pending(path, run.dialect()?.backend_type()), cause),
        };

        record.status = BackupStatus::Failed;
        run.result.backup = Some(record);
        Err(cause)
    }

    async fn drop_tables(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let dialect = run.dialect()?;
        let batch_size = run.batch_size(dialect.as_ref());
        let conn = run.conn()?;

        let tables = enumerate_tables(conn, dialect.as_ref()).await?;
        let plan = DropPlan::new(tables, batch_size);

        if plan.is_empty() {
            tracing::info!("Schema is already empty, nothing to drop");
            self.emit(ProgressEvent::new(ResetPhase::Dropping, "No tables to drop"));
            return Ok(Flow::Continue);
        }

        let mut executor = DropExecutor::new(dialect.as_ref());
        if let Some(progress) = self.progress.as_deref() {
            executor = executor.with_progress(progress);
        }

        let report = executor.execute(conn, &plan).await?;
        run.result.tables_dropped = report.tables_dropped;
        Ok(Flow::Continue)
    }

    async fn replay(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let descriptor = run.descriptor;
        let summary = self
            .replayer
            .replay(descriptor, run.conn()?)
            .await
            .map_err(|e| match e {
                EngineError::ReplayFailure(_) => e,
                other => EngineError::ReplayFailure(other.to_string()),
            })?;

        run.result.replay = Some(summary);
        Ok(Flow::Continue)
    }

    async fn post_process(&self, run: &mut Run<'_>) -> EngineResult<Flow> {
        let dialect = run.dialect()?;
        let pool = run
            .pool
            .clone()
            .ok_or_else(|| EngineError::ConnectionFailure("Pool not initialised".to_string()))?;

        run.result.post_steps = run_post_steps(
            pool.as_ref(),
            dialect.as_ref(),
            &self.post_steps,
            &run.options.skip_post_steps,
        )
        .await;
        Ok(Flow::Continue)
    }

    fn backup_path(&self, run: &Run<'_>) -> PathBuf {
        run.options.backup_path.clone().unwrap_or_else(|| {
            default_backup_path(run.descriptor, self.backup_dir.as_deref(), Utc::now())
        })
    }

    fn finish(&self, run: &mut Run<'_>, outcome: ResetOutcome, started: Instant) {
        let terminal = outcome.phase();
        run.cancel.settle(terminal);
        run.result.elapsed = started.elapsed();

        let detail = match &outcome {
            ResetOutcome::Succeeded => {
                tracing::info!(
                    elapsed_ms = run.result.elapsed.as_millis() as u64,
                    tables_dropped = run.result.tables_dropped,
                    "Schema reset succeeded"
                );
                "Reset complete".to_string()
            }
            ResetOutcome::Cancelled => "Reset cancelled, nothing was changed".to_string(),
            ResetOutcome::Failed { phase, cause } => {
                tracing::error!(
                    phase = %phase,
                    error = %cause,
                    destructive = phase.is_destructive(),
                    backup_exists = run.result.backup_exists,
                    "Schema reset failed"
                );
                format!("Failed during {}: {}", phase, cause)
            }
        };

        self.emit(ProgressEvent::new(terminal, detail));
        run.result.outcome = outcome;
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.on_event(&event);
        }
    }
}

fn phase_for(kind: StepKind) -> ResetPhase {
    match kind {
        StepKind::Validate => ResetPhase::Validating,
        StepKind::AssessRisk | StepKind::Preview => ResetPhase::RiskAssessed,
        StepKind::Confirm => ResetPhase::AwaitingConfirmation,
        StepKind::Backup => ResetPhase::BackingUp,
        StepKind::Drop => ResetPhase::Dropping,
        StepKind::Replay => ResetPhase::Replaying,
        StepKind::PostProcess => ResetPhase::PostProcessing,
    }
}

fn step_detail(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Validate => "Checking database connection",
        StepKind::AssessRisk => "Assessing risk",
        StepKind::Preview => "Building dry-run preview",
        StepKind::Confirm => "Waiting for confirmation",
        StepKind::Backup => "Creating backup",
        StepKind::Drop => "Dropping tables",
        StepKind::Replay => "Replaying migrations",
        StepKind::PostProcess => "Running post-processing steps",
    }
}

/// Steps a real run with the same options would take
fn preview_steps(options: &ResetOptions, schema_empty: bool) -> Vec<String> {
    let real = ResetOptions {
        dry_run: false,
        ..options.clone()
    };
    OperationStep::plan(&real, false, &StaticEstimator)
        .into_iter()
        .filter(|step| !(schema_empty && step.kind == StepKind::Drop))
        .map(|step| step.name)
        .collect()
}

fn into_connection_failure(e: EngineError) -> EngineError {
    match e {
        EngineError::ConnectionFailure(_) | EngineError::UnsupportedVendor(_) => e,
        other => EngineError::ConnectionFailure(other.to_string()),
    }
}

pub struct ResetOrchestratorBuilder {
    registry: DatabaseBackendRegistry,
    pool_config: DatabasePoolConfig,
    postgres_schema: String,
    risk: RiskAssessor,
    replayer: Arc<dyn MigrationReplayer>,
    gate: Arc<dyn ConfirmationGate>,
    backup: Arc<dyn BackupProvider>,
    backup_dir: Option<PathBuf>,
    post_steps: Vec<Arc<dyn PostStep>>,
    progress: Option<Arc<dyn ProgressSink>>,
    estimator: Arc<dyn DurationEstimator>,
}

impl ResetOrchestratorBuilder {
    pub fn new(replayer: Arc<dyn MigrationReplayer>, gate: Arc<dyn ConfirmationGate>) -> Self {
        Self {
            registry: DatabaseBackendRegistry::with_defaults(),
            pool_config: DatabasePoolConfig::default(),
            postgres_schema: "public".to_string(),
            risk: RiskAssessor::default(),
            replayer,
            gate,
            backup: Arc::new(ExternalBackup::default()),
            backup_dir: None,
            post_steps: Vec::new(),
            progress: None,
            estimator: Arc::new(StaticEstimator),
        }
    }

    pub fn with_registry(mut self, registry: DatabaseBackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_pool_config(mut self, config: DatabasePoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn with_postgres_schema(mut self, schema: impl Into<String>) -> Self {
        self.postgres_schema = schema.into();
        self
    }

    pub fn with_risk_config(mut self, config: &RiskConfig) -> Self {
        self.risk = RiskAssessor::new(config);
        self
    }

    pub fn with_backup_provider(mut self, backup: Arc<dyn BackupProvider>) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    pub fn with_post_step(mut self, step: Arc<dyn PostStep>) -> Self {
        self.post_steps.push(step);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn DurationEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn build(self) -> ResetOrchestrator {
        ResetOrchestrator {
            registry: self.registry,
            pool_config: self.pool_config,
            postgres_schema: self.postgres_schema,
            risk: self.risk,
            replayer: self.replayer,
            gate: self.gate,
            backup: self.backup,
            backup_dir: self.backup_dir,
            post_steps: self.post_steps,
            progress: self.progress,
            estimator: self.estimator,
            in_flight: Arc::new(DashSet::new()),
        }
    }
}

/// Total estimated duration of a reset with these options
pub fn estimated_duration(
    options: &ResetOptions,
    has_post_steps: bool,
    estimator: &dyn DurationEstimator,
) -> Duration {
    OperationStep::total_estimate(&OperationStep::plan(options, has_post_steps, estimator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_lists_the_real_run() {
        let options = ResetOptions {
            dry_run: true,
            force: true,
            ..ResetOptions::default()
        };
        assert_eq!(preview_steps(&options, false), vec!["validate", "assess_risk", "drop", "replay"]);
        assert_eq!(preview_steps(&options, true), vec!["validate", "assess_risk", "replay"]);
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let in_flight = Arc::new(DashSet::new());
        let guard = InFlightGuard::acquire(&in_flight, "sqlite://app.db".to_string());
        assert!(guard.is_some());
        assert!(InFlightGuard::acquire(&in_flight, "sqlite://app.db".to_string()).is_none());

        drop(guard);
        assert!(InFlightGuard::acquire(&in_flight, "sqlite://app.db".to_string()).is_some());
    }

    #[test]
    fn test_estimate_excludes_skipped_steps() {
        let forced = ResetOptions {
            force: true,
            ..ResetOptions::default()
        };
        let with_backup = ResetOptions {
            backup_requested: true,
            ..forced.clone()
        };

        let base = estimated_duration(&forced, false, &StaticEstimator);
        assert_eq!(
            estimated_duration(&with_backup, false, &StaticEstimator),
            base + StepKind::Backup.default_estimate()
        );
    }
}
