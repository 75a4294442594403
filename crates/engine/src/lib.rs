//! # dbfresh-engine: Schema Reset Engine
//!
//! Resets a relational database to a clean, fully-migrated state: every user
//! table is enumerated through a vendor dialect, dropped in constraint-safe
//! batches, and the schema is rebuilt by a migration replayer.
//!
//! The destructive step sits behind a confirmation gate, an optional backup
//! and an advisory risk assessment. The [`ResetOrchestrator`] drives the whole
//! sequence and reports a [`ResetResult`] that says whether a failure happened
//! before or after anything was dropped.

pub mod backends;
pub mod backup;
pub mod descriptor;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod fake;
pub mod migrations;
pub mod orchestrator;
pub mod plan;
pub mod post;
pub mod progress;
pub mod risk;
pub mod steps;
pub mod tables;

pub use backends::{
    DatabaseBackend, DatabaseBackendRegistry, DatabaseBackendType, DatabaseConnection,
    DatabasePool, DatabasePoolConfig, DatabaseRow, DatabaseValue,
};
pub use backup::{BackupProvider, BackupRecord, BackupStatus, ExternalBackup};
pub use descriptor::ConnectionDescriptor;
pub use dialect::{adapter_for, DialectAdapter};
pub use error::{EngineError, EngineResult};
pub use executor::{DropExecutor, DropReport};
pub use migrations::{
    CommandMigrationReplayer, MigrationReplayer, ReplaySummary, SqlMigrationReplayer,
};
pub use orchestrator::{
    CancellationHandle, ConfirmationGate, ConfirmationRequest, PlanPreview, ResetOptions,
    ResetOrchestrator, ResetOutcome, ResetPhase, ResetResult,
};
pub use plan::DropPlan;
pub use post::{
    AccountProvisioner, AnalyzeStep, PostStep, PostStepReport, PostStepStatus, SeedRunner,
    SqlAccountProvisioner, SqlSeedRunner,
};
pub use progress::{ChannelProgressSink, ProgressEvent, ProgressSink};
pub use risk::{RiskAssessment, RiskAssessor, RiskFactor, RiskLevel, RiskSignals};
pub use steps::{
    DurationEstimator, HistoricalEstimator, InMemorySampleStore, OperationStep, SampleStore,
    StaticEstimator, StepKind,
};
pub use tables::{enumerate_tables, TableDescriptor};
