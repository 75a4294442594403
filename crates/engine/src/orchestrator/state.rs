//! Reset phases and results

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::backends::DatabaseBackendType;
use crate::backup::BackupRecord;
use crate::error::EngineError;
use crate::migrations::ReplaySummary;
use crate::post::PostStepReport;
use crate::risk::RiskAssessment;
use crate::steps::OperationStep;

/// States of the reset state machine, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPhase {
    Idle,
    Validating,
    RiskAssessed,
    AwaitingConfirmation,
    BackingUp,
    Dropping,
    Replaying,
    PostProcessing,
    Succeeded,
    Failed,
    Cancelled,
}

impl ResetPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPhase::Idle => "idle",
            ResetPhase::Validating => "validating",
            ResetPhase::RiskAssessed => "risk_assessed",
            ResetPhase::AwaitingConfirmation => "awaiting_confirmation",
            ResetPhase::BackingUp => "backing_up",
            ResetPhase::Dropping => "dropping",
            ResetPhase::Replaying => "replaying",
            ResetPhase::PostProcessing => "post_processing",
            ResetPhase::Succeeded => "succeeded",
            ResetPhase::Failed => "failed",
            ResetPhase::Cancelled => "cancelled",
        }
    }

    /// Cancellation is honoured only up to and including the confirmation gate
    pub fn accepts_cancellation(&self) -> bool {
        *self <= ResetPhase::AwaitingConfirmation
    }

    /// Failures in these phases happen after tables may already be gone
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            ResetPhase::Dropping | ResetPhase::Replaying | ResetPhase::PostProcessing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResetPhase::Succeeded | ResetPhase::Failed | ResetPhase::Cancelled
        )
    }
}

impl Default for ResetPhase {
    fn default() -> Self {
        ResetPhase::Idle
    }
}

impl std::fmt::Display for ResetPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResetOutcome {
    Succeeded,
    /// The operator declined, or cancellation was requested in time. Nothing
    /// was mutated.
    Cancelled,
    Failed { phase: ResetPhase, cause: EngineError },
}

impl ResetOutcome {
    pub fn phase(&self) -> ResetPhase {
        match self {
            ResetOutcome::Succeeded => ResetPhase::Succeeded,
            ResetOutcome::Cancelled => ResetPhase::Cancelled,
            ResetOutcome::Failed { .. } => ResetPhase::Failed,
        }
    }
}

/// What a dry run would do
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanPreview {
    pub vendor: DatabaseBackendType,
    pub tables: Vec<String>,
    pub batch_size: usize,
    pub batch_count: usize,
    pub backup_path: Option<PathBuf>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResult {
    pub outcome: ResetOutcome,
    pub elapsed: Duration,
    /// Whether a completed backup exists for recovery
    pub backup_exists: bool,
    pub backup: Option<BackupRecord>,
    pub risk: Option<RiskAssessment>,
    pub tables_dropped: usize,
    pub preview: Option<PlanPreview>,
    pub replay: Option<ReplaySummary>,
    pub post_steps: Vec<PostStepReport>,
    pub steps: Vec<OperationStep>,
}

impl ResetResult {
    pub(crate) fn new() -> Self {
        Self {
            outcome: ResetOutcome::Succeeded,
            elapsed: Duration::ZERO,
            backup_exists: false,
            backup: None,
            risk: None,
            tables_dropped: 0,
            preview: None,
            replay: None,
            post_steps: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.outcome, ResetOutcome::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, ResetOutcome::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ResetOutcome::Failed { .. })
    }

    /// The error behind a failed reset
    pub fn cause(&self) -> Option<&EngineError> {
        match &self.outcome {
            ResetOutcome::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Phase a failed reset stopped in
    pub fn failed_phase(&self) -> Option<ResetPhase> {
        match &self.outcome {
            ResetOutcome::Failed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Failed at or after `Dropping`: the schema may be partly or fully gone
    pub fn is_unsafe_failure(&self) -> bool {
        self.failed_phase().is_some_and(|phase| phase.is_destructive())
    }

    pub fn post_step_failures(&self) -> impl Iterator<Item = &PostStepReport> {
        self.post_steps.iter().filter(|report| report.is_failure())
    }

    /// 0 for `Succeeded` and `Cancelled`, 1 for `Failed`
    pub fn exit_code(&self) -> i32 {
        if self.is_failed() {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_window_ends_at_confirmation() {
        assert!(ResetPhase::Idle.accepts_cancellation());
        assert!(ResetPhase::AwaitingConfirmation.accepts_cancellation());
        assert!(!ResetPhase::BackingUp.accepts_cancellation());
        assert!(!ResetPhase::Dropping.accepts_cancellation());
        assert!(!ResetPhase::Succeeded.accepts_cancellation());
    }

    #[test]
    fn test_unsafe_failures_start_at_dropping() {
        let mut result = ResetResult::new();
        result.outcome = ResetOutcome::Failed {
            phase: ResetPhase::BackingUp,
            cause: EngineError::BackupFailure("disk full".to_string()),
        };
        assert!(!result.is_unsafe_failure());
        assert_eq!(result.exit_code(), 1);

        result.outcome = ResetOutcome::Failed {
            phase: ResetPhase::Replaying,
            cause: EngineError::ReplayFailure("syntax error".to_string()),
        };
        assert!(result.is_unsafe_failure());
    }

    #[test]
    fn test_cancelled_exits_zero() {
        let mut result = ResetResult::new();
        result.outcome = ResetOutcome::Cancelled;
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.outcome.phase(), ResetPhase::Cancelled);
    }
}
