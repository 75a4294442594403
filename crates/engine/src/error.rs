//! Error types for the reset engine
//!
//! Variants follow the phases of a reset: anything raised before
//! [`ResetPhase::Dropping`] leaves the database untouched, anything raised at or
//! after it means tables may already be gone.

use std::time::Duration;
use thiserror::Error;

use crate::orchestrator::ResetPhase;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The vendor tag is not one of the supported dialects
    #[error("Unsupported database vendor: '{0}'")]
    UnsupportedVendor(String),

    /// Pool creation, health check or connection acquisition failed
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Listing the current tables failed
    #[error("Table enumeration failed: {0}")]
    EnumerationFailure(String),

    #[error("Backup failed: {0}")]
    BackupFailure(String),

    #[error("Backup timed out after {0:?}")]
    BackupTimeout(Duration),

    /// A drop batch failed; batches before `batch_index` are already dropped
    #[error("Drop failed in batch {batch_index}: {message}")]
    DropFailure { batch_index: usize, message: String },

    #[error("Migration replay failed: {0}")]
    ReplayFailure(String),

    /// Migration files could not be loaded or parsed
    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Post-processing step '{step}' failed: {message}")]
    PostStep { step: String, message: String },

    /// Reading the operator's confirmation failed
    #[error("Confirmation input failed: {0}")]
    ConfirmationInput(String),

    /// Another reset against the same database is still running
    #[error("A reset is already in progress for {0}")]
    ResetInProgress(String),

    #[error("Cancellation rejected: reset is already in the {0} phase")]
    CancellationRejected(ResetPhase),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Short machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnsupportedVendor(_) => "unsupported_vendor",
            EngineError::ConnectionFailure(_) => "connection_failure",
            EngineError::EnumerationFailure(_) => "enumeration_failure",
            EngineError::BackupFailure(_) => "backup_failure",
            EngineError::BackupTimeout(_) => "backup_timeout",
            EngineError::DropFailure { .. } => "drop_failure",
            EngineError::ReplayFailure(_) => "replay_failure",
            EngineError::Migration(_) => "migration",
            EngineError::PostStep { .. } => "post_step",
            EngineError::ConfirmationInput(_) => "confirmation_input",
            EngineError::ResetInProgress(_) => "reset_in_progress",
            EngineError::CancellationRejected(_) => "cancellation_rejected",
            EngineError::Query(_) => "query",
            EngineError::Configuration(_) => "configuration",
        }
    }
}

impl serde::Serialize for EngineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("EngineError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Query(err.to_string())
    }
}

impl From<dbfresh_core::ConfigError> for EngineError {
    fn from(err: dbfresh_core::ConfigError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_failure_names_the_batch() {
        let err = EngineError::DropFailure {
            batch_index: 2,
            message: "lock timeout".to_string(),
        };
        assert_eq!(err.to_string(), "Drop failed in batch 2: lock timeout");
        assert_eq!(err.kind(), "drop_failure");
    }

    #[test]
    fn test_cancellation_rejected_names_the_phase() {
        let err = EngineError::CancellationRejected(ResetPhase::Dropping);
        assert_eq!(
            err.to_string(),
            "Cancellation rejected: reset is already in the dropping phase"
        );
    }
}
