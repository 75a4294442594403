//! Confirmation gate

use async_trait::async_trait;
use serde::Serialize;

use dbfresh_core::Environment;

use crate::backends::DatabaseBackendType;
use crate::error::EngineResult;
use crate::risk::RiskAssessment;

/// Everything the operator needs to make an informed decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRequest {
    /// Connection with the password redacted
    pub target: String,
    pub database: String,
    pub vendor: DatabaseBackendType,
    pub environment: Environment,
    pub risk: RiskAssessment,
    pub backup_planned: bool,
}

impl ConfirmationRequest {
    /// High risk asks for the strict form, e.g. typing the database name
    pub fn requires_strict_confirmation(&self) -> bool {
        self.risk.is_high()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "This will DROP ALL TABLES in '{}' ({}, {} environment, {} risk)",
            self.database, self.vendor, self.environment, self.risk.level
        );
        if !self.risk.factors.is_empty() {
            summary.push_str(&format!(" [{}]", self.risk.factor_names().join(", ")));
        }
        if !self.backup_planned {
            summary.push_str(". No backup will be taken");
        }
        summary
    }
}

/// Blocks until the operator approves or denies the reset
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// `Ok(false)` is a denial; `Err` means the answer could not be read
    async fn confirm(&self, request: &ConfirmationRequest) -> EngineResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskFactor, RiskLevel};

    #[test]
    fn test_summary_mentions_risk_and_missing_backup() {
        let request = ConfirmationRequest {
            target: "postgres://app:***@db/shop".to_string(),
            database: "shop".to_string(),
            vendor: DatabaseBackendType::PostgreSQL,
            environment: Environment::Production,
            risk: RiskAssessment {
                level: RiskLevel::Medium,
                factors: vec![RiskFactor::NonDevelopmentEnvironment],
            },
            backup_planned: false,
        };

        let summary = request.summary();
        assert!(summary.contains("'shop'"));
        assert!(summary.contains("medium risk"));
        assert!(summary.contains("non_development_environment"));
        assert!(summary.ends_with("No backup will be taken"));
        assert!(!request.requires_strict_confirmation());
    }
}
