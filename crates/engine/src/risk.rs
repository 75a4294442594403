//! Risk assessment
//!
//! Three independent factors are checked: the target is not a development
//! environment, the data is large, and the schema is densely related. The
//! resulting level only changes how strictly the operator is asked to confirm;
//! it never blocks a reset.

use serde::Serialize;

use dbfresh_core::{Environment, RiskConfig};

use crate::backends::DatabaseConnection;
use crate::dialect::DialectAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Level for a number of contributing factors
    pub fn from_factor_count(count: usize) -> Self {
        match count {
            0 => RiskLevel::Low,
            1 | 2 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    NonDevelopmentEnvironment,
    LargeDataset,
    DenseRelationships,
}

impl RiskFactor {
    pub fn name(&self) -> &'static str {
        match self {
            RiskFactor::NonDevelopmentEnvironment => "non_development_environment",
            RiskFactor::LargeDataset => "large_dataset",
            RiskFactor::DenseRelationships => "dense_relationships",
        }
    }
}

/// Raw inputs to the assessment. Missing measurements count as "factor absent".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSignals {
    pub environment: Environment,
    pub data_size_bytes: Option<u64>,
    pub foreign_key_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    pub fn factor_names(&self) -> Vec<&'static str> {
        self.factors.iter().map(RiskFactor::name).collect()
    }

    pub fn is_high(&self) -> bool {
        self.level == RiskLevel::High
    }
}

#[derive(Debug, Clone)]
pub struct RiskAssessor {
    large_dataset_bytes: u64,
    relationship_threshold: u64,
}

impl RiskAssessor {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            large_dataset_bytes: config.large_dataset_bytes,
            relationship_threshold: config.relationship_threshold,
        }
    }

    /// Score fixed signals
    pub fn assess(&self, signals: &RiskSignals) -> RiskAssessment {
        let mut factors = Vec::new();

        if !signals.environment.is_development() {
            factors.push(RiskFactor::NonDevelopmentEnvironment);
        }
        if signals
            .data_size_bytes
            .is_some_and(|size| size > self.large_dataset_bytes)
        {
            factors.push(RiskFactor::LargeDataset);
        }
        if signals
            .foreign_key_count
            .is_some_and(|count| count > self.relationship_threshold)
        {
            factors.push(RiskFactor::DenseRelationships);
        }

        RiskAssessment {
            level: RiskLevel::from_factor_count(factors.len()),
            factors,
        }
    }

    /// Measure data size and relationship density on a live connection
    pub async fn collect_signals(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
        environment: &Environment,
    ) -> RiskSignals {
        RiskSignals {
            environment: environment.clone(),
            data_size_bytes: measure(conn, &dialect.data_size_sql(), "data_size").await,
            foreign_key_count: measure(conn, &dialect.foreign_key_count_sql(), "foreign_key_count").await,
        }
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new(&RiskConfig::default())
    }
}

async fn measure(conn: &mut dyn DatabaseConnection, sql: &str, signal: &str) -> Option<u64> {
    match conn.fetch_scalar_i64(sql).await {
        Ok(value) => value.map(|v| v.max(0) as u64),
        Err(e) => {
            tracing::warn!(signal, error = %e, "Risk signal unavailable, treating factor as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::fake::{FakeDatabase, FakeScript};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn signals(environment: Environment, size: Option<u64>, fks: Option<u64>) -> RiskSignals {
        RiskSignals {
            environment,
            data_size_bytes: size,
            foreign_key_count: fks,
        }
    }

    #[test]
    fn test_no_factors_is_low() {
        let assessment = RiskAssessor::default().assess(&signals(Environment::Development, Some(1024), Some(1)));
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(assessment.factors.is_empty());
    }

    #[test]
    fn test_two_factors_is_medium() {
        let assessment =
            RiskAssessor::default().assess(&signals(Environment::Production, Some(2 * GIB), Some(2)));
        assert_eq!(assessment.level, RiskLevel::Medium);
        assert_eq!(
            assessment.factor_names(),
            vec!["non_development_environment", "large_dataset"]
        );
    }

    #[test]
    fn test_three_factors_is_high() {
        let assessment =
            RiskAssessor::default().assess(&signals(Environment::Staging, Some(2 * GIB), Some(12)));
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment.is_high());
    }

    #[test]
    fn test_thresholds_are_exclusive_and_configurable() {
        let assessor = RiskAssessor::new(&RiskConfig {
            large_dataset_bytes: 100,
            relationship_threshold: 3,
        });

        let at_threshold = assessor.assess(&signals(Environment::Testing, Some(100), Some(3)));
        assert_eq!(at_threshold.level, RiskLevel::Low);

        let above = assessor.assess(&signals(Environment::Testing, Some(101), Some(4)));
        assert_eq!(above.factors, vec![RiskFactor::LargeDataset, RiskFactor::DenseRelationships]);
    }

    #[tokio::test]
    async fn test_failed_signal_queries_count_as_absent() {
        let db = FakeDatabase::with_script(FakeScript {
            fail_statements_containing: vec!["pg_database_size".to_string()],
            foreign_key_count: 9,
            ..FakeScript::default()
        });
        let mut conn = db.connection();

        let signals = RiskAssessor::default()
            .collect_signals(&mut conn, &PostgresDialect::default(), &Environment::Development)
            .await;

        assert_eq!(signals.data_size_bytes, None);
        assert_eq!(signals.foreign_key_count, Some(9));
    }
}
