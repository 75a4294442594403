//! Operation steps and duration estimates
//!
//! The orchestrator builds its plan once per invocation as an ordered list of
//! [`OperationStep`]s and dispatches on each step's [`StepKind`]. Estimates are
//! only hints shown next to progress events. They come from a pluggable
//! [`DurationEstimator`]; the engine never reads or writes history files itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::orchestrator::ResetOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Validate,
    AssessRisk,
    Confirm,
    Backup,
    Preview,
    Drop,
    Replay,
    PostProcess,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Validate => "validate",
            StepKind::AssessRisk => "assess_risk",
            StepKind::Confirm => "confirm",
            StepKind::Backup => "backup",
            StepKind::Preview => "preview",
            StepKind::Drop => "drop",
            StepKind::Replay => "replay",
            StepKind::PostProcess => "post_process",
        }
    }

    /// Hint used when no history is available
    pub fn default_estimate(&self) -> Duration {
        match self {
            StepKind::Validate | StepKind::AssessRisk => Duration::from_secs(1),
            StepKind::Confirm | StepKind::Preview => Duration::ZERO,
            StepKind::Backup => Duration::from_secs(30),
            StepKind::Drop => Duration::from_secs(5),
            StepKind::Replay => Duration::from_secs(20),
            StepKind::PostProcess => Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStep {
    pub name: String,
    pub kind: StepKind,
    pub estimate: Duration,
}

impl OperationStep {
    /// Build the ordered plan for one invocation
    pub fn plan(
        options: &ResetOptions,
        run_post_processing: bool,
        estimator: &dyn DurationEstimator,
    ) -> Vec<OperationStep> {
        let mut kinds = vec![StepKind::Validate, StepKind::AssessRisk];

        if options.dry_run {
            kinds.push(StepKind::Preview);
        } else {
            if !options.force {
                kinds.push(StepKind::Confirm);
            }
            if options.backup_requested {
                kinds.push(StepKind::Backup);
            }
            kinds.extend([StepKind::Drop, StepKind::Replay]);
            if run_post_processing {
                kinds.push(StepKind::PostProcess);
            }
        }

        kinds
            .into_iter()
            .map(|kind| OperationStep {
                name: kind.name().to_string(),
                kind,
                estimate: estimator.estimate(kind),
            })
            .collect()
    }

    pub fn total_estimate(steps: &[OperationStep]) -> Duration {
        steps.iter().map(|step| step.estimate).sum()
    }
}

/// Predicts how long a step will take
pub trait DurationEstimator: Send + Sync {
    fn estimate(&self, kind: StepKind) -> Duration;

    /// Feed back an observed duration
    fn record(&self, _kind: StepKind, _elapsed: Duration) {}
}

/// Fixed per-kind hints
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEstimator;

impl DurationEstimator for StaticEstimator {
    fn estimate(&self, kind: StepKind) -> Duration {
        kind.default_estimate()
    }
}

/// Source of previously observed step durations
pub trait SampleStore: Send + Sync {
    fn samples(&self, kind: StepKind) -> Vec<Duration>;
    fn push(&self, kind: StepKind, elapsed: Duration);
}

/// Bounded in-process sample store
#[derive(Debug)]
pub struct InMemorySampleStore {
    capacity: usize,
    samples: RwLock<HashMap<StepKind, Vec<Duration>>>,
}

impl InMemorySampleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySampleStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl SampleStore for InMemorySampleStore {
    fn samples(&self, kind: StepKind) -> Vec<Duration> {
        self.samples.read().get(&kind).cloned().unwrap_or_default()
    }

    fn push(&self, kind: StepKind, elapsed: Duration) {
        let mut samples = self.samples.write();
        let entry = samples.entry(kind).or_default();
        entry.push(elapsed);
        if entry.len() > self.capacity {
            let excess = entry.len() - self.capacity;
            entry.drain(..excess);
        }
    }
}

/// Mean of recorded samples, falling back to the static hint
pub struct HistoricalEstimator {
    store: Arc<dyn SampleStore>,
}

impl HistoricalEstimator {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }
}

impl DurationEstimator for HistoricalEstimator {
    fn estimate(&self, kind: StepKind) -> Duration {
        let samples = self.store.samples(kind);
        if samples.is_empty() {
            return kind.default_estimate();
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    fn record(&self, kind: StepKind, elapsed: Duration) {
        self.store.push(kind, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(steps: &[OperationStep]) -> Vec<StepKind> {
        steps.iter().map(|step| step.kind).collect()
    }

    #[test]
    fn test_full_plan_order() {
        let options = ResetOptions {
            backup_requested: true,
            ..ResetOptions::default()
        };
        let steps = OperationStep::plan(&options, true, &StaticEstimator);

        assert_eq!(
            kinds(&steps),
            vec![
                StepKind::Validate,
                StepKind::AssessRisk,
                StepKind::Confirm,
                StepKind::Backup,
                StepKind::Drop,
                StepKind::Replay,
                StepKind::PostProcess,
            ]
        );
    }

    #[test]
    fn test_force_skips_confirmation_and_dry_run_stops_at_preview() {
        let forced = ResetOptions {
            force: true,
            ..ResetOptions::default()
        };
        assert!(!kinds(&OperationStep::plan(&forced, false, &StaticEstimator)).contains(&StepKind::Confirm));

        let dry = ResetOptions {
            dry_run: true,
            backup_requested: true,
            ..ResetOptions::default()
        };
        assert_eq!(
            kinds(&OperationStep::plan(&dry, true, &StaticEstimator)),
            vec![StepKind::Validate, StepKind::AssessRisk, StepKind::Preview]
        );
    }

    #[test]
    fn test_historical_estimator_averages_samples() {
        let store = Arc::new(InMemorySampleStore::new(2));
        let estimator = HistoricalEstimator::new(store.clone());

        assert_eq!(estimator.estimate(StepKind::Replay), StepKind::Replay.default_estimate());

        estimator.record(StepKind::Replay, Duration::from_secs(100));
        estimator.record(StepKind::Replay, Duration::from_secs(4));
        estimator.record(StepKind::Replay, Duration::from_secs(8));

        // capacity 2 evicts the oldest sample
        assert_eq!(store.samples(StepKind::Replay).len(), 2);
        assert_eq!(estimator.estimate(StepKind::Replay), Duration::from_secs(6));
    }
}
