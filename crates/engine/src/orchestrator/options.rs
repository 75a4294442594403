use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use dbfresh_core::{Environment, FreshConfig};

/// Per-invocation options. Built once and never mutated during a reset.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetOptions {
    /// Skip the confirmation gate
    pub force: bool,
    pub backup_requested: bool,
    /// Defaults to a timestamped file name when not given
    pub backup_path: Option<PathBuf>,
    pub backup_timeout: Duration,
    /// Tables per drop batch; `None` uses the vendor default, 0 is unbatched
    pub batch_size: Option<usize>,
    /// Validate, assess and preview only
    pub dry_run: bool,
    /// Post-processing steps to omit, by name
    pub skip_post_steps: BTreeSet<String>,
    pub environment: Environment,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            force: false,
            backup_requested: false,
            backup_path: None,
            backup_timeout: Duration::from_secs(300),
            batch_size: None,
            dry_run: false,
            skip_post_steps: BTreeSet::new(),
            environment: Environment::Development,
        }
    }
}

impl ResetOptions {
    /// Options seeded from loaded configuration
    pub fn from_config(config: &FreshConfig) -> Self {
        Self {
            backup_timeout: config.backup_timeout(),
            batch_size: config.batch_size,
            environment: config.environment.clone(),
            ..Self::default()
        }
    }

    pub fn skips(&self, step: &str) -> bool {
        self.skip_post_steps.contains(step)
    }
}
