//! Migration Definitions
//!
//! Types shared by the migration file loader and the replayers.

use std::path::PathBuf;

use serde::Serialize;

use dbfresh_core::MigrationsConfig;

/// A migration file loaded from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// File stem, e.g. `20240101_120000_create_users`; sorts chronologically
    pub id: String,
    /// Human-readable name derived from the file stem
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

/// Where migration files live and where applied ids are tracked
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub migrations_dir: PathBuf,
    pub migrations_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::from(&MigrationsConfig::default())
    }
}

impl From<&MigrationsConfig> for MigrationConfig {
    fn from(config: &MigrationsConfig) -> Self {
        Self {
            migrations_dir: config.dir.clone(),
            migrations_table: config.table.clone(),
        }
    }
}

/// Outcome of a replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Ids of the migrations applied by this replay, in order
    pub applied: Vec<String>,
    /// Migrations that were already recorded as applied
    pub skipped: usize,
    pub elapsed_ms: u128,
}

impl ReplaySummary {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}
