//! # dbfresh-core
//!
//! Configuration and environment model shared by the dbfresh engine and CLI.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file
//! (`dbfresh.yaml`), then environment variables. Every layer records where a
//! value came from so the CLI can explain which database it is about to reset.

pub mod config;
pub mod environment;

pub use config::{
    AccountConfig, BackupToolsConfig, ConfigError, ConfigSource, FreshConfig, MigrationsConfig,
    RiskConfig,
};
pub use environment::Environment;
