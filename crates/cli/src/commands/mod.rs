pub mod backup;
pub mod fresh;
pub mod tables;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;

use dbfresh_core::{Environment, FreshConfig};
use dbfresh_engine::ConnectionDescriptor;

/// Flags accepted by every subcommand
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Database to operate on (overrides DATABASE_URL and the config file)
    #[arg(long, global = true, value_name = "URL")]
    pub database_url: Option<String>,

    /// Configuration file (defaults to ./dbfresh.yaml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Environment name used for risk assessment
    #[arg(long, global = true, value_name = "ENV")]
    pub env: Option<String>,
}

/// Loaded configuration plus the target database
pub struct Context {
    pub config: FreshConfig,
    pub descriptor: ConnectionDescriptor,
}

impl Context {
    pub fn load(args: &GlobalArgs) -> anyhow::Result<Self> {
        let mut config = FreshConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

        if let Some(url) = &args.database_url {
            config.set_database_url(url.clone());
        }
        if let Some(env) = &args.env {
            config.set_environment(Environment::parse(env));
        }

        let url = config.require_database_url()?;
        let descriptor = ConnectionDescriptor::from_url(url)?;

        Ok(Self { config, descriptor })
    }
}
