mod commands;
mod interactive;
mod utils;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::{backup, fresh, tables, Context, GlobalArgs};

#[derive(Parser)]
#[command(name = "dbfresh")]
#[command(version, about = "Drop every table and rebuild the schema from migrations")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop all tables and replay migrations
    Fresh(fresh::FreshArgs),

    /// List the tables a reset would drop
    Tables,

    /// Take a backup without resetting
    Backup {
        /// Where to write the backup (defaults to a timestamped file)
        #[arg(long, value_name = "PATH")]
        path: Option<std::path::PathBuf>,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(Layer::new().with_writer(std::io::stderr).with_target(false))
        .try_init()?;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let ctx = Context::load(&cli.global)?;
    init_logging(&ctx.config.log_level)?;
    tracing::debug!(
        target_db = %ctx.descriptor.redacted(),
        environment = %ctx.config.environment,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Fresh(args) => fresh::run(ctx, args).await,
        Commands::Tables => tables::run(ctx).await,
        Commands::Backup { path } => backup::run(ctx, path).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            2
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "dbfresh",
            "fresh",
            "--force",
            "--skip",
            "seed",
            "--skip",
            "analyze",
            "--database-url",
            "sqlite://app.db",
            "--env",
            "staging",
        ])
        .unwrap();

        assert_eq!(cli.global.database_url.as_deref(), Some("sqlite://app.db"));
        assert_eq!(cli.global.env.as_deref(), Some("staging"));
        match cli.command {
            Commands::Fresh(args) => {
                assert!(args.force);
                assert_eq!(args.skip, vec!["seed", "analyze"]);
            }
            _ => panic!("expected fresh"),
        }
    }

    #[test]
    fn test_backup_path_is_optional() {
        let cli = Cli::try_parse_from(["dbfresh", "backup"]).unwrap();
        assert!(matches!(cli.command, Commands::Backup { path: None }));
    }
}
