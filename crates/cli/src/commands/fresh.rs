use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use console::style;

use dbfresh_core::FreshConfig;
use dbfresh_engine::backup::default_backup_path;
use dbfresh_engine::migrations::MigrationConfig;
use dbfresh_engine::post::{ProvisionAccountStep, RunSeedsStep};
use dbfresh_engine::{
    AnalyzeStep, CancellationHandle, ChannelProgressSink, CommandMigrationReplayer, ExternalBackup,
    MigrationReplayer, ResetOptions, ResetOrchestrator, SqlAccountProvisioner, SqlMigrationReplayer,
    SqlSeedRunner,
};

use super::Context;
use crate::interactive::{self, InquireBackupPrompt, InquireGate};
use crate::utils;

#[derive(Args, Debug, Default)]
pub struct FreshArgs {
    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub force: bool,

    /// Back up the database before dropping anything
    #[arg(long)]
    pub backup: bool,

    /// Backup destination; implies --backup
    #[arg(long, value_name = "PATH")]
    pub backup_path: Option<PathBuf>,

    /// Tables per drop statement (0 drops everything at once)
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Show what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Post-processing step to skip (seed, analyze, default_account)
    #[arg(long, value_name = "STEP")]
    pub skip: Vec<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Backup questions asked before a run that did not settle them with flags
pub trait BackupPrompt {
    fn wants_backup(&self) -> anyhow::Result<bool>;

    fn backup_path(&self, default: &Path) -> anyhow::Result<PathBuf>;
}

impl FreshArgs {
    /// Ask about a backup when running interactively. Forced and dry runs never
    /// prompt; an explicit `--backup-path` is never second-guessed.
    pub fn settle_backup(
        &mut self,
        prompt: &dyn BackupPrompt,
        default_path: impl FnOnce() -> PathBuf,
    ) -> anyhow::Result<()> {
        if self.force || self.dry_run || self.backup_path.is_some() {
            return Ok(());
        }

        if !self.backup && !prompt.wants_backup()? {
            return Ok(());
        }
        self.backup = true;
        self.backup_path = Some(prompt.backup_path(&default_path())?);
        Ok(())
    }

    pub fn to_options(&self, config: &FreshConfig) -> ResetOptions {
        let defaults = ResetOptions::from_config(config);
        ResetOptions {
            force: self.force,
            backup_requested: self.backup || self.backup_path.is_some(),
            backup_path: self.backup_path.clone(),
            batch_size: self.batch_size.or(defaults.batch_size),
            dry_run: self.dry_run,
            skip_post_steps: self.skip.iter().cloned().collect::<BTreeSet<_>>(),
            ..defaults
        }
    }
}

fn replayer(config: &FreshConfig) -> anyhow::Result<Arc<dyn MigrationReplayer>> {
    Ok(match &config.migrations.command {
        Some(command) => Arc::new(CommandMigrationReplayer::new(command)?),
        None => Arc::new(SqlMigrationReplayer::new(MigrationConfig::from(&config.migrations))),
    })
}

pub async fn run(ctx: Context, mut args: FreshArgs) -> anyhow::Result<i32> {
    let config = &ctx.config;
    args.settle_backup(&InquireBackupPrompt, || {
        default_backup_path(&ctx.descriptor, config.backup_dir.as_deref(), Utc::now())
    })?;
    let options = args.to_options(config);

    println!(
        "{} {} ({} environment)",
        style("Target:").bold(),
        ctx.descriptor.redacted(),
        config.environment
    );

    let spinner = interactive::spinner("Starting");
    let (sink, events) = ChannelProgressSink::new();

    let mut builder = ResetOrchestrator::builder(replayer(config)?, Arc::new(InquireGate::new(spinner.clone())))
        .with_postgres_schema(config.postgres_schema.clone())
        .with_risk_config(&config.risk)
        .with_backup_provider(Arc::new(ExternalBackup::new(config.backup_tools.clone())))
        .with_backup_dir(config.backup_dir.clone())
        .with_progress(Arc::new(sink))
        .with_post_step(Arc::new(RunSeedsStep::new(Arc::new(SqlSeedRunner::new(config.seeds_dir.clone())))))
        .with_post_step(Arc::new(AnalyzeStep));
    if let Some(account) = &config.default_account {
        builder = builder.with_post_step(Arc::new(ProvisionAccountStep::new(Arc::new(
            SqlAccountProvisioner::new(account.clone()),
        ))));
    }
    let orchestrator = builder.build();

    let cancel = CancellationHandle::new();
    let interrupt = tokio::spawn(interactive::cancel_on_interrupt(cancel.clone()));
    let render = tokio::spawn(interactive::render_progress(events, spinner.clone()));

    let result = orchestrator
        .reset_with_cancellation(&ctx.descriptor, &options, &cancel)
        .await;

    // Last sink reference goes with the orchestrator, which ends the render task
    drop(orchestrator);
    let _ = render.await;
    interrupt.abort();
    spinner.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        utils::print_result(&result);
    }

    Ok(result.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Answers {
        wants: bool,
        path: Option<&'static str>,
        asked: Cell<usize>,
    }

    impl Answers {
        fn new(wants: bool, path: Option<&'static str>) -> Self {
            Self {
                wants,
                path,
                asked: Cell::new(0),
            }
        }
    }

    impl BackupPrompt for Answers {
        fn wants_backup(&self) -> anyhow::Result<bool> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.wants)
        }

        fn backup_path(&self, default: &Path) -> anyhow::Result<PathBuf> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.path.map(PathBuf::from).unwrap_or_else(|| default.to_path_buf()))
        }
    }

    fn default_path() -> PathBuf {
        PathBuf::from("backups/shop_20240101_000000.sql")
    }

    #[test]
    fn test_interactive_run_offers_backup_with_default_path() {
        let mut args = FreshArgs::default();
        let answers = Answers::new(true, None);
        args.settle_backup(&answers, default_path).unwrap();

        let options = args.to_options(&FreshConfig::default());
        assert!(options.backup_requested);
        assert_eq!(options.backup_path, Some(default_path()));
        assert_eq!(answers.asked.get(), 2);
    }

    #[test]
    fn test_declined_backup_leaves_options_alone() {
        let mut args = FreshArgs::default();
        let answers = Answers::new(false, None);
        args.settle_backup(&answers, default_path).unwrap();

        let options = args.to_options(&FreshConfig::default());
        assert!(!options.backup_requested);
        assert_eq!(options.backup_path, None);
        assert_eq!(answers.asked.get(), 1);
    }

    #[test]
    fn test_backup_flag_only_asks_for_the_path() {
        let mut args = FreshArgs {
            backup: true,
            ..FreshArgs::default()
        };
        let answers = Answers::new(false, Some("/var/backups/shop.sql"));
        args.settle_backup(&answers, default_path).unwrap();

        assert_eq!(args.backup_path, Some(PathBuf::from("/var/backups/shop.sql")));
        assert_eq!(answers.asked.get(), 1);
    }

    #[test]
    fn test_forced_and_dry_runs_never_prompt() {
        for mut args in [
            FreshArgs {
                force: true,
                ..FreshArgs::default()
            },
            FreshArgs {
                dry_run: true,
                ..FreshArgs::default()
            },
        ] {
            let answers = Answers::new(true, None);
            args.settle_backup(&answers, default_path).unwrap();
            assert!(!args.backup);
            assert_eq!(answers.asked.get(), 0);
        }
    }

    #[test]
    fn test_backup_path_implies_backup() {
        let args = FreshArgs {
            backup_path: Some("/tmp/shop.sql".into()),
            ..FreshArgs::default()
        };
        let options = args.to_options(&FreshConfig::default());

        assert!(options.backup_requested);
        assert_eq!(options.backup_path, Some(PathBuf::from("/tmp/shop.sql")));
    }

    #[test]
    fn test_flags_override_configured_batch_size() {
        let mut config = FreshConfig::default();
        config.batch_size = Some(50);

        let from_config = FreshArgs::default().to_options(&config);
        assert_eq!(from_config.batch_size, Some(50));

        let from_flag = FreshArgs {
            batch_size: Some(0),
            skip: vec!["seed".to_string()],
            ..FreshArgs::default()
        }
        .to_options(&config);
        assert_eq!(from_flag.batch_size, Some(0));
        assert!(from_flag.skips("seed"));
        assert!(!from_flag.force);
    }
}
