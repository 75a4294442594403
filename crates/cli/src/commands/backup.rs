use std::path::PathBuf;

use chrono::Utc;
use console::style;

use dbfresh_engine::backup::default_backup_path;
use dbfresh_engine::{BackupProvider, ExternalBackup};

use super::Context;
use crate::interactive;

pub async fn run(ctx: Context, path: Option<PathBuf>) -> anyhow::Result<i32> {
    let path = path.unwrap_or_else(|| {
        default_backup_path(&ctx.descriptor, ctx.config.backup_dir.as_deref(), Utc::now())
    });

    let spinner = interactive::spinner(&format!("Backing up to {}", path.display()));
    let record = ExternalBackup::new(ctx.config.backup_tools.clone())
        .backup(&ctx.descriptor, &path, ctx.config.backup_timeout())
        .await;
    spinner.finish_and_clear();

    let record = record?;
    match record.size_bytes {
        Some(size) => println!(
            "{} Backup written to {} ({} bytes)",
            style("✓").green().bold(),
            record.path.display(),
            size
        ),
        None => println!("{} Backup written to {}", style("✓").green().bold(), record.path.display()),
    }
    Ok(0)
}
