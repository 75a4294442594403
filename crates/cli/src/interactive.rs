use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Text};
use tokio::sync::mpsc::UnboundedReceiver;

use dbfresh_engine::{
    CancellationHandle, ConfirmationGate, ConfirmationRequest, EngineError, EngineResult,
    ProgressEvent, RiskLevel,
};

use crate::commands::fresh::BackupPrompt;
use crate::utils::format_duration;

static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "! ");

pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Mirror engine progress onto the spinner until the sink is dropped
pub async fn render_progress(mut events: UnboundedReceiver<ProgressEvent>, spinner: ProgressBar) {
    while let Some(event) = events.recv().await {
        if event.phase.is_terminal() {
            continue;
        }

        let estimate = event
            .estimate
            .filter(|estimate| !estimate.is_zero())
            .map(|estimate| format!(" {}", style(format!("(~{})", format_duration(estimate))).dim()))
            .unwrap_or_default();
        spinner.set_message(format!("{} {}{}", style(event.phase).cyan(), event.detail, estimate));
    }
}

/// Turn Ctrl-C into a cancellation request
pub async fn cancel_on_interrupt(cancel: CancellationHandle) {
    while tokio::signal::ctrl_c().await.is_ok() {
        match cancel.cancel() {
            Ok(()) => eprintln!("{}Cancelling before anything is dropped...", WARNING),
            Err(e) => eprintln!("{}{}; waiting for the reset to finish", WARNING, e),
        }
    }
}

/// Asks on the terminal. High risk requires typing the database name.
pub struct InquireGate {
    spinner: ProgressBar,
}

impl InquireGate {
    pub fn new(spinner: ProgressBar) -> Self {
        Self { spinner }
    }
}

#[async_trait]
impl ConfirmationGate for InquireGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> EngineResult<bool> {
        let request = request.clone();
        let spinner = self.spinner.clone();

        tokio::task::spawn_blocking(move || spinner.suspend(|| prompt(&request)))
            .await
            .map_err(|e| EngineError::ConfirmationInput(e.to_string()))?
    }
}

fn prompt(request: &ConfirmationRequest) -> EngineResult<bool> {
    let level = match request.risk.level {
        RiskLevel::Low => style(request.risk.level).green(),
        RiskLevel::Medium => style(request.risk.level).yellow(),
        RiskLevel::High => style(request.risk.level).red().bold(),
    };

    println!();
    println!("{}{}", WARNING, style(request.summary()).bold());
    println!("   Target: {}", request.target);
    println!("   Risk:   {}", level);
    println!();

    let answer = if request.requires_strict_confirmation() {
        Text::new(&format!("Type the database name ({}) to confirm:", request.database))
            .prompt()
            .map(|typed| typed.trim() == request.database)
    } else {
        Confirm::new("Drop all tables and rebuild the schema?")
            .with_default(false)
            .with_help_message("This cannot be undone without a backup")
            .prompt()
    };

    match answer {
        Ok(approved) => Ok(approved),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(false),
        Err(e) => Err(EngineError::ConfirmationInput(e.to_string())),
    }
}

/// Terminal answers for the pre-run backup questions
pub struct InquireBackupPrompt;

impl BackupPrompt for InquireBackupPrompt {
    fn wants_backup(&self) -> anyhow::Result<bool> {
        match Confirm::new("Do you want to create a backup before proceeding?")
            .with_default(false)
            .prompt()
        {
            Ok(wanted) => Ok(wanted),
            Err(InquireError::OperationCanceled) => Ok(false),
            Err(InquireError::OperationInterrupted) => anyhow::bail!("Interrupted"),
            Err(e) => Err(e.into()),
        }
    }

    fn backup_path(&self, default: &Path) -> anyhow::Result<PathBuf> {
        let default = default.display().to_string();
        match Text::new("Backup path:").with_default(&default).prompt() {
            Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path.trim())),
            Ok(_) | Err(InquireError::OperationCanceled) => Ok(PathBuf::from(default)),
            Err(InquireError::OperationInterrupted) => anyhow::bail!("Interrupted"),
            Err(e) => Err(e.into()),
        }
    }
}
