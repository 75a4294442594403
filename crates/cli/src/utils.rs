use std::time::Duration;

use console::style;

use dbfresh_engine::{PlanPreview, PostStepStatus, ResetOutcome, ResetResult};

/// `1m 05s`, `12s`, `350ms`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

fn print_preview(preview: &PlanPreview) {
    println!("{}", style("Dry run: nothing was changed").bold().cyan());
    println!("   Vendor:  {}", preview.vendor);
    println!(
        "   Tables:  {} in {} batch(es) of {}",
        preview.tables.len(),
        preview.batch_count,
        if preview.batch_size == 0 {
            "all".to_string()
        } else {
            preview.batch_size.to_string()
        }
    );
    for table in &preview.tables {
        println!("     - {}", table);
    }
    if let Some(path) = &preview.backup_path {
        println!("   Backup:  {}", path.display());
    }
    println!("   Steps:   {}", preview.steps.join(" → "));
}

pub fn print_result(result: &ResetResult) {
    println!();

    match &result.outcome {
        ResetOutcome::Succeeded => {
            if let Some(preview) = &result.preview {
                print_preview(preview);
                return;
            }

            println!(
                "{} Dropped {} table(s) in {}",
                style("✓").green().bold(),
                result.tables_dropped,
                format_duration(result.elapsed)
            );
            if let Some(replay) = &result.replay {
                println!("   Applied {} migration(s)", replay.applied_count());
            }
            if let Some(backup) = &result.backup {
                println!("   Backup: {}", backup.path.display());
            }
            for report in &result.post_steps {
                let marker = match report.status {
                    PostStepStatus::Completed => style("✓").green(),
                    PostStepStatus::Skipped => style("-").dim(),
                    PostStepStatus::Failed => style("✗").yellow(),
                };
                println!("   {} {}: {}", marker, report.step, report.detail);
            }
            if result.post_step_failures().next().is_some() {
                println!(
                    "{}",
                    style("Schema is rebuilt; some post-processing steps failed").yellow()
                );
            }
        }
        ResetOutcome::Cancelled => {
            println!("{} Reset cancelled. Nothing was changed.", style("-").yellow().bold());
        }
        ResetOutcome::Failed { phase, cause } => {
            eprintln!("{} Reset failed during {}: {}", style("✗").red().bold(), phase, cause);

            if !result.is_unsafe_failure() {
                eprintln!("   No tables were dropped.");
            } else {
                eprintln!("   {}", style("The schema may be partially dropped.").red());
                match &result.backup {
                    Some(backup) if result.backup_exists => {
                        eprintln!("   Restore from the backup at {}", backup.path.display())
                    }
                    _ => eprintln!("   No backup was taken."),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(350)), "350ms");
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
    }
}
