//! External command replayer
//!
//! Hands schema creation to the project's own migration binary, e.g.
//! `cargo run --bin migrate`. The database URL is passed as `DATABASE_URL`.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::definitions::ReplaySummary;
use super::MigrationReplayer;
use crate::backends::DatabaseConnection;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct CommandMigrationReplayer {
    program: String,
    args: Vec<String>,
}

impl CommandMigrationReplayer {
    /// Build from a full command line; the first element is the program
    pub fn new(command: &[String]) -> EngineResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| EngineError::Configuration("Migration command is empty".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl MigrationReplayer for CommandMigrationReplayer {
    async fn replay(
        &self,
        descriptor: &ConnectionDescriptor,
        _conn: &mut dyn DatabaseConnection,
    ) -> EngineResult<ReplaySummary> {
        let start = Instant::now();
        tracing::info!(command = %self.command_line(), "Running migration command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .env("DATABASE_URL", descriptor.url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::ReplayFailure(format!("Failed to start {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(EngineError::ReplayFailure(format!(
                "`{}` exited with {}: {}",
                self.command_line(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(ReplaySummary {
            applied: Vec::new(),
            skipped: 0,
            elapsed_ms: start.elapsed().as_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDatabase;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(matches!(
            CommandMigrationReplayer::new(&[]),
            Err(EngineError::Configuration(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sees_database_url() {
        let replayer = CommandMigrationReplayer::new(&command(&[
            "sh",
            "-c",
            "test \"$DATABASE_URL\" = \"sqlite://app.db\"",
        ]))
        .unwrap();
        let descriptor = ConnectionDescriptor::from_url("sqlite://app.db").unwrap();
        let db = FakeDatabase::with_tables(&[]);

        let summary = replayer.replay(&descriptor, &mut db.connection()).await.unwrap();
        assert!(summary.applied.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_replay_failure() {
        let replayer = CommandMigrationReplayer::new(&command(&["sh", "-c", "echo boom >&2; exit 3"])).unwrap();
        let descriptor = ConnectionDescriptor::from_url("sqlite://app.db").unwrap();
        let db = FakeDatabase::with_tables(&[]);

        let result = replayer.replay(&descriptor, &mut db.connection()).await;
        assert!(matches!(result, Err(EngineError::ReplayFailure(message)) if message.contains("boom")));
    }
}
