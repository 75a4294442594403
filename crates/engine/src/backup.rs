//! Backup Coordinator
//!
//! Runs the vendor's dump utility (`pg_dump`, `mysqldump`) or copies the
//! database file for SQLite, and waits for it to finish. A non-zero exit is a
//! `BackupFailure`; running past the caller's timeout is a `BackupTimeout` and
//! the child process is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;

use dbfresh_core::BackupToolsConfig;

use crate::backends::DatabaseBackendType;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub vendor: DatabaseBackendType,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    pub size_bytes: Option<u64>,
}

impl BackupRecord {
    pub fn pending(path: impl Into<PathBuf>, vendor: DatabaseBackendType) -> Self {
        Self {
            path: path.into(),
            vendor,
            timestamp: Utc::now(),
            status: BackupStatus::Pending,
            size_bytes: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }
}

/// Something that can snapshot a database before it is dropped
#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// Write a backup of `descriptor` to `path`, blocking until it completes
    async fn backup(
        &self,
        descriptor: &ConnectionDescriptor,
        path: &Path,
        timeout: Duration,
    ) -> EngineResult<BackupRecord>;
}

/// `backup_<database>_<YYYYmmdd_HHMMSS>.sql` (`.sqlite3` for SQLite), under `dir`
/// when one is given
pub fn default_backup_path(
    descriptor: &ConnectionDescriptor,
    dir: Option<&Path>,
    now: DateTime<Utc>,
) -> PathBuf {
    let is_sqlite = matches!(descriptor.backend_type(), Ok(DatabaseBackendType::SQLite));

    let database = if is_sqlite {
        Path::new(descriptor.database())
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("database")
            .to_string()
    } else {
        descriptor.database().to_string()
    };
    let database: String = database
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();

    let extension = if is_sqlite { "sqlite3" } else { "sql" };
    let filename = format!(
        "backup_{}_{}.{}",
        database,
        now.format("%Y%m%d_%H%M%S"),
        extension
    );

    match dir {
        Some(dir) => dir.join(filename),
        None => PathBuf::from(filename),
    }
}

/// A dump utility invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl BackupCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run to completion, killing the child if `timeout` elapses first
    pub async fn run(&self, timeout: Duration) -> EngineResult<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::BackupFailure(format!("Failed to start {}: {}", self.program, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::BackupTimeout(timeout))?
            .map_err(|e| EngineError::BackupFailure(format!("{} did not complete: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::BackupFailure(format!(
                "{} exited with {}: {}",
                self.program,
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Backups through external dump programs, or a file copy for SQLite
#[derive(Debug, Clone)]
pub struct ExternalBackup {
    tools: BackupToolsConfig,
}

impl ExternalBackup {
    pub fn new(tools: BackupToolsConfig) -> Self {
        Self { tools }
    }

    /// The dump invocation for server databases; `None` for file-based ones
    pub fn dump_command(
        &self,
        descriptor: &ConnectionDescriptor,
        path: &Path,
    ) -> EngineResult<Option<BackupCommand>> {
        let host = descriptor.host().unwrap_or("localhost").to_string();
        let output = path.to_string_lossy().into_owned();

        let command = match descriptor.backend_type()? {
            DatabaseBackendType::PostgreSQL => {
                let mut args = vec![
                    "--host".to_string(),
                    host,
                    "--port".to_string(),
                    descriptor.port().unwrap_or(5432).to_string(),
                    "--dbname".to_string(),
                    descriptor.database().to_string(),
                    "--file".to_string(),
                    output,
                    "--no-password".to_string(),
                ];
                if let Some(user) = descriptor.username() {
                    args.extend(["--username".to_string(), user.to_string()]);
                }
                let command = BackupCommand::new(&self.tools.pg_dump, args);
                match descriptor.password() {
                    Some(password) => command.env("PGPASSWORD", password),
                    None => command,
                }
            }
            DatabaseBackendType::MySQL => {
                let mut args = vec![
                    "--host".to_string(),
                    host,
                    "--port".to_string(),
                    descriptor.port().unwrap_or(3306).to_string(),
                    "--result-file".to_string(),
                    output,
                ];
                if let Some(user) = descriptor.username() {
                    args.extend(["--user".to_string(), user.to_string()]);
                }
                args.push(descriptor.database().to_string());
                let command = BackupCommand::new(&self.tools.mysqldump, args);
                match descriptor.password() {
                    Some(password) => command.env("MYSQL_PWD", password),
                    None => command,
                }
            }
            DatabaseBackendType::SQLite => return Ok(None),
        };

        Ok(Some(command))
    }

    async fn copy_file(descriptor: &ConnectionDescriptor, path: &Path, timeout: Duration) -> EngineResult<()> {
        let source = descriptor.file_path().ok_or_else(|| {
            EngineError::BackupFailure("In-memory SQLite databases cannot be backed up".to_string())
        })?;

        tokio::time::timeout(timeout, tokio::fs::copy(&source, path))
            .await
            .map_err(|_| EngineError::BackupTimeout(timeout))?
            .map_err(|e| {
                EngineError::BackupFailure(format!("Failed to copy {}: {}", source.display(), e))
            })?;

        Ok(())
    }
}

impl Default for ExternalBackup {
    fn default() -> Self {
        Self::new(BackupToolsConfig::default())
    }
}

#[async_trait]
impl BackupProvider for ExternalBackup {
    async fn backup(
        &self,
        descriptor: &ConnectionDescriptor,
        path: &Path,
        timeout: Duration,
    ) -> EngineResult<BackupRecord> {
        let mut record = BackupRecord::pending(path, descriptor.backend_type()?);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::BackupFailure(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        tracing::info!(path = %path.display(), vendor = %record.vendor, "Starting backup");

        match self.dump_command(descriptor, path)? {
            Some(command) => command.run(timeout).await?,
            None => Self::copy_file(descriptor, path, timeout).await?,
        }

        record.status = BackupStatus::Completed;
        record.timestamp = Utc::now();
        record.size_bytes = tokio::fs::metadata(path).await.ok().map(|m| m.len());

        tracing::info!(path = %path.display(), size_bytes = ?record.size_bytes, "Backup completed");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 5).unwrap()
    }

    #[test]
    fn test_default_path_names() {
        let pg = ConnectionDescriptor::from_url("postgres://localhost/shop").unwrap();
        assert_eq!(
            default_backup_path(&pg, None, at_noon()),
            PathBuf::from("backup_shop_20240309_120005.sql")
        );

        let lite = ConnectionDescriptor::from_url("sqlite://var/app.db").unwrap();
        assert_eq!(
            default_backup_path(&lite, Some(Path::new("backups")), at_noon()),
            PathBuf::from("backups/backup_app_20240309_120005.sqlite3")
        );
    }

    #[test]
    fn test_pg_dump_command_passes_password_through_env() {
        let descriptor =
            ConnectionDescriptor::from_url("postgres://app:s3cret@db:6543/shop").unwrap();
        let command = ExternalBackup::default()
            .dump_command(&descriptor, Path::new("out.sql"))
            .unwrap()
            .unwrap();

        assert_eq!(command.program, "pg_dump");
        assert!(command.args.windows(2).any(|w| w == ["--port", "6543"]));
        assert!(command.args.windows(2).any(|w| w == ["--username", "app"]));
        assert!(!command.args.iter().any(|arg| arg.contains("s3cret")));
        assert_eq!(command.envs, vec![("PGPASSWORD".to_string(), "s3cret".to_string())]);
    }

    #[test]
    fn test_mysqldump_command_uses_result_file() {
        let descriptor = ConnectionDescriptor::from_url("mysql://root:pw@localhost/shop").unwrap();
        let command = ExternalBackup::default()
            .dump_command(&descriptor, Path::new("out.sql"))
            .unwrap()
            .unwrap();

        assert_eq!(command.program, "mysqldump");
        assert!(command.args.windows(2).any(|w| w == ["--result-file", "out.sql"]));
        assert_eq!(command.args.last().map(String::as_str), Some("shop"));
    }

    #[tokio::test]
    async fn test_sqlite_backup_copies_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("app.db");
        std::fs::write(&source, b"sqlite bytes").unwrap();

        let descriptor =
            ConnectionDescriptor::from_url(&format!("sqlite://{}", source.display())).unwrap();
        let target = dir.path().join("nested").join("backup.sqlite3");

        let record = ExternalBackup::default()
            .backup(&descriptor, &target, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(record.is_completed());
        assert_eq!(record.size_bytes, Some(12));
        assert_eq!(std::fs::read(&target).unwrap(), b"sqlite bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_backup_failure() {
        let result = BackupCommand::new("false", Vec::<String>::new())
            .run(Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(EngineError::BackupFailure(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let result = BackupCommand::new("sleep", ["5"])
            .run(Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(EngineError::BackupTimeout(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_backup_failure() {
        let result = BackupCommand::new("dbfresh-no-such-dump-tool", ["--version"])
            .run(Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(EngineError::BackupFailure(_))));
    }
}
