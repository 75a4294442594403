use crate::config::{validate_identifier, ConfigError, ConfigSource, VALID_LOG_LEVELS};
use crate::environment::Environment;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file picked up from the working directory when no explicit
/// path is given.
pub const DEFAULT_CONFIG_FILE: &str = "dbfresh.yaml";

/// Complete configuration for a reset run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FreshConfig {
    pub environment: Environment,
    pub database_url: Option<String>,
    pub log_level: String,
    /// Schema whose tables are enumerated on PostgreSQL
    pub postgres_schema: String,
    /// Tables per drop batch; `None` uses the vendor default, `0` is unbatched
    pub batch_size: Option<usize>,
    pub backup_timeout_secs: u64,
    /// Directory for generated backup file names
    pub backup_dir: Option<PathBuf>,
    pub risk: RiskConfig,
    pub migrations: MigrationsConfig,
    pub seeds_dir: PathBuf,
    pub default_account: Option<AccountConfig>,
    pub backup_tools: BackupToolsConfig,
    #[serde(skip)]
    sources: HashMap<String, ConfigSource>,
}

/// Thresholds for the advisory risk assessment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub large_dataset_bytes: u64,
    pub relationship_threshold: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
    pub table: String,
    /// External command that replays migrations instead of the SQL files,
    /// e.g. `["cargo", "run", "--bin", "migrate"]`
    pub command: Option<Vec<String>>,
}

/// Account created after the schema is rebuilt, if it does not exist yet
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub table: String,
    pub identity_column: String,
    pub identity: String,
    /// Extra column values written on insert
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

/// External programs used for backups
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupToolsConfig {
    pub pg_dump: String,
    pub mysqldump: String,
}

impl Default for FreshConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            database_url: None,
            log_level: "info".to_string(),
            postgres_schema: "public".to_string(),
            batch_size: None,
            backup_timeout_secs: 300,
            backup_dir: None,
            risk: RiskConfig::default(),
            migrations: MigrationsConfig::default(),
            seeds_dir: PathBuf::from("database/seeds"),
            default_account: None,
            backup_tools: BackupToolsConfig::default(),
            sources: HashMap::new(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            large_dataset_bytes: 1024 * 1024 * 1024,
            relationship_threshold: 5,
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
            table: "dbfresh_migrations".to_string(),
            command: None,
        }
    }
}

impl Default for BackupToolsConfig {
    fn default() -> Self {
        Self {
            pg_dump: "pg_dump".to_string(),
            mysqldump: "mysqldump".to_string(),
        }
    }
}

impl FreshConfig {
    /// Load configuration: optional YAML file, then environment overrides,
    /// then validation.
    ///
    /// An explicit `path` must exist. Without one, `dbfresh.yaml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        if value.is_null() {
            return Ok(Self::default());
        }

        let mut config: FreshConfig = serde_yaml::from_value(value.clone())?;
        let source = ConfigSource::File(path.display().to_string());
        if let Some(mapping) = value.as_mapping() {
            for key in mapping.keys().filter_map(|k| k.as_str()) {
                config.sources.insert(key.to_string(), source.clone());
            }
        }

        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = Some(url);
            self.record_env("database_url", "DATABASE_URL");
        }

        if let Ok(env_name) = env::var("DBFRESH_ENV") {
            self.environment = Environment::parse(&env_name);
            self.record_env("environment", "DBFRESH_ENV");
        }

        if let Ok(level) = env::var("DBFRESH_LOG") {
            self.log_level = level;
            self.record_env("log_level", "DBFRESH_LOG");
        }

        if let Ok(size) = env::var("DBFRESH_BATCH_SIZE") {
            let parsed = size.parse().map_err(|_| {
                ConfigError::invalid_value("batch_size", &size, "a non-negative integer")
            })?;
            self.batch_size = Some(parsed);
            self.record_env("batch_size", "DBFRESH_BATCH_SIZE");
        }

        if let Ok(timeout) = env::var("DBFRESH_BACKUP_TIMEOUT") {
            self.backup_timeout_secs = timeout.parse().map_err(|_| {
                ConfigError::invalid_value("backup_timeout_secs", &timeout, "a number of seconds")
            })?;
            self.record_env("backup_timeout_secs", "DBFRESH_BACKUP_TIMEOUT");
        }

        if let Ok(dir) = env::var("DBFRESH_MIGRATIONS_DIR") {
            self.migrations.dir = PathBuf::from(dir);
            self.record_env("migrations", "DBFRESH_MIGRATIONS_DIR");
        }

        if let Ok(dir) = env::var("DBFRESH_SEEDS_DIR") {
            self.seeds_dir = PathBuf::from(dir);
            self.record_env("seeds_dir", "DBFRESH_SEEDS_DIR");
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid_value(
                "log_level",
                &self.log_level,
                format!("one of: {}", VALID_LOG_LEVELS.join(", ")),
            ));
        }

        if self.backup_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "backup_timeout_secs",
                "0",
                "a timeout of at least one second",
            ));
        }

        validate_identifier("postgres_schema", &self.postgres_schema)?;
        validate_identifier("migrations.table", &self.migrations.table)?;

        if let Some(command) = &self.migrations.command {
            if command.is_empty() {
                return Err(ConfigError::invalid_value(
                    "migrations.command",
                    "[]",
                    "a program followed by its arguments",
                ));
            }
        }

        if let Some(account) = &self.default_account {
            validate_identifier("default_account.table", &account.table)?;
            validate_identifier("default_account.identity_column", &account.identity_column)?;
            for column in account.columns.keys() {
                validate_identifier("default_account.columns", column)?;
            }
        }

        Ok(())
    }

    /// The configured database URL, or a `MissingRequired` error explaining
    /// how to set one.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set DATABASE_URL, pass --database-url, or add database_url to dbfresh.yaml",
            )
        })
    }

    /// Override the database URL from the command line
    pub fn set_database_url(&mut self, url: impl Into<String>) {
        self.database_url = Some(url.into());
        self.sources
            .insert("database_url".to_string(), ConfigSource::Programmatic);
    }

    /// Override the environment from the command line
    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
        self.sources
            .insert("environment".to_string(), ConfigSource::Programmatic);
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout_secs)
    }

    /// Where a top-level field's value came from
    pub fn source(&self, field: &str) -> ConfigSource {
        self.sources
            .get(field)
            .cloned()
            .unwrap_or(ConfigSource::Default)
    }

    fn record_env(&mut self, field: &str, var: &str) {
        self.sources
            .insert(field.to_string(), ConfigSource::EnvVar(var.to_string()));
    }
}
