/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value loaded from environment variable
    EnvVar(String),
    /// Default value used
    Default,
    /// Value loaded from file
    File(String),
    /// Value provided programmatically (e.g. a CLI flag)
    Programmatic,
}

impl ConfigSource {
    pub fn is_env_var(&self) -> bool {
        matches!(self, ConfigSource::EnvVar(_))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ConfigSource::Default)
    }

    /// Get source description
    pub fn description(&self) -> String {
        match self {
            ConfigSource::EnvVar(var) => format!("environment variable {}", var),
            ConfigSource::Default => "default value".to_string(),
            ConfigSource::File(path) => format!("configuration file {}", path),
            ConfigSource::Programmatic => "command line".to_string(),
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
