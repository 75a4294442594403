use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Log levels accepted by `log_level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Check that a configured SQL identifier (table or column name) is a plain
/// identifier. These names are interpolated into generated SQL.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(
            field,
            value,
            "an identifier of letters, digits and underscores",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("table", "users").is_ok());
        assert!(validate_identifier("table", "_schema_migrations2").is_ok());
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "2fa").is_err());
        assert!(validate_identifier("table", "users; DROP").is_err());
    }

    #[test]
    fn test_error_messages_name_the_field() {
        let err = ConfigError::missing_required("database_url", "Set DATABASE_URL");
        assert_eq!(
            err.to_string(),
            "Missing required field: database_url. Set DATABASE_URL"
        );

        let err = ConfigError::invalid_value("log_level", "loud", "one of: info");
        assert!(err.to_string().contains("'log_level'"));
    }
}
