use serde::{Deserialize, Serialize};

/// Deployment environment the reset runs against.
///
/// Unknown names are kept as [`Environment::Custom`] and treated like
/// production: they never count as a development environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Environment {
    Development,
    Testing,
    Staging,
    Production,
    Custom(String),
}

impl Environment {
    /// Parse environment from string
    pub fn parse(env: &str) -> Self {
        match env.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" => Environment::Development,
            "testing" | "test" => Environment::Testing,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            custom => Environment::Custom(custom.to_string()),
        }
    }

    /// Get environment name as string
    pub fn as_str(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Custom(name) => name,
        }
    }

    /// Development and testing databases are considered disposable.
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development | Environment::Testing)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl From<String> for Environment {
    fn from(value: String) -> Self {
        Environment::parse(&value)
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Environment::parse("dev"), Environment::Development);
        assert_eq!(Environment::parse("TEST"), Environment::Testing);
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("prod"), Environment::Production);
        assert_eq!(
            Environment::parse("qa-eu"),
            Environment::Custom("qa-eu".to_string())
        );
    }

    #[test]
    fn test_development_classification() {
        assert!(Environment::Development.is_development());
        assert!(Environment::Testing.is_development());
        assert!(!Environment::Staging.is_development());
        assert!(!Environment::Production.is_development());
        assert!(!Environment::Custom("qa".into()).is_development());
    }

    #[test]
    fn test_yaml_round_trip_uses_plain_names() {
        let env: Environment = serde_yaml::from_str("production").unwrap();
        assert_eq!(env, Environment::Production);
        assert_eq!(serde_yaml::to_string(&env).unwrap().trim(), "production");
    }
}
