//! Error types for footprint-core

use thiserror::Error;

use crate::report::AggregateMeasurementError;

/// Result type alias using footprint-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the registry, orchestrator and fixtures
#[derive(Error, Debug)]
pub enum Error {
    /// A resource with the same key is already registered
    #[error("Duplicate resource key: {key}")]
    DuplicateKey { key: String },

    /// A resource supplied a key that cannot identify it
    #[error("Invalid resource key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Lookup of a key that is not registered
    #[error("Resource not found: {key}")]
    NotFound { key: String },

    /// A fail-fast measurement pass stopped at the first failure
    #[error(transparent)]
    Aborted(Box<AggregateMeasurementError>),

    /// Filesystem helpers only accept absolute paths
    #[error("Path must be absolute: {path}")]
    RelativePath { path: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration content
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),
}

impl Error {
    /// Create a duplicate key error
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        Self::DuplicateKey { key: key.into() }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a relative path error
    pub fn relative_path(path: impl Into<String>) -> Self {
        Self::RelativePath { path: path.into() }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error is a resource contract violation raised at registration
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::InvalidKey { .. })
    }

    /// Partial results carried by an aborted pass
    pub fn partial_report(&self) -> Option<&crate::report::MeasurementReport> {
        match self {
            Self::Aborted(aggregate) => Some(&aggregate.partial),
            _ => None,
        }
    }
}

impl From<AggregateMeasurementError> for Error {
    fn from(err: AggregateMeasurementError) -> Self {
        Self::Aborted(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_classification() {
        assert!(Error::duplicate_key("fake1").is_contract_violation());
        assert!(Error::invalid_key("", "empty").is_contract_violation());
        assert!(!Error::not_found("fake1").is_contract_violation());
        assert!(!Error::relative_path("a/b").is_contract_violation());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::duplicate_key("fake1").to_string(),
            "Duplicate resource key: fake1"
        );
        assert_eq!(
            Error::not_found("places").to_string(),
            "Resource not found: places"
        );
    }
}
