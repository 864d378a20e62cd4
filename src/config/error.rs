//! Error types for configuration system.
//!
//! Configuration errors are fatal at construction time and never retried.
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum ConfigError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Missing env var: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Env file error: {0}")]
    EnvFile(String),
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
