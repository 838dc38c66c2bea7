//! Configuration errors.

use thiserror::Error;

use crate::target::ValidationError;

/// Reasons a configuration file cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A server, fetch or history setting is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// A seed target fails the same checks as an API registration.
    #[error("targets[{index}]: {source}")]
    InvalidTarget {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Field violations of a rejected seed target, if that is the cause.
    pub fn target_violations(&self) -> Option<(usize, &ValidationError)> {
        match self {
            Self::InvalidTarget { index, source } => Some((*index, source)),
            _ => None,
        }
    }
}
