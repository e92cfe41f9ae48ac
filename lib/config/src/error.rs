//! Error types for the config crate.

use std::fmt;
use std::path::PathBuf;

/// Errors raised while loading, validating or writing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    Load { reason: String },
    /// A setting holds a value outside its domain.
    Invalid { setting: String, reason: String },
    /// A file could not be written.
    Write { path: PathBuf, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { reason } => write!(f, "failed to load configuration: {reason}"),
            Self::Invalid { setting, reason } => {
                write!(f, "invalid setting '{setting}': {reason}")
            }
            Self::Write { path, reason } => {
                write!(f, "failed to write {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load {
            reason: err.to_string(),
        }
    }
}
