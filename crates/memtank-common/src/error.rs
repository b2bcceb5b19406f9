//! Error types for memtank
//!
//! Configuration and input errors are rejected at the boundary; nothing in
//! here is raised from inside the registry itself.

use thiserror::Error;

/// Common result type for memtank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for memtank
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{field} must be positive")]
    NotPositive { field: String },

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("invalid aggregation setting {value:?}: {reason}")]
    InvalidAggSetting { value: String, reason: String },

    #[error("Invalid aggregation func: {0}")]
    InvalidAggFunc(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid aggregation setting error
    pub fn invalid_agg_setting(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAggSetting {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
