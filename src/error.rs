//! Error Types
//!
//! Failure taxonomy shared by the sampler, the usage sources and the
//! scoped helpers.

use thiserror::Error;

/// Failure raised by a usage source while it is being queried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The underlying OS or driver query failed
    #[error("{backend} query failed: {message}")]
    Backend { backend: String, message: String },

    /// A per-core reading changed its length mid-run
    #[error("reading has {found} channels, expected {expected}")]
    ChannelMismatch { expected: usize, found: usize },

    /// A percentage outside [0, 100] or a non-finite value
    #[error("usage value {0} is not a percentage in [0, 100]")]
    OutOfRange(f64),
}

impl SourceError {
    /// Shorthand for a backend failure.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the monitoring API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    /// Rejected construction parameters (non-positive delay, negative buffer)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An optional capability (GPU) was requested but is not present
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The background sampling loop stopped because its source failed
    #[error("usage source failed: {0}")]
    SourceQuery(#[from] SourceError),

    /// Not enough data to compute a summary over the requested window
    #[error("{0}")]
    Range(String),

    /// Lifecycle precondition violated (e.g. starting a sampler twice)
    #[error("invalid sampler state: {0}")]
    State(String),
}

/// Checks that `value` is a finite, strictly positive number of seconds.
pub(crate) fn require_positive(name: &str, value: f64) -> Result<f64, MonitorError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(MonitorError::InvalidConfig(format!(
            "{} must be a positive number of seconds, got {}",
            name, value
        )))
    }
}

/// Checks that `value` is a finite, non-negative number of seconds.
pub(crate) fn require_non_negative(name: &str, value: f64) -> Result<f64, MonitorError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(MonitorError::InvalidConfig(format!(
            "{} must be zero or a positive number of seconds, got {}",
            name, value
        )))
    }
}
