//! Error taxonomy for the SPC engine.
//!
//! Two kinds of failure exist:
//!
//! - [`SpcError`] is returned through `Result` and aborts the requested
//!   computation. Every variant is deterministic: the same input always
//!   produces the same error.
//! - [`UndefinedMetricError`] is *not* returned through `Result`. It is
//!   carried as a value (see [`crate::capability::Metric`]) so that an
//!   undefined index never turns into `NaN` or `Infinity` inside a report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate.
pub type SpcResult<T> = Result<T, SpcError>;

/// Fatal errors raised by the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpcError {
    /// Malformed input, rejected before any computation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Fewer points or subgroups than the requested computation needs.
    #[error("insufficient data for {what}: need at least {required}, got {actual}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        actual: usize,
    },

    /// Configuration could not be parsed or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A record referenced a characteristic the engine has no spec for.
    #[error("unknown characteristic: {0}")]
    UnknownCharacteristic(String),

    /// A stream received a point older than the last one it accepted.
    #[error("out-of-order measurement for {characteristic}: {received} is before {last}")]
    OutOfOrder {
        characteristic: String,
        last: String,
        received: String,
    },
}

impl SpcError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        SpcError::Validation(msg.into())
    }

    pub(crate) fn insufficient(what: &'static str, required: usize, actual: usize) -> Self {
        SpcError::InsufficientData {
            what,
            required,
            actual,
        }
    }
}

/// Reason a capability metric could not be computed.
///
/// Reported as a value, never thrown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedMetricError {
    /// The sigma estimate is exactly zero (all samples identical).
    #[error("undefined (zero variance)")]
    ZeroVariance,

    /// The sigma estimate is NaN or infinite.
    #[error("undefined (non-finite sigma)")]
    NonFiniteSigma,
}
