//! # Error Types: Shared Error Vocabulary
//!
//! ## Design
//!
//! Every domain error in the workspace maps onto one [`ErrorClass`]. The class
//! decides retry behavior in the reconciler and the HTTP status in the API:
//!
//! - `Validation`: bad input or unknown identifiers. Never retried.
//! - `Conflict`: the request is well-formed but the current state forbids it.
//!   Never retried.
//! - `Transient`: I/O, timeouts, an overloaded peer. Retried with backoff.
//! - `Integrity`: the audit chain failed verification. Alarm-worthy; appends
//!   halt until an operator acknowledges the investigation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Conflict,
    Transient,
    Integrity,
}

impl ErrorClass {
    /// Whether an operation failing with this class may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Integrity => "integrity",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Floats are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Input rejected at a type boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Owner identity was empty or too long.
    #[error("invalid owner id: {0}")]
    InvalidOwnerId(String),

    /// Operation idempotency id was empty or too long.
    #[error("invalid operation id: {0}")]
    InvalidOperationId(String),

    /// A UUID-backed identifier failed to parse.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected input.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Timestamp was not RFC 3339 UTC or a valid epoch value.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Digest string was not 64 lowercase hex characters.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Unknown enumeration value.
    #[error("unknown {kind} {value:?}")]
    UnknownVariant {
        /// Which enumeration was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}

impl ValidationError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}
