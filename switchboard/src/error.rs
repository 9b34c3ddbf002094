//! Router error taxonomy
//!
//! `AttemptTimeout` and `AttemptError` are recovered inside the failover
//! engine and only ever reach a caller embedded as the last error of an
//! `Exhausted` result. `Persistence` never fails a request.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for router operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Why a request stopped before any attempt succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Every eligible candidate was tried or is unavailable.
    CandidatesExhausted,
    /// The attempt budget was used up.
    AttemptsExhausted,
    /// The overall deadline passed.
    DeadlineElapsed,
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CandidatesExhausted => write!(f, "candidates exhausted"),
            Self::AttemptsExhausted => write!(f, "attempts exhausted"),
            Self::DeadlineElapsed => write!(f, "deadline elapsed"),
        }
    }
}

/// Errors produced by the router.
///
/// The type is `Clone + Serialize` so it can travel inside an
/// [`ExecutionReport`](crate::failover::ExecutionReport).
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouterError {
    /// Bad tier, candidate, or configuration value
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Registry empty, or every candidate for the tier is excluded/unavailable
    #[error("No candidate available for tier '{tier}'")]
    NoCandidateAvailable { tier: String },

    /// A single backend call exceeded its per-attempt timeout
    #[error("Attempt on '{candidate}' timed out after {timeout_ms}ms")]
    AttemptTimeout { candidate: String, timeout_ms: u64 },

    /// A backend reported failure
    #[error("Attempt on '{candidate}' failed: {message}")]
    AttemptError { candidate: String, message: String },

    /// Attempts, candidates or time used up without a success
    #[error("Exhausted after {attempts} attempt(s): {reason}")]
    Exhausted {
        reason: ExhaustionReason,
        attempts: u32,
        last_error: Option<Box<RouterError>>,
    },

    /// Snapshot read/write failure (non-fatal for request handling)
    #[error("Persistence error: {message}")]
    Persistence { message: String },
}

impl RouterError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Whether the failover engine handles this error locally by retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AttemptTimeout { .. } | Self::AttemptError { .. })
    }

    /// Whether this error ends a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoCandidateAvailable { .. } | Self::Exhausted { .. } | Self::Validation { .. }
        )
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NoCandidateAvailable { .. } => "NO_CANDIDATE_AVAILABLE",
            Self::AttemptTimeout { .. } => "ATTEMPT_TIMEOUT",
            Self::AttemptError { .. } => "ATTEMPT_ERROR",
            Self::Exhausted { .. } => "EXHAUSTED",
            Self::Persistence { .. } => "PERSISTENCE",
        }
    }
}

impl From<std::io::Error> for RouterError {
    fn from(e: std::io::Error) -> Self {
        Self::persistence(e.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(e: serde_json::Error) -> Self {
        Self::persistence(format!("snapshot encoding: {e}"))
    }
}

impl From<toml::de::Error> for RouterError {
    fn from(e: toml::de::Error) -> Self {
        Self::validation(format!("invalid configuration TOML: {e}"))
    }
}
