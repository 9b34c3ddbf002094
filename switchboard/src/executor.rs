//! The injected execution capability.
//!
//! The router never talks to a backend itself. Callers hand it one
//! [`Executable`] that knows how to run a payload on any candidate; the
//! router only decides *which* candidate and what to do when it fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{CandidateId, Tier};

/// Everything an executor gets for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub request_id: Uuid,
    pub candidate: &'a CandidateId,
    pub tier: &'a Tier,
    pub payload: &'a serde_json::Value,
    /// 1-based attempt number within the request
    pub attempt: u32,
    /// Time budget of this attempt; the router enforces it regardless
    pub timeout: Duration,
}

/// A backend's successful answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub output: serde_json::Value,
    /// Self-reported quality in `[0, 1]`
    #[serde(default)]
    pub quality: Option<f64>,
    /// Resource units consumed (tokens, credits)
    #[serde(default)]
    pub units_used: u64,
    /// Time spent outside the backend call proper
    #[serde(default)]
    pub overhead: Duration,
}

impl Completion {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            quality: None,
            units_used: 0,
            overhead: Duration::ZERO,
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_units(mut self, units: u64) -> Self {
        self.units_used = units;
        self
    }

    pub fn with_overhead(mut self, overhead: Duration) -> Self {
        self.overhead = overhead;
        self
    }
}

/// A backend-reported failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendFailure {
    pub message: String,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runs a payload on a chosen candidate.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, ctx: AttemptContext<'_>) -> Result<Completion, BackendFailure>;
}
