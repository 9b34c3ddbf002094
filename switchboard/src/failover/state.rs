//! Failover state machine: explicit states and legal transition guards.
//!
//! Every request drives its own machine. The engine calls `advance()` to
//! move between states; each call checks the edge against the transition
//! table and appends it to the log that ends up in the execution report.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// States of one request.
///
/// Every run starts at `Init` and ends at either `Success` or `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    /// Counters reset, deadline fixed.
    Init,
    /// Asking the selection policy for the next candidate.
    Selecting,
    /// Waiting on the backend call.
    Attempting,
    /// Sleeping out the backoff before the next selection.
    Retry,
    /// A backend returned a result. Terminal.
    Success,
    /// Out of candidates, attempts, or time. Terminal.
    Exhausted,
}

impl FailoverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Exhausted)
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Selecting => write!(f, "SELECTING"),
            Self::Attempting => write!(f, "ATTEMPTING"),
            Self::Retry => write!(f, "RETRY"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// ```text
/// Init       → Selecting
/// Selecting  → Attempting
/// Attempting → Success | Retry
/// Retry      → Selecting
/// any non-terminal → Exhausted
/// ```
fn is_legal_transition(from: FailoverState, to: FailoverState) -> bool {
    use FailoverState::*;

    if to == Exhausted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, Selecting)
            | (Selecting, Attempting)
            | (Attempting, Success)
            | (Attempting, Retry)
            | (Retry, Selecting)
    )
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: FailoverState,
    pub to: FailoverState,
    /// Attempts started when the transition happened
    pub attempt: u32,
    /// Milliseconds since the request started
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: FailoverState,
    pub to: FailoverState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal failover transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-request state machine with a transition log.
#[derive(Debug)]
pub struct FailoverMachine {
    current: FailoverState,
    attempt: u32,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl FailoverMachine {
    /// Start a machine at `Init`.
    pub fn new() -> Self {
        Self {
            current: FailoverState::Init,
            attempt: 0,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> FailoverState {
        self.current
    }

    /// Attempts started so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Count a new attempt. Called when entering `Attempting`.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn advance(
        &mut self,
        to: FailoverState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "Failover transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.elapsed_ms(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line history, e.g. `INIT → SELECTING → ATTEMPTING → SUCCESS`.
    pub fn summary(&self) -> String {
        std::iter::once(FailoverState::Init.to_string())
            .chain(self.transitions.iter().map(|t| t.to.to_string()))
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

impl Default for FailoverMachine {
    fn default() -> Self {
        Self::new()
    }
}
