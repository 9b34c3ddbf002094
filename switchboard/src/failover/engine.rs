//! The execute loop.
//!
//! One call to [`AdaptiveRouter::execute`] drives one [`FailoverMachine`]:
//!
//! ```text
//! INIT → SELECTING ─ none ───────────────────────────────→ EXHAUSTED
//!           │
//!           └─ chosen → ATTEMPTING ─ ok ─────────────────→ SUCCESS
//!                           │
//!                           └─ error/timeout ─ budget left → RETRY → SELECTING
//!                                            └─ no budget ──→ EXHAUSTED
//! ```
//!
//! The only awaits are the backend call and the backoff sleep. Attempt
//! errors, timeouts and executor panics are handled here and never escape;
//! the caller always gets an [`ExecutionReport`].

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::state::{FailoverMachine, FailoverState, TransitionRecord};
use crate::error::{ExhaustionReason, RouterError, RouterResult};
use crate::executor::{AttemptContext, Completion};
use crate::router::{AdaptiveRouter, CircuitTransition, RoutingDecision};
use crate::scoring::Outcome;
use crate::types::{CandidateId, Tier};

/// Smallest remaining budget worth starting an attempt with.
const MIN_ATTEMPT_BUDGET: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum AttemptOutcome {
    Succeeded,
    TimedOut { timeout_ms: u64 },
    Failed { message: String },
}

/// One attempt as it appears in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub candidate: CandidateId,
    pub decision: RoutingDecision,
    pub latency_ms: u64,
    pub outcome: AttemptOutcome,
    /// This failure tripped the candidate's circuit
    pub circuit_opened: bool,
    /// Sleep before the next selection, if one followed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Structured result of [`AdaptiveRouter::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub request_id: Uuid,
    pub tier: Tier,
    pub status: ExecutionStatus,
    pub candidate_used: Option<CandidateId>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<RouterError>,
    /// Distinct candidates attempted, in order
    pub tried_candidates: Vec<CandidateId>,
    pub attempt_log: Vec<AttemptRecord>,
    pub transitions: Vec<TransitionRecord>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// The backend output, or the terminal error.
    pub fn into_result(self) -> RouterResult<serde_json::Value> {
        match (self.status, self.result, self.error) {
            (ExecutionStatus::Success, Some(value), _) => Ok(value),
            (_, _, Some(err)) => Err(err),
            _ => Err(RouterError::validation("report carries neither result nor error")),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Mutable bookkeeping of one request.
struct RequestRun<'a> {
    request_id: Uuid,
    tier: &'a Tier,
    machine: FailoverMachine,
    deadline: Instant,
    excluded: HashSet<CandidateId>,
    tried: Vec<CandidateId>,
    log: Vec<AttemptRecord>,
    last_error: Option<RouterError>,
}

impl<'a> RequestRun<'a> {
    fn new(tier: &'a Tier, overall_timeout: Duration) -> Self {
        let machine = FailoverMachine::new();
        let deadline = machine
            .started_at()
            .checked_add(overall_timeout)
            .unwrap_or_else(|| machine.started_at() + Duration::from_secs(86_400 * 365));
        Self {
            request_id: Uuid::new_v4(),
            tier,
            machine,
            deadline,
            excluded: HashSet::new(),
            tried: Vec::new(),
            log: Vec::new(),
            last_error: None,
        }
    }

    fn step(&mut self, to: FailoverState, reason: Option<&str>) {
        if let Err(e) = self.machine.advance(to, reason) {
            tracing::error!(request_id = %self.request_id, error = %e, "Failover state machine violated");
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn finish_success(mut self, candidate: CandidateId, completion: Completion) -> ExecutionReport {
        self.step(FailoverState::Success, None);
        tracing::debug!(
            request_id = %self.request_id,
            tier = %self.tier,
            candidate = %candidate,
            attempts = self.machine.attempt(),
            "Request succeeded"
        );
        self.report(ExecutionStatus::Success, Some(candidate), Some(completion.output), None)
    }

    fn finish_failed(mut self, error: RouterError) -> ExecutionReport {
        let reason = error.to_string();
        self.step(FailoverState::Exhausted, Some(&reason));
        tracing::warn!(
            request_id = %self.request_id,
            tier = %self.tier,
            attempts = self.machine.attempt(),
            tried = ?self.tried,
            error = %error,
            "Request failed"
        );
        self.report(ExecutionStatus::Failed, None, None, Some(error))
    }

    fn exhausted(self, reason: ExhaustionReason) -> ExecutionReport {
        let error = RouterError::Exhausted {
            reason,
            attempts: self.machine.attempt(),
            last_error: self.last_error.clone().map(Box::new),
        };
        self.finish_failed(error)
    }

    fn report(
        self,
        status: ExecutionStatus,
        candidate_used: Option<CandidateId>,
        result: Option<serde_json::Value>,
        error: Option<RouterError>,
    ) -> ExecutionReport {
        ExecutionReport {
            request_id: self.request_id,
            tier: self.tier.clone(),
            status,
            candidate_used,
            attempts: self.machine.attempt(),
            elapsed_ms: self.machine.elapsed_ms(),
            result,
            error,
            tried_candidates: self.tried,
            attempt_log: self.log,
            transitions: self.machine.into_transitions(),
        }
    }
}

impl AdaptiveRouter {
    /// Execute with the configured attempt budget and overall timeout.
    pub async fn execute_default(&self, tier: &Tier, payload: serde_json::Value) -> ExecutionReport {
        self.execute(
            tier,
            payload,
            self.config.max_attempts,
            self.config.overall_timeout(),
        )
        .await
    }

    /// Route `payload` to the best candidate of `tier`, failing over until
    /// a candidate succeeds or attempts, candidates, or time run out.
    pub async fn execute(
        &self,
        tier: &Tier,
        payload: serde_json::Value,
        max_attempts: u32,
        overall_timeout: Duration,
    ) -> ExecutionReport {
        let mut run = RequestRun::new(tier, overall_timeout);

        if max_attempts == 0 {
            return run.finish_failed(RouterError::validation("max_attempts must be at least 1"));
        }
        if let Err(e) = self.profiles.get(tier) {
            return run.finish_failed(e);
        }

        run.step(FailoverState::Selecting, None);
        loop {
            // SELECTING
            let remaining = run.remaining();
            if remaining <= MIN_ATTEMPT_BUDGET {
                return run.exhausted(ExhaustionReason::DeadlineElapsed);
            }
            let decision = match self.decide(run.request_id, tier, &run.excluded) {
                Ok(Some(decision)) => decision,
                Ok(None) if run.tried.is_empty() => {
                    return run.finish_failed(RouterError::NoCandidateAvailable {
                        tier: tier.to_string(),
                    });
                }
                Ok(None) => return run.exhausted(ExhaustionReason::CandidatesExhausted),
                Err(e) => return run.finish_failed(e),
            };
            let candidate = decision.chosen.clone();
            run.excluded.insert(candidate.clone());
            run.tried.push(candidate.clone());

            // ATTEMPTING
            let attempt = run.machine.begin_attempt();
            run.step(FailoverState::Attempting, Some(candidate.as_str()));
            let timeout = self
                .config
                .attempt_timeout()
                .min(remaining.saturating_sub(MIN_ATTEMPT_BUDGET));
            let ctx = AttemptContext {
                request_id: run.request_id,
                candidate: &candidate,
                tier,
                payload: &payload,
                attempt,
                timeout,
            };
            let started = Instant::now();
            let attempt_future = AssertUnwindSafe(self.executor.execute(ctx)).catch_unwind();
            let result = tokio::time::timeout(timeout, attempt_future).await;
            let latency = started.elapsed();

            let (error, outcome) = match result {
                Ok(Ok(Ok(completion))) => {
                    let mut outcome = Outcome::success(candidate.clone(), tier, latency)
                        .with_units(completion.units_used)
                        .with_overhead(completion.overhead);
                    outcome.quality = completion.quality;
                    self.record_quietly(&outcome);
                    run.log.push(AttemptRecord {
                        attempt,
                        candidate: candidate.clone(),
                        decision,
                        latency_ms: latency.as_millis() as u64,
                        outcome: AttemptOutcome::Succeeded,
                        circuit_opened: false,
                        backoff_ms: None,
                    });
                    return run.finish_success(candidate, completion);
                }
                Ok(Ok(Err(failure))) => (
                    RouterError::AttemptError {
                        candidate: candidate.to_string(),
                        message: failure.message.clone(),
                    },
                    AttemptOutcome::Failed {
                        message: failure.message,
                    },
                ),
                Ok(Err(panic)) => {
                    let message = format!("executor panicked: {}", panic_message(panic.as_ref()));
                    tracing::error!(
                        request_id = %run.request_id,
                        candidate = %candidate,
                        attempt,
                        "{message}"
                    );
                    (
                        RouterError::AttemptError {
                            candidate: candidate.to_string(),
                            message: message.clone(),
                        },
                        AttemptOutcome::Failed { message },
                    )
                }
                Err(_) => {
                    let timeout_ms = timeout.as_millis() as u64;
                    (
                        RouterError::AttemptTimeout {
                            candidate: candidate.to_string(),
                            timeout_ms,
                        },
                        AttemptOutcome::TimedOut { timeout_ms },
                    )
                }
            };

            tracing::debug!(
                request_id = %run.request_id,
                candidate = %candidate,
                attempt,
                error = %error,
                "Attempt failed"
            );
            let transition = self.record_quietly(&Outcome::failure(candidate.clone(), tier, latency));
            run.log.push(AttemptRecord {
                attempt,
                candidate,
                decision,
                latency_ms: latency.as_millis() as u64,
                outcome,
                circuit_opened: matches!(transition, Some(CircuitTransition::Opened { .. })),
                backoff_ms: None,
            });
            run.last_error = Some(error);

            if attempt >= max_attempts {
                return run.exhausted(ExhaustionReason::AttemptsExhausted);
            }
            let remaining = run.remaining();
            if remaining <= MIN_ATTEMPT_BUDGET {
                return run.exhausted(ExhaustionReason::DeadlineElapsed);
            }

            // RETRY
            let reason = run.last_error.as_ref().map(|e| e.to_string());
            run.step(FailoverState::Retry, reason.as_deref());
            let delay = self
                .policy
                .with_rng(|rng| self.backoff.delay(attempt - 1, rng))
                .min(remaining);
            if let Some(last) = run.log.last_mut() {
                last.backoff_ms = Some(delay.as_millis() as u64);
            }
            tokio::time::sleep(delay).await;
            run.step(FailoverState::Selecting, None);
        }
    }

    /// Record an outcome from the request path; bookkeeping errors are logged, not raised.
    fn record_quietly(&self, outcome: &Outcome) -> Option<CircuitTransition> {
        match self.record_outcome(outcome) {
            Ok(transition) => Some(transition),
            Err(e) => {
                // Candidate deregistered mid-request.
                tracing::warn!(candidate = %outcome.candidate, error = %e, "Outcome not recorded");
                None
            }
        }
    }
}
