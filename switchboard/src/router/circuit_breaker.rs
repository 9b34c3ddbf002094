//! Circuit breaker for candidate failure isolation.
//!
//! The breaker tracks consecutive failures per candidate. When failures
//! reach a configurable threshold the circuit *opens* and the candidate is
//! skipped by selection. Once the cooldown expires the circuit is
//! *half-open*: the candidate is eligible again, a success closes the
//! circuit and a failure re-opens it with the next, longer cooldown from
//! the schedule (the last entry is the cap).
//!
//! The breaker itself is stateless; [`CircuitState`] lives inside each
//! candidate so it is updated under the same lock as the scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit state as seen by selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    /// Healthy, requests allowed.
    Closed,
    /// Tripped, requests blocked until cooldown expires.
    Open,
    /// Cooldown expired, requests allowed as probes.
    HalfOpen,
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-candidate breaker bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    /// Times the circuit opened since the last success
    pub trips: u32,
    pub open_until: Option<DateTime<Utc>>,
}

/// Effect of recording one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "transition")]
pub enum CircuitTransition {
    Unchanged,
    Opened { until: DateTime<Utc>, trips: u32 },
    Closed,
}

/// Consecutive-failure circuit breaker with escalating cooldowns.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Consecutive failures at which the circuit opens.
    pub failure_threshold: u32,
    cooldown_schedule: Vec<Duration>,
}

impl CircuitBreaker {
    /// Create a breaker. An empty schedule falls back to a single 60s cooldown.
    pub fn new(failure_threshold: u32, cooldown_schedule: Vec<Duration>) -> Self {
        let cooldown_schedule = if cooldown_schedule.is_empty() {
            vec![Duration::from_secs(60)]
        } else {
            cooldown_schedule
        };
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown_schedule,
        }
    }

    /// Cooldown applied on the `trip`-th consecutive opening (1-based).
    pub fn cooldown_for_trip(&self, trip: u32) -> Duration {
        let idx = (trip.max(1) as usize - 1).min(self.cooldown_schedule.len() - 1);
        self.cooldown_schedule[idx]
    }

    /// Record a success, closing the circuit.
    pub fn record_success(&self, state: &mut CircuitState) -> CircuitTransition {
        let was_tripped = state.trips > 0 || state.open_until.is_some();
        *state = CircuitState::default();
        if was_tripped {
            CircuitTransition::Closed
        } else {
            CircuitTransition::Unchanged
        }
    }

    /// Record a failure; may trip the circuit open.
    pub fn record_failure(&self, state: &mut CircuitState, now: DateTime<Utc>) -> CircuitTransition {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures < self.failure_threshold {
            return CircuitTransition::Unchanged;
        }
        // A concurrent attempt that started before the trip must not extend it.
        if self.phase(state, now) == CircuitPhase::Open {
            return CircuitTransition::Unchanged;
        }

        state.trips = state.trips.saturating_add(1);
        let cooldown = self.cooldown_for_trip(state.trips);
        let until = chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.open_until = Some(until);
        CircuitTransition::Opened {
            until,
            trips: state.trips,
        }
    }

    /// Current phase of `state` at `now`.
    pub fn phase(&self, state: &CircuitState, now: DateTime<Utc>) -> CircuitPhase {
        match state.open_until {
            None => CircuitPhase::Closed,
            Some(until) if now < until => CircuitPhase::Open,
            Some(_) => CircuitPhase::HalfOpen,
        }
    }

    /// Whether selection may use the candidate (Closed or HalfOpen).
    pub fn is_available(&self, state: &CircuitState, now: DateTime<Utc>) -> bool {
        !matches!(self.phase(state, now), CircuitPhase::Open)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, vec![Duration::from_secs(60)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, schedule_secs: &[u64]) -> CircuitBreaker {
        CircuitBreaker::new(
            threshold,
            schedule_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        )
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        let state = CircuitState::default();
        assert_eq!(cb.phase(&state, Utc::now()), CircuitPhase::Closed);
        assert!(cb.is_available(&state, Utc::now()));
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let cb = breaker(3, &[60]);
        let mut state = CircuitState::default();
        let now = Utc::now();
        assert_eq!(cb.record_failure(&mut state, now), CircuitTransition::Unchanged);
        assert_eq!(cb.record_failure(&mut state, now), CircuitTransition::Unchanged);
        assert!(cb.is_available(&state, now));
        assert!(matches!(
            cb.record_failure(&mut state, now),
            CircuitTransition::Opened { trips: 1, .. }
        ));
        assert_eq!(cb.phase(&state, now), CircuitPhase::Open);
        assert!(!cb.is_available(&state, now));
    }

    #[test]
    fn test_failure_while_open_does_not_extend() {
        let cb = breaker(1, &[60, 120]);
        let mut state = CircuitState::default();
        let now = Utc::now();
        cb.record_failure(&mut state, now);
        let until = state.open_until;
        assert_eq!(
            cb.record_failure(&mut state, now + chrono::Duration::seconds(1)),
            CircuitTransition::Unchanged
        );
        assert_eq!(state.open_until, until);
        assert_eq!(state.trips, 1);
    }

    #[test]
    fn test_success_resets_circuit() {
        let cb = breaker(2, &[60]);
        let mut state = CircuitState::default();
        let now = Utc::now();
        cb.record_failure(&mut state, now);
        cb.record_failure(&mut state, now);
        assert_eq!(cb.phase(&state, now), CircuitPhase::Open);
        assert_eq!(cb.record_success(&mut state), CircuitTransition::Closed);
        assert_eq!(cb.phase(&state, now), CircuitPhase::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let cb = breaker(1, &[30]);
        let mut state = CircuitState::default();
        let now = Utc::now();
        cb.record_failure(&mut state, now);
        let later = now + chrono::Duration::seconds(31);
        assert_eq!(cb.phase(&state, later), CircuitPhase::HalfOpen);
        assert!(cb.is_available(&state, later));
    }

    #[test]
    fn test_half_open_failure_escalates_cooldown() {
        let cb = breaker(2, &[10, 20, 40]);
        let mut state = CircuitState::default();
        let t0 = Utc::now();
        cb.record_failure(&mut state, t0);
        cb.record_failure(&mut state, t0);
        assert_eq!(state.open_until, Some(t0 + chrono::Duration::seconds(10)));

        let t1 = t0 + chrono::Duration::seconds(11);
        cb.record_failure(&mut state, t1);
        assert_eq!(state.trips, 2);
        assert_eq!(state.open_until, Some(t1 + chrono::Duration::seconds(20)));

        let t2 = t1 + chrono::Duration::seconds(21);
        cb.record_failure(&mut state, t2);
        let t3 = t2 + chrono::Duration::seconds(41);
        cb.record_failure(&mut state, t3);
        assert_eq!(state.trips, 4);
        // Capped at the last schedule entry
        assert_eq!(state.open_until, Some(t3 + chrono::Duration::seconds(40)));
    }

    #[test]
    fn test_cooldown_for_trip_is_capped() {
        let cb = breaker(1, &[1, 2, 4]);
        assert_eq!(cb.cooldown_for_trip(0), Duration::from_secs(1));
        assert_eq!(cb.cooldown_for_trip(3), Duration::from_secs(4));
        assert_eq!(cb.cooldown_for_trip(99), Duration::from_secs(4));
    }
}
