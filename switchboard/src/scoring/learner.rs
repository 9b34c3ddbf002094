//! Online learning of score vectors from execution outcomes.
//!
//! Each outcome is turned into a partial observation (one value per
//! dimension it says something about) and blended into the candidate's
//! vector with an exponential moving average:
//!
//! ```text
//! speed       = clamp(target_latency(tier) / max(latency, 1), 0.1, 1.0)
//! token_eff   = clamp(1 - units_used / normalization, 0.1, 1.0)
//! memory      = 1 - overhead / (overhead + latency)      (1.0 if both are 0)
//! cost        = cost-class score of the candidate
//! quality     = reported quality, or the default for a bare success
//! reliability = success_rate x consistency(last N latencies)
//! ```
//!
//! Failed attempts only move `reliability`: a timeout says nothing about
//! how fast or how frugal a backend is when it works.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::priors::CostClass;
use super::vector::{unit, Dimension, ScoreVector};
use crate::types::{CandidateId, Tier};

/// Quality observed for a success whose executor did not grade its output.
pub const DEFAULT_SUCCESS_QUALITY: f64 = 0.8;

/// Immutable record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub candidate: CandidateId,
    pub tier: Tier,
    pub latency: Duration,
    pub units_used: u64,
    /// Time spent outside the backend call proper (context retrieval, post-processing)
    pub overhead: Duration,
    /// Quality in `[0, 1]` if the executor graded the result
    pub quality: Option<f64>,
    pub success: bool,
    pub at: DateTime<Utc>,
}

impl Outcome {
    pub fn success(candidate: impl Into<CandidateId>, tier: impl Into<Tier>, latency: Duration) -> Self {
        Self {
            candidate: candidate.into(),
            tier: tier.into(),
            latency,
            units_used: 0,
            overhead: Duration::ZERO,
            quality: None,
            success: true,
            at: Utc::now(),
        }
    }

    pub fn failure(candidate: impl Into<CandidateId>, tier: impl Into<Tier>, latency: Duration) -> Self {
        Self {
            success: false,
            ..Self::success(candidate, tier, latency)
        }
    }

    pub fn with_units(mut self, units: u64) -> Self {
        self.units_used = units;
        self
    }

    pub fn with_overhead(mut self, overhead: Duration) -> Self {
        self.overhead = overhead;
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Per-dimension observation; `None` leaves that dimension untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedScores([Option<f64>; 6]);

impl ObservedScores {
    pub fn get(&self, dim: Dimension) -> Option<f64> {
        self.0[dim.index()]
    }

    pub fn set(&mut self, dim: Dimension, value: f64) {
        self.0[dim.index()] = Some(unit(value));
    }

    pub fn with(mut self, dim: Dimension, value: f64) -> Self {
        self.set(dim, value);
        self
    }

    pub fn observed(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        Dimension::ALL
            .iter()
            .filter_map(move |d| self.get(*d).map(|v| (*d, v)))
    }
}

/// Learning rate per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningRates([f64; 6]);

impl LearningRates {
    pub fn uniform(alpha: f64) -> Self {
        Self([alpha; 6])
    }

    pub fn with_override(mut self, dim: Dimension, alpha: f64) -> Self {
        self.0[dim.index()] = alpha;
        self
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        self.0[dim.index()]
    }
}

impl Default for LearningRates {
    fn default() -> Self {
        Self::uniform(0.05)
    }
}

/// Tunable blend of success rate and latency consistency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityParams {
    /// 1.0 = success_rate x consistency; 0.0 = success rate alone
    pub consistency_weight: f64,
    /// Lower bound on consistency for very erratic latencies
    pub consistency_floor: f64,
    /// Consistency assumed while the window holds fewer than `min_samples`
    pub cold_consistency: f64,
    pub min_samples: usize,
}

impl Default for ReliabilityParams {
    fn default() -> Self {
        Self {
            consistency_weight: 1.0,
            consistency_floor: 0.1,
            cold_consistency: 0.8,
            min_samples: 3,
        }
    }
}

/// Exponential moving average step, kept inside `[0, 1]`.
pub fn ema(old: f64, observed: f64, alpha: f64) -> f64 {
    unit(old + alpha * (observed - old))
}

/// Blend a partial observation into a score vector.
pub fn update(old: &ScoreVector, observed: &ObservedScores, rates: &LearningRates) -> ScoreVector {
    let mut next = *old;
    for (dim, value) in observed.observed() {
        next.set(dim, ema(old.get(dim), value, rates.get(dim)));
    }
    next
}

pub fn speed_score(target_latency_ms: f64, latency_ms: f64) -> f64 {
    (target_latency_ms / latency_ms.max(1.0)).clamp(0.1, 1.0)
}

pub fn token_efficiency(units_used: u64, normalization: f64) -> f64 {
    if normalization <= 0.0 {
        return 1.0;
    }
    (1.0 - units_used as f64 / normalization).clamp(0.1, 1.0)
}

pub fn memory_overhead_score(overhead_ms: f64, latency_ms: f64) -> f64 {
    let total = overhead_ms + latency_ms;
    if total <= 0.0 {
        1.0
    } else {
        unit(1.0 - overhead_ms / total)
    }
}

/// `1 - min(cv, 1)` over the latency window, using the sample standard deviation.
pub fn consistency(latencies: &VecDeque<f64>, params: &ReliabilityParams) -> f64 {
    let n = latencies.len();
    if n < params.min_samples.max(2) {
        return unit(params.cold_consistency);
    }
    let mean = latencies.iter().sum::<f64>() / n as f64;
    let variance = latencies.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let cv = variance.sqrt() / mean.max(1.0);
    unit((1.0 - cv.min(1.0)).max(params.consistency_floor))
}

pub fn reliability(success_rate: f64, consistency: f64, params: &ReliabilityParams) -> f64 {
    let w = unit(params.consistency_weight);
    unit(success_rate * (1.0 - w + w * consistency))
}

/// Mutable learned state of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedState {
    pub scores: ScoreVector,
    pub call_count: u64,
    pub success_count: u64,
    /// Most recent successful latencies in milliseconds, oldest first
    pub latency_history: VecDeque<f64>,
    pub last_used: Option<DateTime<Utc>>,
}

impl LearnedState {
    /// Fresh state seeded from a prior.
    pub fn seeded(prior: ScoreVector) -> Self {
        Self {
            scores: prior.clamped(),
            call_count: 0,
            success_count: 0,
            latency_history: VecDeque::new(),
            last_used: None,
        }
    }

    /// Whether no outcome has ever been recorded.
    pub fn is_unseen(&self) -> bool {
        self.call_count == 0
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.call_count == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.call_count as f64)
        }
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.latency_history.is_empty() {
            None
        } else {
            Some(self.latency_history.iter().sum::<f64>() / self.latency_history.len() as f64)
        }
    }
}

/// Turns outcomes into score updates.
#[derive(Debug, Clone)]
pub struct Learner {
    rates: LearningRates,
    units_normalization: f64,
    window: usize,
    reliability: ReliabilityParams,
}

impl Learner {
    pub fn new(
        rates: LearningRates,
        units_normalization: f64,
        window: usize,
        reliability: ReliabilityParams,
    ) -> Self {
        Self {
            rates,
            units_normalization,
            window: window.max(1),
            reliability,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Observation implied by `outcome` given the already-updated counters
    /// and latency window in `state`.
    pub fn observe(
        &self,
        state: &LearnedState,
        outcome: &Outcome,
        target_latency_ms: u64,
        cost_class: CostClass,
    ) -> ObservedScores {
        let success_rate = state.success_rate().unwrap_or(1.0);
        let consistency = consistency(&state.latency_history, &self.reliability);
        let mut observed = ObservedScores::default().with(
            Dimension::Reliability,
            reliability(success_rate, consistency, &self.reliability),
        );

        if outcome.success {
            let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
            let overhead_ms = outcome.overhead.as_secs_f64() * 1000.0;
            observed.set(
                Dimension::Speed,
                speed_score(target_latency_ms as f64, latency_ms),
            );
            observed.set(
                Dimension::TokenEff,
                token_efficiency(outcome.units_used, self.units_normalization),
            );
            observed.set(
                Dimension::Memory,
                memory_overhead_score(overhead_ms, latency_ms),
            );
            observed.set(Dimension::Cost, cost_class.score());
            observed.set(
                Dimension::Quality,
                outcome.quality.unwrap_or(DEFAULT_SUCCESS_QUALITY),
            );
        }

        observed
    }

    /// Apply one outcome: counters, latency window, last-used, then the EMA step.
    ///
    /// Callers must hold the candidate's lock so updates stay serialized.
    pub fn apply(
        &self,
        state: &mut LearnedState,
        outcome: &Outcome,
        target_latency_ms: u64,
        cost_class: CostClass,
    ) -> ObservedScores {
        state.call_count += 1;
        if outcome.success {
            state.success_count += 1;
            state
                .latency_history
                .push_back(outcome.latency.as_secs_f64() * 1000.0);
            while state.latency_history.len() > self.window {
                state.latency_history.pop_front();
            }
        }
        state.last_used = Some(outcome.at);

        let observed = self.observe(state, outcome, target_latency_ms, cost_class);
        state.scores = update(&state.scores, &observed, &self.rates);
        observed
    }
}

impl Default for Learner {
    fn default() -> Self {
        Self::new(
            LearningRates::default(),
            2000.0,
            20,
            ReliabilityParams::default(),
        )
    }
}
