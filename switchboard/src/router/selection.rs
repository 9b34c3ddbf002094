//! Epsilon-greedy selection
//!
//! With probability epsilon a uniformly random eligible candidate is
//! explored; otherwise the top of the tier ranking is exploited. All
//! randomness (the explore draw, tie-breaks, and backoff jitter) comes from
//! one seedable generator owned by the policy, so a fixed seed replays the
//! same decisions.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

use super::ranking::{rank, EligibleCandidate, RankedCandidate, TierWeights};
use crate::types::{CandidateId, Tier};

/// How a candidate was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Explore,
    Exploit,
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explore => write!(f, "explore"),
            Self::Exploit => write!(f, "exploit"),
        }
    }
}

/// Diagnostic record of one selection. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: Uuid,
    pub tier: Tier,
    pub chosen: CandidateId,
    pub mode: SelectionMode,
    /// Every candidate considered, best first, with scores at decision time
    pub alternatives: Vec<RankedCandidate>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// Combined score of the chosen candidate at decision time.
    pub fn chosen_score(&self) -> Option<f64> {
        self.alternatives
            .iter()
            .find(|r| r.id == self.chosen)
            .map(|r| r.combined_score)
    }
}

/// Outcome of the policy before it is wrapped into a [`RoutingDecision`].
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub chosen: CandidateId,
    pub mode: SelectionMode,
    pub ranking: Vec<RankedCandidate>,
}

/// Epsilon-greedy policy over a seeded generator.
#[derive(Debug)]
pub struct EpsilonGreedy {
    epsilon: f64,
    tie_break_jitter: f64,
    rng: Mutex<StdRng>,
}

impl EpsilonGreedy {
    /// `seed = None` seeds from OS entropy.
    pub fn new(epsilon: f64, tie_break_jitter: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            epsilon: epsilon.clamp(0.0, 1.0),
            tie_break_jitter: tie_break_jitter.max(0.0),
            rng: Mutex::new(rng),
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Run `f` with exclusive access to the generator.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Rank `eligible` under `weights` using the shared generator for tie-breaks.
    pub fn rank(&self, weights: &TierWeights, eligible: &[EligibleCandidate]) -> Vec<RankedCandidate> {
        self.with_rng(|rng| rank(weights, eligible, self.tie_break_jitter, rng))
    }

    /// Pick one candidate not in `excluded`, or `None` if none remain.
    ///
    /// `eligible` should be in a stable order (the registry returns it
    /// sorted by id) so seeded runs reproduce.
    pub fn select(
        &self,
        weights: &TierWeights,
        eligible: &[EligibleCandidate],
        excluded: &HashSet<CandidateId>,
    ) -> Option<Selection> {
        let remaining: Vec<EligibleCandidate> = eligible
            .iter()
            .filter(|c| !excluded.contains(&c.id))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return None;
        }

        self.with_rng(|rng| {
            let explore = rng.gen_bool(self.epsilon);
            let ranking = rank(weights, &remaining, self.tie_break_jitter, rng);
            let (chosen, mode) = if explore {
                let pick = remaining.choose(rng)?;
                (pick.id.clone(), SelectionMode::Explore)
            } else {
                (ranking.first()?.id.clone(), SelectionMode::Exploit)
            };
            Some(Selection {
                chosen,
                mode,
                ranking,
            })
        })
    }
}
