//! Introspection snapshots for operators and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::Candidate;
use crate::router::circuit_breaker::{CircuitBreaker, CircuitPhase};
use crate::scoring::{ProviderClass, ScoreVector};
use crate::types::{CandidateId, Tier};

/// What `get_stats` reports on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "name")]
pub enum StatsScope {
    Candidate(CandidateId),
    Tier(Tier),
    Global,
}

impl fmt::Display for StatsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Candidate(id) => write!(f, "candidate:{id}"),
            Self::Tier(tier) => write!(f, "tier:{tier}"),
            Self::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStats {
    pub id: CandidateId,
    pub tiers: Vec<Tier>,
    pub class: ProviderClass,
    pub scores: ScoreVector,
    /// Weighted score under the requested tier's profile (tier scope only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_score: Option<f64>,
    pub call_count: u64,
    pub success_count: u64,
    pub success_rate: Option<f64>,
    pub mean_latency_ms: Option<f64>,
    pub available: bool,
    pub circuit: CircuitPhase,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl CandidateStats {
    pub fn from_candidate(candidate: &Candidate, breaker: &CircuitBreaker, now: DateTime<Utc>) -> Self {
        Self {
            id: candidate.id.clone(),
            tiers: candidate.tiers.iter().cloned().collect(),
            class: candidate.metadata.class,
            scores: candidate.scores(),
            tier_score: None,
            call_count: candidate.learned.call_count,
            success_count: candidate.learned.success_count,
            success_rate: candidate.learned.success_rate(),
            mean_latency_ms: candidate.learned.mean_latency_ms(),
            available: candidate.is_available(breaker, now),
            circuit: breaker.phase(&candidate.circuit, now),
            consecutive_failures: candidate.circuit.consecutive_failures,
            disabled_reason: candidate.disabled.clone(),
            last_used: candidate.learned.last_used,
        }
    }
}

/// Aggregate view over a set of candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub scope: StatsScope,
    pub generated_at: DateTime<Utc>,
    pub total_calls: u64,
    pub total_successes: u64,
    pub success_rate: Option<f64>,
    pub available_candidates: usize,
    pub candidates: Vec<CandidateStats>,
}

impl RouterStats {
    pub fn aggregate(scope: StatsScope, candidates: Vec<CandidateStats>) -> Self {
        let total_calls = candidates.iter().map(|c| c.call_count).sum::<u64>();
        let total_successes = candidates.iter().map(|c| c.success_count).sum::<u64>();
        let success_rate = (total_calls > 0).then(|| total_successes as f64 / total_calls as f64);
        Self {
            scope,
            generated_at: Utc::now(),
            total_calls,
            total_successes,
            success_rate,
            available_candidates: candidates.iter().filter(|c| c.available).count(),
            candidates,
        }
    }

    pub fn candidate(&self, id: &CandidateId) -> Option<&CandidateStats> {
        self.candidates.iter().find(|c| &c.id == id)
    }
}
