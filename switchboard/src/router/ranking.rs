//! Tier weight profiles and ranking
//!
//! A tier's profile collapses the six-dimensional score vector into one
//! ranking number:
//!
//! ```text
//! combined = sum over d of weight[d] * score[d]  +  tie_break
//! ```
//!
//! The tie-break is a small draw from the router's seeded generator so
//! near-equal candidates do not lock in permanently, while a fixed seed
//! still reproduces every ranking exactly.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RouterError, RouterResult};
use crate::scoring::{Dimension, ScoreVector};
use crate::types::{CandidateId, Tier};

/// Tolerance on the sum-to-one check.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weight of each dimension for one tier. Dimensions not listed weigh 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct TierWeights([f64; 6]);

impl TierWeights {
    pub fn from_pairs(pairs: &[(Dimension, f64)]) -> Self {
        let mut weights = [0.0; 6];
        for (dim, w) in pairs {
            weights[dim.index()] = *w;
        }
        Self(weights)
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        self.0[dim.index()]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Weights must be finite, non-negative and sum to 1.
    pub fn validate(&self, tier: &str) -> RouterResult<()> {
        for dim in Dimension::ALL {
            let w = self.get(dim);
            if !w.is_finite() || w < 0.0 {
                return Err(RouterError::validation(format!(
                    "tier '{tier}': weight for {dim} must be a non-negative number, got {w}"
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RouterError::validation(format!(
                "tier '{tier}': weights sum to {sum:.6}, expected 1"
            )));
        }
        Ok(())
    }

    /// Weighted sum of a score vector, before tie-breaking.
    pub fn combined(&self, scores: &ScoreVector) -> f64 {
        Dimension::ALL
            .iter()
            .map(|d| self.get(*d) * scores.get(*d))
            .sum()
    }
}

impl TryFrom<BTreeMap<String, f64>> for TierWeights {
    type Error = String;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        let mut weights = [0.0; 6];
        for (name, w) in map {
            let dim: Dimension = name.parse()?;
            weights[dim.index()] = w;
        }
        Ok(Self(weights))
    }
}

impl From<TierWeights> for BTreeMap<String, f64> {
    fn from(weights: TierWeights) -> Self {
        Dimension::ALL
            .iter()
            .filter(|d| weights.get(**d) != 0.0)
            .map(|d| (d.as_str().to_string(), weights.get(*d)))
            .collect()
    }
}

/// Everything the router knows about one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierProfile {
    pub weights: TierWeights,
    /// Latency at or under which the speed observation saturates at 1.0
    pub target_latency_ms: u64,
}

/// All configured tiers.
#[derive(Debug, Clone, Default)]
pub struct TierProfiles {
    profiles: BTreeMap<Tier, TierProfile>,
}

impl TierProfiles {
    pub fn new(profiles: BTreeMap<Tier, TierProfile>) -> RouterResult<Self> {
        if profiles.is_empty() {
            return Err(RouterError::validation("at least one tier must be configured"));
        }
        for (tier, profile) in &profiles {
            profile.weights.validate(tier.as_str())?;
        }
        Ok(Self { profiles })
    }

    pub fn get(&self, tier: &Tier) -> RouterResult<&TierProfile> {
        self.profiles
            .get(tier)
            .ok_or_else(|| RouterError::validation(format!("unknown tier '{tier}'")))
    }

    pub fn tiers(&self) -> impl Iterator<Item = &Tier> {
        self.profiles.keys()
    }
}

/// An eligible candidate with its scores at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleCandidate {
    pub id: CandidateId,
    pub scores: ScoreVector,
}

/// One ranking entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: CandidateId,
    /// Weighted score plus tie-break
    pub combined_score: f64,
    /// Weighted score alone
    pub base_score: f64,
}

/// Rank candidates best-first under `weights`.
///
/// One tie-break value is drawn per candidate, in input order, so the
/// caller must pass candidates in a stable order for runs to be
/// reproducible.
pub fn rank<R: Rng + ?Sized>(
    weights: &TierWeights,
    candidates: &[EligibleCandidate],
    tie_break_jitter: f64,
    rng: &mut R,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .map(|c| {
            let base_score = weights.combined(&c.scores);
            let jitter = if tie_break_jitter > 0.0 {
                rng.gen::<f64>() * tie_break_jitter
            } else {
                0.0
            };
            RankedCandidate {
                id: c.id.clone(),
                combined_score: base_score + jitter,
                base_score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fast_weights() -> TierWeights {
        TierWeights::from_pairs(&[
            (Dimension::Speed, 0.45),
            (Dimension::Reliability, 0.30),
            (Dimension::Cost, 0.15),
            (Dimension::TokenEff, 0.10),
        ])
    }

    fn candidate(id: &str, scores: ScoreVector) -> EligibleCandidate {
        EligibleCandidate {
            id: CandidateId::from(id),
            scores,
        }
    }

    #[test]
    fn test_fast_tier_scenario_ordering() {
        let base = ScoreVector::uniform(0.5);
        let a = base
            .with(Dimension::Speed, 0.9)
            .with(Dimension::Reliability, 0.9);
        let b = base
            .with(Dimension::Speed, 0.5)
            .with(Dimension::Reliability, 0.95);
        let c = base
            .with(Dimension::Quality, 0.99)
            .with(Dimension::Speed, 0.2);

        let mut rng = StdRng::seed_from_u64(7);
        let ranked = rank(
            &fast_weights(),
            &[candidate("C", c), candidate("B", b), candidate("A", a)],
            0.01,
            &mut rng,
        );
        let order: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_same_seed_same_ranking() {
        let cands: Vec<EligibleCandidate> = (0..6)
            .map(|i| candidate(&format!("c{i}"), ScoreVector::uniform(0.5)))
            .collect();
        let first = rank(&fast_weights(), &cands, 0.01, &mut StdRng::seed_from_u64(42));
        let second = rank(&fast_weights(), &cands, 0.01, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn test_tie_break_bounded_by_jitter() {
        let cands = vec![candidate("x", ScoreVector::uniform(0.5))];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let r = &rank(&fast_weights(), &cands, 0.01, &mut rng)[0];
            assert!(r.combined_score >= r.base_score);
            assert!(r.combined_score < r.base_score + 0.01);
        }
    }

    #[test]
    fn test_zero_jitter_ties_break_by_id() {
        let cands = vec![
            candidate("b", ScoreVector::uniform(0.5)),
            candidate("a", ScoreVector::uniform(0.5)),
        ];
        let ranked = rank(&fast_weights(), &cands, 0.0, &mut StdRng::seed_from_u64(0));
        assert_eq!(ranked[0].id.as_str(), "a");
    }

    #[test]
    fn test_weights_validation() {
        assert!(fast_weights().validate("fast").is_ok());

        let short = TierWeights::from_pairs(&[(Dimension::Speed, 0.5)]);
        assert!(short.validate("bad").is_err());

        let negative =
            TierWeights::from_pairs(&[(Dimension::Speed, 1.5), (Dimension::Cost, -0.5)]);
        assert!(negative.validate("neg").is_err());
    }

    #[test]
    fn test_weights_from_named_map() {
        let mut map = BTreeMap::new();
        map.insert("speed".to_string(), 0.6);
        map.insert("token_eff".to_string(), 0.4);
        let weights = TierWeights::try_from(map).unwrap();
        assert_eq!(weights.get(Dimension::TokenEff), 0.4);
        assert_eq!(weights.get(Dimension::Quality), 0.0);

        let mut bad = BTreeMap::new();
        bad.insert("vibes".to_string(), 1.0);
        assert!(TierWeights::try_from(bad).is_err());
    }

    #[test]
    fn test_unknown_tier_is_validation_error() {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            Tier::from("fast"),
            TierProfile {
                weights: fast_weights(),
                target_latency_ms: 1000,
            },
        );
        let profiles = TierProfiles::new(profiles).unwrap();
        assert!(profiles.get(&Tier::from("fast")).is_ok());
        assert!(matches!(
            profiles.get(&Tier::from("warp")),
            Err(RouterError::Validation { .. })
        ));
    }
}
