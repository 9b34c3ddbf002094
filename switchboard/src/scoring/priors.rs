//! Provider-class priors
//!
//! A candidate nobody has observed yet starts from the prior of its
//! provider class instead of a blank slate, so a known-fast backend is not
//! penalised on cold start.
//!
//! Reliability priors sit below the cold-window reliability observation
//! (`cold_consistency`, 0.8 by default): a backend starts unproven, and its
//! first clean success raises the score instead of dragging it down.
//!
//! ```text
//! Class      | speed | quality | token_eff | cost | memory | reliability
//! -----------|-------|---------|-----------|------|--------|------------
//! fast       | 0.99  | 0.60    | 0.90      | 0.95 | 0.50   | 0.78
//! balanced   | 0.50  | 0.95    | 0.80      | 0.85 | 0.70   | 0.74
//! premium    | 0.40  | 0.99    | 0.85      | 0.30 | 0.60   | 0.65
//! economy    | 0.80  | 0.70    | 0.92      | 0.98 | 0.65   | 0.74
//! general    | 0.55  | 0.90    | 0.75      | 0.60 | 0.70   | 0.72
//! unknown    | 0.50  | 0.50    | 0.50      | 0.50 | 0.50   | 0.70
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::vector::ScoreVector;

/// Coarse performance profile of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    /// Very low latency, modest quality
    Fast,
    /// Strong quality at moderate latency
    Balanced,
    /// Highest quality, slow and expensive
    Premium,
    /// Cheap and fairly quick
    Economy,
    /// General-purpose middle ground
    General,
    #[default]
    Unknown,
}

impl ProviderClass {
    pub const ALL: [ProviderClass; 6] = [
        Self::Fast,
        Self::Balanced,
        Self::Premium,
        Self::Economy,
        Self::General,
        Self::Unknown,
    ];

    pub fn prior(self) -> ScoreVector {
        match self {
            Self::Fast => ScoreVector::new(0.99, 0.60, 0.90, 0.95, 0.50, 0.78),
            Self::Balanced => ScoreVector::new(0.50, 0.95, 0.80, 0.85, 0.70, 0.74),
            Self::Premium => ScoreVector::new(0.40, 0.99, 0.85, 0.30, 0.60, 0.65),
            Self::Economy => ScoreVector::new(0.80, 0.70, 0.92, 0.98, 0.65, 0.74),
            Self::General => ScoreVector::new(0.55, 0.90, 0.75, 0.60, 0.70, 0.72),
            Self::Unknown => ScoreVector::default(),
        }
    }
}

impl fmt::Display for ProviderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Balanced => write!(f, "balanced"),
            Self::Premium => write!(f, "premium"),
            Self::Economy => write!(f, "economy"),
            Self::General => write!(f, "general"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Price bracket of a backend; drives the observed `cost` dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Low,
    #[default]
    Medium,
    High,
}

impl CostClass {
    /// Cost-efficiency observed for every outcome of a backend in this class.
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 0.9,
            Self::Medium => 0.7,
            Self::High => 0.3,
        }
    }
}

impl fmt::Display for CostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::learner::ReliabilityParams;

    #[test]
    fn test_priors_are_normalized() {
        for class in ProviderClass::ALL {
            assert!(class.prior().is_normalized(), "{class} prior out of range");
        }
    }

    #[test]
    fn test_priors_leave_room_for_first_success() {
        let cold = ReliabilityParams::default().cold_consistency;
        for class in ProviderClass::ALL {
            assert!(
                class.prior().reliability < cold,
                "{class} reliability prior {} would drop on a clean first success",
                class.prior().reliability
            );
        }
    }

    #[test]
    fn test_fast_beats_premium_on_speed_but_not_quality() {
        let fast = ProviderClass::Fast.prior();
        let premium = ProviderClass::Premium.prior();
        assert!(fast.speed > premium.speed);
        assert!(premium.quality > fast.quality);
    }

    #[test]
    fn test_cost_class_ordering() {
        assert!(CostClass::Low.score() > CostClass::Medium.score());
        assert!(CostClass::Medium.score() > CostClass::High.score());
    }
}
