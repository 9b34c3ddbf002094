//! Router configuration.
//!
//! Every knob is externally settable: load a TOML file with
//! [`RouterConfig::from_file`], then let `SWITCHBOARD_*` environment
//! variables override the handful of values operators change most often.
//!
//! ```toml
//! epsilon = 0.1
//! seed = 42
//! max_attempts = 3
//! cooldown_schedule_ms = [30000, 60000, 120000]
//!
//! [tier_weights.fast]
//! speed = 0.45
//! reliability = 0.30
//! cost = 0.15
//! token_eff = 0.10
//!
//! [tier_target_latency_ms]
//! fast = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RouterError, RouterResult};
use crate::failover::BackoffPolicy;
use crate::router::circuit_breaker::CircuitBreaker;
use crate::router::ranking::{TierProfile, TierProfiles, TierWeights};
use crate::scoring::{Dimension, Learner, LearningRates, ReliabilityParams};
use crate::types::Tier;

/// Latency target for a tier with no explicit entry.
pub const DEFAULT_TARGET_LATENCY_MS: u64 = 10_000;

/// Snapshot cadence of the background writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Snapshot file; `None` keeps learned state in memory only
    pub path: Option<PathBuf>,
    /// Flush once this many outcomes are pending
    pub flush_every_updates: u64,
    /// Flush pending outcomes at least this often
    pub flush_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_every_updates: 25,
            flush_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub tier_weights: BTreeMap<String, TierWeights>,
    pub tier_target_latency_ms: BTreeMap<String, u64>,

    /// Default EMA learning rate
    pub alpha: f64,
    /// Per-dimension learning rates keyed by dimension name
    pub alpha_overrides: BTreeMap<String, f64>,
    pub units_normalization: f64,
    pub latency_window: usize,
    pub reliability: ReliabilityParams,

    pub epsilon: f64,
    pub tie_break_jitter: f64,
    /// Seeds exploration, tie-breaks and jitter; `None` uses OS entropy
    pub seed: Option<u64>,

    pub max_attempts: u32,
    pub overall_timeout_ms: u64,
    pub attempt_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter_ms: u64,

    pub failure_threshold: u32,
    pub cooldown_schedule_ms: Vec<u64>,

    pub persistence: PersistenceConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tier_weights: default_tier_weights(),
            tier_target_latency_ms: [
                ("fast", 1_000),
                ("balanced", 3_000),
                ("deep", 10_000),
                ("creative", 5_000),
            ]
            .into_iter()
            .map(|(t, ms)| (t.to_string(), ms))
            .collect(),
            alpha: 0.05,
            alpha_overrides: BTreeMap::new(),
            units_normalization: 2_000.0,
            latency_window: 20,
            reliability: ReliabilityParams::default(),
            epsilon: 0.1,
            tie_break_jitter: 0.01,
            seed: None,
            max_attempts: 3,
            overall_timeout_ms: 30_000,
            attempt_timeout_ms: 10_000,
            backoff_base_ms: 100,
            backoff_cap_ms: 2_000,
            jitter_ms: 50,
            failure_threshold: 3,
            cooldown_schedule_ms: vec![30_000, 60_000, 120_000, 300_000],
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Built-in tiers: fast, balanced, deep, creative.
pub fn default_tier_weights() -> BTreeMap<String, TierWeights> {
    use Dimension::*;
    let mut tiers = BTreeMap::new();
    tiers.insert(
        "fast".to_string(),
        TierWeights::from_pairs(&[(Speed, 0.45), (Reliability, 0.30), (Cost, 0.15), (TokenEff, 0.10)]),
    );
    tiers.insert(
        "balanced".to_string(),
        TierWeights::from_pairs(&[(Speed, 0.25), (Quality, 0.40), (Reliability, 0.20), (Memory, 0.15)]),
    );
    tiers.insert(
        "deep".to_string(),
        TierWeights::from_pairs(&[(Quality, 0.40), (TokenEff, 0.25), (Memory, 0.20), (Speed, 0.15)]),
    );
    tiers.insert(
        "creative".to_string(),
        TierWeights::from_pairs(&[
            (Quality, 0.35),
            (TokenEff, 0.25),
            (Reliability, 0.20),
            (Cost, 0.10),
            (Speed, 0.10),
        ]),
    );
    tiers
}

impl RouterConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> RouterResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::validation(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> RouterResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SWITCHBOARD_EPSILON`, `SWITCHBOARD_SEED`,
    /// `SWITCHBOARD_MAX_ATTEMPTS` and `SWITCHBOARD_SNAPSHOT_PATH`.
    pub fn apply_env(&mut self) -> RouterResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an explicit lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> RouterResult<()> {
        if let Some(v) = lookup("SWITCHBOARD_EPSILON") {
            self.epsilon = parse_env("SWITCHBOARD_EPSILON", &v)?;
        }
        if let Some(v) = lookup("SWITCHBOARD_SEED") {
            self.seed = Some(parse_env("SWITCHBOARD_SEED", &v)?);
        }
        if let Some(v) = lookup("SWITCHBOARD_MAX_ATTEMPTS") {
            self.max_attempts = parse_env("SWITCHBOARD_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("SWITCHBOARD_SNAPSHOT_PATH") {
            self.persistence.path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> RouterResult<()> {
        if self.tier_weights.is_empty() {
            return Err(RouterError::validation("at least one tier must be configured"));
        }
        for (tier, weights) in &self.tier_weights {
            weights.validate(tier)?;
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(RouterError::validation(format!(
                "epsilon must be in [0, 1], got {}",
                self.epsilon
            )));
        }
        check_alpha("alpha", self.alpha)?;
        for (dim, alpha) in &self.alpha_overrides {
            dim.parse::<Dimension>().map_err(RouterError::validation)?;
            check_alpha(&format!("alpha_overrides.{dim}"), *alpha)?;
        }
        if !self.tie_break_jitter.is_finite() || self.tie_break_jitter < 0.0 {
            return Err(RouterError::validation("tie_break_jitter must be non-negative"));
        }
        if self.units_normalization.is_nan() || self.units_normalization <= 0.0 {
            return Err(RouterError::validation("units_normalization must be positive"));
        }
        if self.latency_window == 0 {
            return Err(RouterError::validation("latency_window must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(RouterError::validation("max_attempts must be at least 1"));
        }
        if self.attempt_timeout_ms == 0 || self.attempt_timeout_ms >= self.overall_timeout_ms {
            return Err(RouterError::validation(format!(
                "attempt_timeout_ms ({}) must be positive and below overall_timeout_ms ({})",
                self.attempt_timeout_ms, self.overall_timeout_ms
            )));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(RouterError::validation(format!(
                "backoff_base_ms ({}) exceeds backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        if self.failure_threshold == 0 {
            return Err(RouterError::validation("failure_threshold must be at least 1"));
        }
        if self.cooldown_schedule_ms.is_empty() {
            return Err(RouterError::validation("cooldown_schedule_ms must not be empty"));
        }
        if self.cooldown_schedule_ms.windows(2).any(|w| w[1] < w[0]) {
            return Err(RouterError::validation(
                "cooldown_schedule_ms must be non-decreasing",
            ));
        }
        if self.persistence.flush_every_updates == 0 || self.persistence.flush_interval_ms == 0 {
            return Err(RouterError::validation(
                "persistence flush cadence must be positive",
            ));
        }
        Ok(())
    }

    pub fn target_latency_ms(&self, tier: &str) -> u64 {
        self.tier_target_latency_ms
            .get(tier)
            .copied()
            .unwrap_or(DEFAULT_TARGET_LATENCY_MS)
    }

    pub fn learning_rates(&self) -> LearningRates {
        self.alpha_overrides
            .iter()
            .filter_map(|(dim, alpha)| dim.parse::<Dimension>().ok().map(|d| (d, *alpha)))
            .fold(LearningRates::uniform(self.alpha), |rates, (d, a)| {
                rates.with_override(d, a)
            })
    }

    pub fn learner(&self) -> Learner {
        Learner::new(
            self.learning_rates(),
            self.units_normalization,
            self.latency_window,
            self.reliability,
        )
    }

    pub fn profiles(&self) -> RouterResult<TierProfiles> {
        let profiles = self
            .tier_weights
            .iter()
            .map(|(tier, weights)| {
                (
                    Tier::from(tier.as_str()),
                    TierProfile {
                        weights: *weights,
                        target_latency_ms: self.target_latency_ms(tier),
                    },
                )
            })
            .collect();
        TierProfiles::new(profiles)
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.failure_threshold,
            self.cooldown_schedule_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_ms, self.backoff_cap_ms, self.jitter_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

fn check_alpha(name: &str, alpha: f64) -> RouterResult<()> {
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(())
    } else {
        Err(RouterError::validation(format!(
            "{name} must be in (0, 1], got {alpha}"
        )))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> RouterResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RouterError::validation(format!("{key}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RouterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tier_weights.len(), 4);
        assert_eq!(config.target_latency_ms("fast"), 1_000);
        assert_eq!(config.target_latency_ms("unlisted"), DEFAULT_TARGET_LATENCY_MS);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RouterConfig::from_toml_str(
            r#"
epsilon = 0.25
seed = 7
cooldown_schedule_ms = [1000, 2000]

[tier_weights.cheap]
cost = 0.7
reliability = 0.3

[persistence]
path = "/tmp/switchboard.json"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.epsilon, 0.25);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.tier_weights.len(), 1);
        assert_eq!(config.tier_weights["cheap"].get(Dimension::Cost), 0.7);
        assert_eq!(config.persistence.flush_every_updates, 25);
    }

    #[test]
    fn test_unknown_dimension_in_toml_rejected() {
        let err = RouterConfig::from_toml_str("[tier_weights.x]\nmystery = 1.0\n").unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = RouterConfig::from_toml_str("[tier_weights.x]\nspeed = 0.5\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_range_checks() {
        let cases: Vec<Box<dyn Fn(&mut RouterConfig)>> = vec![
            Box::new(|c| c.epsilon = 1.5),
            Box::new(|c| c.alpha = 0.0),
            Box::new(|c| c.max_attempts = 0),
            Box::new(|c| c.attempt_timeout_ms = c.overall_timeout_ms),
            Box::new(|c| c.backoff_base_ms = c.backoff_cap_ms + 1),
            Box::new(|c| c.cooldown_schedule_ms = vec![]),
            Box::new(|c| c.cooldown_schedule_ms = vec![500, 100]),
            Box::new(|c| {
                c.alpha_overrides.insert("speed".into(), 2.0);
            }),
            Box::new(|c| {
                c.alpha_overrides.insert("warmth".into(), 0.1);
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = RouterConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {i} should fail validation");
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RouterConfig::default();
        let env = |key: &str| match key {
            "SWITCHBOARD_EPSILON" => Some("0.0".to_string()),
            "SWITCHBOARD_SEED" => Some("123".to_string()),
            "SWITCHBOARD_SNAPSHOT_PATH" => Some("/var/lib/switchboard/state.json".to_string()),
            _ => None,
        };
        config.apply_overrides(env).unwrap();
        assert_eq!(config.epsilon, 0.0);
        assert_eq!(config.seed, Some(123));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(
            config.persistence.path.as_deref(),
            Some(Path::new("/var/lib/switchboard/state.json"))
        );

        let bad = |key: &str| (key == "SWITCHBOARD_MAX_ATTEMPTS").then(|| "many".to_string());
        assert!(config.apply_overrides(bad).is_err());
    }

    #[test]
    fn test_learning_rate_overrides() {
        let mut config = RouterConfig::default();
        config.alpha_overrides.insert("reliability".into(), 0.2);
        let rates = config.learning_rates();
        assert_eq!(rates.get(Dimension::Reliability), 0.2);
        assert_eq!(rates.get(Dimension::Speed), 0.05);
    }

    #[test]
    fn test_profiles_carry_targets() {
        let profiles = RouterConfig::default().profiles().unwrap();
        let deep = profiles.get(&Tier::from("deep")).unwrap();
        assert_eq!(deep.target_latency_ms, 10_000);
    }
}
