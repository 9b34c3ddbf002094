use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use switchboard::{
    AdaptiveRouter, CandidateMetadata, CapacityHints, CostClass, ProviderClass, RouterConfig,
};

/// How a simulated backend behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationProfile {
    pub mean_latency_ms: u64,
    /// Uniform spread around the mean
    pub latency_jitter_ms: u64,
    /// Probability in [0, 1] that an attempt errors
    pub failure_rate: f64,
    pub units_used: u64,
    pub quality: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            mean_latency_ms: 100,
            latency_jitter_ms: 20,
            failure_rate: 0.05,
            units_used: 800,
            quality: 0.8,
        }
    }
}

/// One backend in the fleet file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub id: String,
    pub tiers: Vec<String>,
    #[serde(default)]
    pub class: ProviderClass,
    #[serde(default)]
    pub cost_class: CostClass,
    #[serde(default)]
    pub capacity: CapacityHints,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub simulation: SimulationProfile,
}

impl CandidateSpec {
    fn new(id: &str, tiers: &[&str], class: ProviderClass, simulation: SimulationProfile) -> Self {
        Self {
            id: id.to_string(),
            tiers: tiers.iter().map(|t| t.to_string()).collect(),
            class,
            cost_class: CostClass::default(),
            capacity: CapacityHints::default(),
            description: None,
            simulation,
        }
    }

    pub fn metadata(&self) -> CandidateMetadata {
        let mut metadata = CandidateMetadata::new(self.class)
            .with_cost_class(self.cost_class)
            .with_capacity(self.capacity.clone());
        if let Some(description) = &self.description {
            metadata = metadata.with_description(description.clone());
        }
        metadata
    }
}

/// Top-level CLI configuration: router knobs plus the candidate fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub router: RouterConfig,
    pub candidates: Vec<CandidateSpec>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            candidates: default_fleet(),
        }
    }
}

/// Five simulated backends covering every class.
pub fn default_fleet() -> Vec<CandidateSpec> {
    let profile = |mean_latency_ms, failure_rate, quality| SimulationProfile {
        mean_latency_ms,
        failure_rate,
        quality,
        ..SimulationProfile::default()
    };
    vec![
        CandidateSpec::new("sprint", &["fast", "balanced"], ProviderClass::Fast, profile(40, 0.08, 0.6)),
        CandidateSpec::new("atlas", &["balanced", "deep"], ProviderClass::Balanced, profile(150, 0.04, 0.85)),
        CandidateSpec::new("sage", &["deep", "creative"], ProviderClass::Premium, profile(400, 0.03, 0.95)),
        CandidateSpec::new("thrift", &["fast", "balanced"], ProviderClass::Economy, profile(70, 0.15, 0.7)),
        CandidateSpec::new(
            "generalist",
            &["fast", "balanced", "deep", "creative"],
            ProviderClass::General,
            profile(200, 0.05, 0.8),
        ),
    ]
}

impl SwitchboardConfig {
    /// Load a fleet file, or the built-in fleet when `path` is `None`.
    /// `SWITCHBOARD_*` environment overrides apply either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config
            .router
            .apply_env()
            .context("Invalid SWITCHBOARD_* environment override")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.router.validate()?;
        if self.candidates.is_empty() {
            bail!("config declares no candidates");
        }
        let mut seen = HashSet::new();
        for spec in &self.candidates {
            if !seen.insert(spec.id.as_str()) {
                bail!("duplicate candidate id '{}'", spec.id);
            }
            let rate = spec.simulation.failure_rate;
            if !(0.0..=1.0).contains(&rate) {
                bail!("candidate '{}': failure_rate {rate} outside [0, 1]", spec.id);
            }
            for tier in &spec.tiers {
                if !self.router.tier_weights.contains_key(tier) {
                    bail!("candidate '{}': unknown tier '{tier}'", spec.id);
                }
            }
        }
        Ok(())
    }

    /// Register the whole fleet with `router`.
    pub fn register_fleet(&self, router: &AdaptiveRouter) -> Result<()> {
        for spec in &self.candidates {
            router
                .register_candidate(spec.id.as_str(), spec.tiers.iter().map(String::as_str), spec.metadata())
                .with_context(|| format!("Failed to register '{}'", spec.id))?;
        }
        Ok(())
    }
}
