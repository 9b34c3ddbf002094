//! Simulated backends.
//!
//! Each candidate answers after a latency drawn around its configured mean
//! and fails with its configured probability. Draws come from one seeded
//! RNG, so a fixed seed replays the same fleet behavior for a sequential
//! run.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use switchboard::{
    AttemptContext, BackendFailure, CandidateId, Completion, Executable, ExecutionReport,
};

use crate::config::{CandidateSpec, SimulationProfile};

pub struct SimulatedBackend {
    profiles: HashMap<CandidateId, SimulationProfile>,
    rng: Mutex<StdRng>,
}

impl SimulatedBackend {
    pub fn new(specs: &[CandidateSpec], seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            profiles: specs
                .iter()
                .map(|s| (CandidateId::from(s.id.as_str()), s.simulation.clone()))
                .collect(),
            rng: Mutex::new(rng),
        }
    }

    /// Latency and pass/fail for one attempt.
    fn draw(&self, profile: &SimulationProfile) -> (Duration, bool) {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let spread = profile.latency_jitter_ms.min(profile.mean_latency_ms);
        let latency_ms = if spread == 0 {
            profile.mean_latency_ms
        } else {
            rng.gen_range(profile.mean_latency_ms - spread..=profile.mean_latency_ms + spread)
        };
        let failed = rng.gen_bool(profile.failure_rate.clamp(0.0, 1.0));
        (Duration::from_millis(latency_ms), failed)
    }
}

#[async_trait]
impl Executable for SimulatedBackend {
    async fn execute(&self, ctx: AttemptContext<'_>) -> Result<Completion, BackendFailure> {
        let Some(profile) = self.profiles.get(ctx.candidate) else {
            return Err(BackendFailure::new(format!(
                "no simulation profile for '{}'",
                ctx.candidate
            )));
        };
        let (latency, failed) = self.draw(profile);
        tokio::time::sleep(latency).await;

        if failed {
            return Err(BackendFailure::new(format!(
                "simulated failure after {}ms",
                latency.as_millis()
            )));
        }
        Ok(Completion::new(json!({
            "candidate": ctx.candidate.as_str(),
            "tier": ctx.tier.as_str(),
            "attempt": ctx.attempt,
            "echo": ctx.payload,
        }))
        .with_units(profile.units_used)
        .with_quality(profile.quality))
    }
}

/// Aggregate of a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_attempts: u64,
    pub retried_requests: u64,
    pub served_by: BTreeMap<String, u64>,
    /// Terminal error codes of failed requests
    pub failures: BTreeMap<String, u64>,
}

impl SimulationSummary {
    pub fn observe(&mut self, report: &ExecutionReport) {
        self.requests += 1;
        self.total_attempts += u64::from(report.attempts);
        if report.attempts > 1 {
            self.retried_requests += 1;
        }
        if let Some(candidate) = &report.candidate_used {
            self.succeeded += 1;
            *self.served_by.entry(candidate.to_string()).or_default() += 1;
        } else {
            self.failed += 1;
            let code = report.error.as_ref().map_or("UNKNOWN", |e| e.code());
            *self.failures.entry(code.to_string()).or_default() += 1;
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.succeeded as f64 / self.requests as f64)
    }
}
