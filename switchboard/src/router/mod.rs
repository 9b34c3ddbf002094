//! Adaptive Router
//!
//! [`AdaptiveRouter`] is the single owner of all routing state: the
//! candidate registry, the tier profiles, the learner and the selection
//! policy. Everything else talks to it through its methods.
//!
//! # Request flow
//!
//! ```text
//! execute(tier, payload)
//!   └─ select ── list_eligible(tier) ── rank(tier weights) ── epsilon-greedy
//!        └─ Executable::execute(candidate)
//!             └─ record_outcome ── learner EMA + circuit breaker
//!                  └─ pending update counter ── background snapshot writer
//! ```
//!
//! The retry loop itself lives in [`crate::failover`].

pub mod circuit_breaker;
pub mod ranking;
pub mod selection;

pub use circuit_breaker::{CircuitBreaker, CircuitPhase, CircuitState, CircuitTransition};
pub use ranking::{EligibleCandidate, RankedCandidate, TierProfile, TierProfiles, TierWeights};
pub use selection::{EpsilonGreedy, RoutingDecision, Selection, SelectionMode};

use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::error::RouterResult;
use crate::executor::Executable;
use crate::failover::BackoffPolicy;
use crate::persistence::{Snapshot, SnapshotStore};
use crate::registry::{CandidateMetadata, CandidateRegistry, HydrationSummary, RegistrationOutcome};
use crate::scoring::{Learner, Outcome, ScoreVector};
use crate::stats::{CandidateStats, RouterStats, StatsScope};
use crate::types::{CandidateId, Tier};

/// Thread-safe shared router handle.
pub type SharedRouter = Arc<AdaptiveRouter>;

/// Learns backend quality online and routes each request to the best one.
pub struct AdaptiveRouter {
    pub(crate) config: RouterConfig,
    pub(crate) registry: CandidateRegistry,
    pub(crate) profiles: TierProfiles,
    pub(crate) learner: Learner,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) policy: EpsilonGreedy,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) executor: Arc<dyn Executable>,
    /// State changes not yet written to a snapshot
    dirty: AtomicU64,
    update_signal: Notify,
}

impl std::fmt::Debug for AdaptiveRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRouter")
            .field("candidates", &self.registry.len())
            .field("tiers", &self.profiles.tiers().collect::<Vec<_>>())
            .field("epsilon", &self.policy.epsilon())
            .field("pending_updates", &self.pending_updates())
            .finish()
    }
}

impl AdaptiveRouter {
    /// Build a router from a validated configuration.
    pub fn new(config: RouterConfig, executor: Arc<dyn Executable>) -> RouterResult<Self> {
        config.validate()?;
        Ok(Self {
            registry: CandidateRegistry::new(),
            profiles: config.profiles()?,
            learner: config.learner(),
            breaker: config.circuit_breaker(),
            policy: EpsilonGreedy::new(config.epsilon, config.tie_break_jitter, config.seed),
            backoff: config.backoff(),
            executor,
            dirty: AtomicU64::new(0),
            update_signal: Notify::new(),
            config,
        })
    }

    pub fn shared(self) -> SharedRouter {
        Arc::new(self)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &CandidateRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn profiles(&self) -> &TierProfiles {
        &self.profiles
    }

    /// Register a candidate for one or more configured tiers.
    pub fn register_candidate<I, T>(
        &self,
        id: impl Into<CandidateId>,
        tiers: I,
        metadata: CandidateMetadata,
    ) -> RouterResult<RegistrationOutcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<Tier>,
    {
        let tiers: BTreeSet<Tier> = tiers.into_iter().map(Into::into).collect();
        for tier in &tiers {
            self.profiles.get(tier)?;
        }
        let outcome = self
            .registry
            .register(id.into(), tiers, metadata, self.learner.window())?;
        if outcome == RegistrationOutcome::Created {
            self.mark_dirty();
        }
        Ok(outcome)
    }

    pub fn deregister_candidate(&self, id: &CandidateId) -> RouterResult<()> {
        self.registry.deregister(id)?;
        self.mark_dirty();
        Ok(())
    }

    pub fn mark_unavailable(&self, id: &CandidateId, reason: impl Into<String>) -> RouterResult<()> {
        self.registry.mark_unavailable(id, reason)?;
        self.mark_dirty();
        Ok(())
    }

    pub fn mark_available(&self, id: &CandidateId) -> RouterResult<()> {
        self.registry.mark_available(id)?;
        self.mark_dirty();
        Ok(())
    }

    /// Available candidates of a configured tier, sorted by id.
    pub fn list_eligible(&self, tier: &Tier) -> RouterResult<Vec<EligibleCandidate>> {
        self.profiles.get(tier)?;
        Ok(self.registry.list_eligible(tier, &self.breaker, Utc::now()))
    }

    /// Current score vector; the prior for a candidate never observed.
    pub fn score(&self, id: &CandidateId) -> RouterResult<ScoreVector> {
        self.registry.with_candidate(id, |c| c.scores())
    }

    /// Eligible candidates of `tier`, best first.
    pub fn rank(&self, tier: &Tier) -> RouterResult<Vec<RankedCandidate>> {
        let profile = self.profiles.get(tier)?;
        let eligible = self.registry.list_eligible(tier, &self.breaker, Utc::now());
        Ok(self.policy.rank(&profile.weights, &eligible))
    }

    /// Pick a candidate for `tier` outside `excluded`. `Ok(None)` when none remain.
    pub fn select(
        &self,
        tier: &Tier,
        excluded: &HashSet<CandidateId>,
    ) -> RouterResult<Option<RoutingDecision>> {
        self.decide(Uuid::new_v4(), tier, excluded)
    }

    pub(crate) fn decide(
        &self,
        request_id: Uuid,
        tier: &Tier,
        excluded: &HashSet<CandidateId>,
    ) -> RouterResult<Option<RoutingDecision>> {
        let profile = self.profiles.get(tier)?;
        let now = Utc::now();
        let eligible = self.registry.list_eligible(tier, &self.breaker, now);
        let Some(selection) = self.policy.select(&profile.weights, &eligible, excluded) else {
            return Ok(None);
        };

        let decision = RoutingDecision {
            request_id,
            tier: tier.clone(),
            chosen: selection.chosen,
            mode: selection.mode,
            alternatives: selection.ranking,
            decided_at: now,
        };
        tracing::debug!(
            request_id = %request_id,
            tier = %tier,
            candidate = %decision.chosen,
            mode = %decision.mode,
            score = decision.chosen_score().unwrap_or_default(),
            "Routing decision"
        );
        Ok(Some(decision))
    }

    /// Learn from one outcome and update the candidate's circuit.
    ///
    /// The score update and circuit bookkeeping happen under the
    /// candidate's lock, so concurrent outcomes for the same candidate are
    /// applied one after another.
    pub fn record_outcome(&self, outcome: &Outcome) -> RouterResult<CircuitTransition> {
        let target_latency_ms = self.profiles.get(&outcome.tier)?.target_latency_ms;
        let transition = self.registry.with_candidate(&outcome.candidate, |c| {
            self.learner
                .apply(&mut c.learned, outcome, target_latency_ms, c.metadata.cost_class);
            if outcome.success {
                self.breaker.record_success(&mut c.circuit)
            } else {
                self.breaker.record_failure(&mut c.circuit, outcome.at)
            }
        })?;

        match transition {
            CircuitTransition::Opened { until, trips } => tracing::warn!(
                candidate = %outcome.candidate,
                tier = %outcome.tier,
                trips,
                until = %until,
                "Circuit opened"
            ),
            CircuitTransition::Closed => tracing::info!(
                candidate = %outcome.candidate,
                "Circuit closed"
            ),
            CircuitTransition::Unchanged => {}
        }

        self.mark_dirty();
        Ok(transition)
    }

    /// Capture every candidate's persisted state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.registry.records(&self.breaker, Utc::now()))
    }

    /// Hydrate from a snapshot; may run before or after registration.
    pub fn load(&self, snapshot: Snapshot) -> RouterResult<HydrationSummary> {
        snapshot.check_version()?;
        let summary = self
            .registry
            .hydrate(snapshot.candidates, self.learner.window());
        tracing::info!(
            applied = summary.applied,
            deferred = summary.deferred,
            saved_at = %snapshot.saved_at,
            "Loaded snapshot"
        );
        Ok(summary)
    }

    /// Load from a store; `Ok(None)` if the store is empty.
    pub fn load_from(&self, store: &dyn SnapshotStore) -> RouterResult<Option<HydrationSummary>> {
        match store.load()? {
            Some(snapshot) => self.load(snapshot).map(Some),
            None => {
                tracing::info!(store = %store.describe(), "No snapshot found, starting from priors");
                Ok(None)
            }
        }
    }

    /// Score vectors, success rates and availability for a candidate, a tier, or everything.
    pub fn get_stats(&self, scope: &StatsScope) -> RouterResult<RouterStats> {
        let now = Utc::now();
        let stats_of = |c: &crate::registry::Candidate| CandidateStats::from_candidate(c, &self.breaker, now);

        let candidates = match scope {
            StatsScope::Candidate(id) => {
                vec![self.registry.with_candidate(id, |c| stats_of(&*c))?]
            }
            StatsScope::Tier(tier) => {
                let weights = self.profiles.get(tier)?.weights;
                self.registry
                    .candidates()
                    .iter()
                    .filter(|c| c.serves(tier))
                    .map(|c| CandidateStats {
                        tier_score: Some(weights.combined(&c.scores())),
                        ..stats_of(c)
                    })
                    .collect()
            }
            StatsScope::Global => self.registry.candidates().iter().map(stats_of).collect(),
        };
        Ok(RouterStats::aggregate(scope.clone(), candidates))
    }

    /// State changes since the last acknowledged flush.
    pub fn pending_updates(&self) -> u64 {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn acknowledge_flush(&self, flushed: u64) {
        let _ = self
            .dirty
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(flushed))
            });
    }

    pub(crate) fn update_signal(&self) -> &Notify {
        &self.update_signal
    }

    fn mark_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::AcqRel);
        self.update_signal.notify_one();
    }
}
