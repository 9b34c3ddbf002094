//! Candidate registry: backend identity, metadata and runtime state
//!
//! Tracks which candidates exist, which tiers they serve, their static
//! metadata, and the mutable state the router learns about them (score
//! vector, counters, latency window, circuit, administrative override).
//!
//! Each candidate sits behind its own mutex so score updates for one
//! candidate are serialized while different candidates update in parallel.
//! Lock order is always map, then pending, then candidate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RouterError, RouterResult};
use crate::persistence::CandidateRecord;
use crate::router::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::router::ranking::EligibleCandidate;
use crate::scoring::{CostClass, LearnedState, ProviderClass, ScoreVector};
use crate::types::{CandidateId, Tier};

/// Capacity hints reported at registration. Informational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityHints {
    pub max_concurrency: Option<u32>,
    /// Context window in tokens
    pub context_window: Option<u32>,
}

/// Static metadata of a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateMetadata {
    pub class: ProviderClass,
    pub cost_class: CostClass,
    pub capacity: CapacityHints,
    /// Explicit cold-start vector; overrides the class prior
    pub prior: Option<ScoreVector>,
    pub description: Option<String>,
}

impl CandidateMetadata {
    pub fn new(class: ProviderClass) -> Self {
        Self {
            class,
            ..Default::default()
        }
    }

    pub fn with_cost_class(mut self, cost_class: CostClass) -> Self {
        self.cost_class = cost_class;
        self
    }

    pub fn with_prior(mut self, prior: ScoreVector) -> Self {
        self.prior = Some(prior.clamped());
        self
    }

    pub fn with_capacity(mut self, capacity: CapacityHints) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Vector an unseen candidate starts from.
    pub fn prior_vector(&self) -> ScoreVector {
        self.prior.unwrap_or_else(|| self.class.prior())
    }
}

/// One registered backend and everything learned about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    pub tiers: BTreeSet<Tier>,
    pub metadata: CandidateMetadata,
    pub learned: LearnedState,
    pub circuit: CircuitState,
    /// Administrative override reason; `Some` keeps the candidate out of selection
    pub disabled: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(id: CandidateId, tiers: BTreeSet<Tier>, metadata: CandidateMetadata) -> Self {
        let learned = LearnedState::seeded(metadata.prior_vector());
        Self {
            id,
            tiers,
            metadata,
            learned,
            circuit: CircuitState::default(),
            disabled: None,
            registered_at: Utc::now(),
        }
    }

    pub fn serves(&self, tier: &Tier) -> bool {
        self.tiers.contains(tier)
    }

    /// Current scores; the prior until the first outcome arrives.
    pub fn scores(&self) -> ScoreVector {
        self.learned.scores
    }

    /// Neither administratively disabled nor circuit-open at `now`.
    pub fn is_available(&self, breaker: &CircuitBreaker, now: DateTime<Utc>) -> bool {
        self.disabled.is_none() && breaker.is_available(&self.circuit, now)
    }
}

/// Result of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    /// Same id, tiers and metadata were already registered.
    Unchanged,
}

/// Shared candidate handle; lock it to read or mutate.
pub type CandidateHandle = Arc<Mutex<Candidate>>;

/// Thread-safe candidate registry.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    entries: RwLock<HashMap<CandidateId, CandidateHandle>>,
    /// Snapshot records loaded before their candidate was registered
    pending: Mutex<HashMap<CandidateId, CandidateRecord>>,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CandidateId, CandidateHandle>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CandidateId, CandidateHandle>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<CandidateId, CandidateRecord>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a candidate. Idempotent for identical tiers and metadata.
    ///
    /// `window` bounds the latency history restored from a pending record.
    pub fn register(
        &self,
        id: CandidateId,
        tiers: BTreeSet<Tier>,
        metadata: CandidateMetadata,
        window: usize,
    ) -> RouterResult<RegistrationOutcome> {
        if id.as_str().trim().is_empty() {
            return Err(RouterError::validation("candidate id must not be empty"));
        }
        if tiers.is_empty() {
            return Err(RouterError::validation(format!(
                "candidate '{id}' must serve at least one tier"
            )));
        }

        let mut entries = self.write();
        if let Some(existing) = entries.get(&id) {
            let existing = lock(existing);
            if existing.tiers == tiers && existing.metadata == metadata {
                return Ok(RegistrationOutcome::Unchanged);
            }
            return Err(RouterError::validation(format!(
                "candidate '{id}' is already registered with different tiers or metadata"
            )));
        }

        let mut candidate = Candidate::new(id.clone(), tiers, metadata);
        if let Some(record) = self.pending().remove(&id) {
            record.restore_into(&mut candidate, window);
            tracing::debug!(candidate = %id, "Applied persisted state on registration");
        }

        tracing::info!(
            candidate = %id,
            tiers = ?candidate.tiers,
            class = %candidate.metadata.class,
            "Candidate registered"
        );
        entries.insert(id, Arc::new(Mutex::new(candidate)));
        Ok(RegistrationOutcome::Created)
    }

    /// Remove a candidate. The only deletion path.
    pub fn deregister(&self, id: &CandidateId) -> RouterResult<Candidate> {
        let handle = self
            .write()
            .remove(id)
            .ok_or_else(|| unknown_candidate(id))?;
        tracing::info!(candidate = %id, "Candidate deregistered");
        let candidate = lock(&handle).clone();
        Ok(candidate)
    }

    pub fn get(&self, id: &CandidateId) -> Option<CandidateHandle> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.read().contains_key(id)
    }

    /// Run `f` under the candidate's lock.
    pub fn with_candidate<T>(
        &self,
        id: &CandidateId,
        f: impl FnOnce(&mut Candidate) -> T,
    ) -> RouterResult<T> {
        let handle = self.get(id).ok_or_else(|| unknown_candidate(id))?;
        let mut candidate = lock(&handle);
        Ok(f(&mut candidate))
    }

    /// Exclude a candidate from selection until [`mark_available`](Self::mark_available).
    pub fn mark_unavailable(&self, id: &CandidateId, reason: impl Into<String>) -> RouterResult<()> {
        let reason = reason.into();
        self.with_candidate(id, |c| c.disabled = Some(reason.clone()))?;
        tracing::warn!(candidate = %id, reason = %reason, "Candidate marked unavailable");
        Ok(())
    }

    /// Clear any override and reset the circuit.
    pub fn mark_available(&self, id: &CandidateId) -> RouterResult<()> {
        self.with_candidate(id, |c| {
            c.disabled = None;
            c.circuit = CircuitState::default();
        })?;
        tracing::info!(candidate = %id, "Candidate marked available");
        Ok(())
    }

    /// Available candidates serving `tier`, sorted by id.
    pub fn list_eligible(
        &self,
        tier: &Tier,
        breaker: &CircuitBreaker,
        now: DateTime<Utc>,
    ) -> Vec<EligibleCandidate> {
        let mut eligible: Vec<EligibleCandidate> = self
            .read()
            .values()
            .filter_map(|handle| {
                let c = lock(handle);
                if c.serves(tier) && c.is_available(breaker, now) {
                    Some(EligibleCandidate {
                        id: c.id.clone(),
                        scores: c.scores(),
                    })
                } else {
                    None
                }
            })
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));
        eligible
    }

    /// Clones of every candidate, sorted by id.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut all: Vec<Candidate> = self.read().values().map(|h| lock(h).clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn ids(&self) -> Vec<CandidateId> {
        let mut ids: Vec<CandidateId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records for every registered candidate plus still-pending ones.
    pub fn records(
        &self,
        breaker: &CircuitBreaker,
        now: DateTime<Utc>,
    ) -> BTreeMap<CandidateId, CandidateRecord> {
        let entries = self.read();
        let mut records: BTreeMap<CandidateId, CandidateRecord> = self
            .pending()
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        for (id, handle) in entries.iter() {
            let candidate = lock(handle);
            records.insert(id.clone(), CandidateRecord::capture(&candidate, breaker, now));
        }
        records
    }

    /// Apply persisted records. Registered candidates are overwritten in
    /// place; the rest wait for their registration.
    pub fn hydrate(
        &self,
        records: BTreeMap<CandidateId, CandidateRecord>,
        window: usize,
    ) -> HydrationSummary {
        let entries = self.read();
        let mut pending = self.pending();
        let mut summary = HydrationSummary::default();
        for (id, record) in records {
            match entries.get(&id) {
                Some(handle) => {
                    record.restore_into(&mut lock(handle), window);
                    summary.applied += 1;
                }
                None => {
                    pending.insert(id, record);
                    summary.deferred += 1;
                }
            }
        }
        summary
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

/// What a hydration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationSummary {
    /// Records applied to registered candidates
    pub applied: usize,
    /// Records held until their candidate registers
    pub deferred: usize,
}

fn lock(handle: &CandidateHandle) -> MutexGuard<'_, Candidate> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

fn unknown_candidate(id: &CandidateId) -> RouterError {
    RouterError::validation(format!("unknown candidate '{id}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers(names: &[&str]) -> BTreeSet<Tier> {
        names.iter().map(|n| Tier::from(*n)).collect()
    }

    fn registry_with(ids: &[(&str, &[&str])]) -> CandidateRegistry {
        let registry = CandidateRegistry::new();
        for (id, t) in ids {
            registry
                .register(
                    CandidateId::from(*id),
                    tiers(t),
                    CandidateMetadata::new(ProviderClass::General),
                    20,
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = CandidateRegistry::new();
        let meta = CandidateMetadata::new(ProviderClass::Fast).with_cost_class(CostClass::Low);
        let id = CandidateId::from("sprint");
        assert_eq!(
            registry.register(id.clone(), tiers(&["fast"]), meta.clone(), 20).unwrap(),
            RegistrationOutcome::Created
        );
        assert_eq!(
            registry.register(id, tiers(&["fast"]), meta, 20).unwrap(),
            RegistrationOutcome::Unchanged
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let registry = registry_with(&[("sprint", &["fast"])]);
        let err = registry
            .register(
                CandidateId::from("sprint"),
                tiers(&["fast", "deep"]),
                CandidateMetadata::new(ProviderClass::General),
                20,
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::Validation { .. }));

        let err = registry
            .register(
                CandidateId::from("sprint"),
                tiers(&["fast"]),
                CandidateMetadata::new(ProviderClass::Premium),
                20,
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::Validation { .. }));
    }

    #[test]
    fn test_register_requires_id_and_tiers() {
        let registry = CandidateRegistry::new();
        let meta = CandidateMetadata::default();
        assert!(registry.register(CandidateId::from(" "), tiers(&["fast"]), meta.clone(), 20).is_err());
        assert!(registry.register(CandidateId::from("x"), BTreeSet::new(), meta, 20).is_err());
    }

    #[test]
    fn test_unseen_candidate_uses_prior() {
        let registry = CandidateRegistry::new();
        let explicit = ScoreVector::uniform(0.42);
        registry
            .register(
                CandidateId::from("a"),
                tiers(&["fast"]),
                CandidateMetadata::new(ProviderClass::Fast),
                20,
            )
            .unwrap();
        registry
            .register(
                CandidateId::from("b"),
                tiers(&["fast"]),
                CandidateMetadata::new(ProviderClass::Fast).with_prior(explicit),
                20,
            )
            .unwrap();
        let a = registry.with_candidate(&CandidateId::from("a"), |c| c.scores()).unwrap();
        let b = registry.with_candidate(&CandidateId::from("b"), |c| c.scores()).unwrap();
        assert_eq!(a, ProviderClass::Fast.prior());
        assert_eq!(b, explicit);
    }

    #[test]
    fn test_list_eligible_filters_tier_and_availability() {
        let registry = registry_with(&[("c", &["fast"]), ("a", &["fast", "deep"]), ("b", &["deep"])]);
        let breaker = CircuitBreaker::default();
        let now = Utc::now();

        let fast: Vec<String> = registry
            .list_eligible(&Tier::from("fast"), &breaker, now)
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(fast, vec!["a", "c"]);

        registry.mark_unavailable(&CandidateId::from("a"), "maintenance").unwrap();
        let fast = registry.list_eligible(&Tier::from("fast"), &breaker, now);
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0].id.as_str(), "c");

        registry.mark_available(&CandidateId::from("a")).unwrap();
        assert_eq!(registry.list_eligible(&Tier::from("fast"), &breaker, now).len(), 2);
    }

    #[test]
    fn test_mark_available_resets_circuit() {
        let registry = registry_with(&[("a", &["fast"])]);
        let breaker = CircuitBreaker::default();
        let now = Utc::now();
        let id = CandidateId::from("a");
        registry
            .with_candidate(&id, |c| {
                for _ in 0..3 {
                    breaker.record_failure(&mut c.circuit, now);
                }
            })
            .unwrap();
        assert!(registry.list_eligible(&Tier::from("fast"), &breaker, now).is_empty());

        registry.mark_available(&id).unwrap();
        assert_eq!(registry.list_eligible(&Tier::from("fast"), &breaker, now).len(), 1);
        let circuit = registry.with_candidate(&id, |c| c.circuit.clone()).unwrap();
        assert_eq!(circuit, CircuitState::default());
    }

    #[test]
    fn test_unknown_candidate_operations_fail() {
        let registry = CandidateRegistry::new();
        let ghost = CandidateId::from("ghost");
        assert!(registry.mark_unavailable(&ghost, "x").is_err());
        assert!(registry.mark_available(&ghost).is_err());
        assert!(registry.deregister(&ghost).is_err());
    }

    #[test]
    fn test_deregister_removes_candidate() {
        let registry = registry_with(&[("a", &["fast"]), ("b", &["fast"])]);
        let removed = registry.deregister(&CandidateId::from("a")).unwrap();
        assert_eq!(removed.id.as_str(), "a");
        assert_eq!(registry.ids(), vec![CandidateId::from("b")]);
    }

    #[test]
    fn test_hydrate_before_registration_is_deferred() {
        let registry = registry_with(&[("known", &["fast"])]);
        let breaker = CircuitBreaker::default();
        let now = Utc::now();

        let mut record = registry.records(&breaker, now)[&CandidateId::from("known")].clone();
        record.speed = 0.11;
        record.call_count = 7;
        record.success_count = 5;

        let mut records = BTreeMap::new();
        records.insert(CandidateId::from("known"), record.clone());
        records.insert(CandidateId::from("later"), record);

        let summary = registry.hydrate(records, 20);
        assert_eq!(summary, HydrationSummary { applied: 1, deferred: 1 });
        assert_eq!(registry.pending_count(), 1);

        // Pending records survive a snapshot
        assert_eq!(registry.records(&breaker, now).len(), 2);

        registry
            .register(
                CandidateId::from("later"),
                tiers(&["fast"]),
                CandidateMetadata::new(ProviderClass::General),
                20,
            )
            .unwrap();
        assert_eq!(registry.pending_count(), 0);
        let later = registry
            .with_candidate(&CandidateId::from("later"), |c| c.learned.clone())
            .unwrap();
        assert_eq!(later.call_count, 7);
        assert!((later.scores.speed - 0.11).abs() < 1e-12);
    }
}
