//! Snapshot persistence of learned state.
//!
//! A [`Snapshot`] holds one [`CandidateRecord`] per known candidate. Stores
//! implement [`SnapshotStore`]; [`JsonFileStore`] writes pretty JSON
//! atomically (temp file, then rename) so a crash mid-write never leaves a
//! truncated snapshot behind.
//!
//! Writes happen off the request path in the batched [`writer`].

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::error::{RouterError, RouterResult};
use crate::registry::Candidate;
use crate::router::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::scoring::ScoreVector;
use crate::types::CandidateId;

pub use writer::{flush, spawn_writer, WriterCadence, WriterHandle};

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted state of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub speed: f64,
    pub quality: f64,
    pub token_eff: f64,
    pub cost: f64,
    pub memory: f64,
    pub reliability: f64,
    pub success_count: u64,
    pub call_count: u64,
    #[serde(default)]
    pub latency_history: VecDeque<f64>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    pub is_available: bool,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub circuit_trips: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

impl CandidateRecord {
    /// Capture a candidate's runtime state as of `now`.
    pub fn capture(candidate: &Candidate, breaker: &CircuitBreaker, now: DateTime<Utc>) -> Self {
        let s = &candidate.learned.scores;
        Self {
            speed: s.speed,
            quality: s.quality,
            token_eff: s.token_eff,
            cost: s.cost,
            memory: s.memory,
            reliability: s.reliability,
            success_count: candidate.learned.success_count,
            call_count: candidate.learned.call_count,
            latency_history: candidate.learned.latency_history.clone(),
            last_used: candidate.learned.last_used,
            is_available: candidate.is_available(breaker, now),
            consecutive_failures: candidate.circuit.consecutive_failures,
            circuit_trips: candidate.circuit.trips,
            open_until: candidate.circuit.open_until,
            disabled_reason: candidate.disabled.clone(),
        }
    }

    pub fn scores(&self) -> ScoreVector {
        ScoreVector::new(
            self.speed,
            self.quality,
            self.token_eff,
            self.cost,
            self.memory,
            self.reliability,
        )
    }

    /// Overwrite a candidate's learned and availability state with this record.
    ///
    /// The latency window is trimmed to `window` most recent samples.
    pub fn restore_into(&self, candidate: &mut Candidate, window: usize) {
        let learned = &mut candidate.learned;
        learned.scores = self.scores();
        learned.call_count = self.call_count;
        learned.success_count = self.success_count.min(self.call_count);
        learned.latency_history = self
            .latency_history
            .iter()
            .copied()
            .filter(|l| l.is_finite() && *l >= 0.0)
            .collect();
        while learned.latency_history.len() > window {
            learned.latency_history.pop_front();
        }
        learned.last_used = self.last_used;

        candidate.circuit = CircuitState {
            consecutive_failures: self.consecutive_failures,
            trips: self.circuit_trips,
            open_until: self.open_until,
        };
        candidate.disabled = match (&self.disabled_reason, self.is_available, self.open_until) {
            (Some(reason), _, _) => Some(reason.clone()),
            // Unavailable with no circuit to explain it: keep it out until reset.
            (None, false, None) => Some("restored as unavailable".to_string()),
            _ => None,
        };
    }
}

/// Full persisted state of a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub candidates: BTreeMap<CandidateId, CandidateRecord>,
}

impl Snapshot {
    pub fn new(candidates: BTreeMap<CandidateId, CandidateRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            candidates,
        }
    }

    pub fn check_version(&self) -> RouterResult<()> {
        if self.version == SNAPSHOT_VERSION {
            Ok(())
        } else {
            Err(RouterError::persistence(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )))
        }
    }

    pub fn to_json(&self) -> RouterResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> RouterResult<Self> {
        let snapshot: Self = serde_json::from_str(content)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }
}

/// Durable storage for snapshots.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> RouterResult<()>;

    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> RouterResult<Option<Snapshot>>;

    fn describe(&self) -> String;
}

/// JSON file on local disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &Snapshot) -> RouterResult<()> {
        let temp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = snapshot.to_json()?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            candidates = snapshot.candidates.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn load(&self) -> RouterResult<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Snapshot::from_json(&content).map(Some)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CandidateMetadata;
    use crate::scoring::ProviderClass;
    use crate::types::Tier;

    fn sample_record() -> CandidateRecord {
        CandidateRecord {
            speed: 0.9,
            quality: 0.6,
            token_eff: 0.8,
            cost: 0.7,
            memory: 0.95,
            reliability: 0.85,
            success_count: 9,
            call_count: 10,
            latency_history: vec![120.0, 140.0, 110.0].into(),
            last_used: Some(Utc::now()),
            is_available: true,
            consecutive_failures: 1,
            circuit_trips: 0,
            open_until: None,
            disabled_reason: None,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());

        let mut candidates = BTreeMap::new();
        candidates.insert(CandidateId::from("sprint"), sample_record());
        let snapshot = Snapshot::new(candidates);
        store.save(&snapshot).unwrap();

        assert!(!dir.path().join("state.json.tmp").exists());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/state.json"));
        store.save(&Snapshot::new(BTreeMap::new())).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut snapshot = Snapshot::new(BTreeMap::new());
        snapshot.version = 99;
        let json = serde_json::to_string(&snapshot).unwrap();
        let err = Snapshot::from_json(&json).unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE");
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::new(path).load().unwrap_err();
        assert!(matches!(err, RouterError::Persistence { .. }));
    }

    #[test]
    fn test_minimal_record_shape_loads() {
        let json = r#"{
            "speed": 0.5, "quality": 0.5, "token_eff": 0.5, "cost": 0.5,
            "memory": 0.5, "reliability": 0.8, "success_count": 0,
            "call_count": 0, "latency_history": [], "last_used": null,
            "is_available": true
        }"#;
        let record: CandidateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.disabled_reason.is_none());
    }

    #[test]
    fn test_restore_trims_window_and_keeps_unavailable() {
        let mut candidate = Candidate::new(
            CandidateId::from("a"),
            [Tier::from("fast")].into_iter().collect(),
            CandidateMetadata::new(ProviderClass::Fast),
        );
        let mut record = sample_record();
        record.is_available = false;
        record.restore_into(&mut candidate, 2);

        assert_eq!(candidate.learned.latency_history.len(), 2);
        assert_eq!(candidate.learned.scores, record.scores());
        assert!(candidate.disabled.is_some());
        assert!(!candidate.is_available(&CircuitBreaker::default(), Utc::now()));
    }
}
