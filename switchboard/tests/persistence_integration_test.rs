//! Integration tests for snapshot persistence
//!
//! Covers save/load round trips through the JSON file store, loading
//! before registration, the batched background writer, and circuit
//! cooldown recovery as seen through the public router API.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use switchboard::executor::{AttemptContext, BackendFailure, Completion, Executable};
use switchboard::persistence::{spawn_writer, WriterCadence};
use switchboard::router::circuit_breaker::CircuitPhase;
use switchboard::{
    AdaptiveRouter, CandidateId, CandidateMetadata, JsonFileStore, Outcome, ProviderClass,
    RouterConfig, RouterError, RouterResult, SharedRouter, Snapshot, SnapshotStore, StatsScope,
    Tier,
};

struct EchoBackend;

#[async_trait]
impl Executable for EchoBackend {
    async fn execute(&self, ctx: AttemptContext<'_>) -> Result<Completion, BackendFailure> {
        Ok(Completion::new(ctx.payload.clone()))
    }
}

/// Store that can be switched into a failing mode.
#[derive(Default)]
struct FlakyStore {
    failing: AtomicBool,
    saves: AtomicUsize,
    latest: Mutex<Option<Snapshot>>,
}

impl SnapshotStore for FlakyStore {
    fn save(&self, snapshot: &Snapshot) -> RouterResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RouterError::persistence("disk full"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.latest.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> RouterResult<Option<Snapshot>> {
        Ok(self.latest.lock().unwrap().clone())
    }

    fn describe(&self) -> String {
        "flaky-store".to_string()
    }
}

fn new_router(config: RouterConfig) -> SharedRouter {
    AdaptiveRouter::new(config, Arc::new(EchoBackend))
        .unwrap()
        .shared()
}

fn register_fleet(router: &AdaptiveRouter) {
    router
        .register_candidate("sprint", ["fast", "balanced"], CandidateMetadata::new(ProviderClass::Fast))
        .unwrap();
    router
        .register_candidate("sage", ["deep"], CandidateMetadata::new(ProviderClass::Premium))
        .unwrap();
    router
        .register_candidate("thrift", ["fast"], CandidateMetadata::new(ProviderClass::Economy))
        .unwrap();
}

fn id(s: &str) -> CandidateId {
    CandidateId::from(s)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Test: learned scores and availability survive a save/load through a file
#[tokio::test]
async fn test_snapshot_round_trip_into_fresh_router() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("router_state.json"));

    let original = new_router(RouterConfig::default());
    register_fleet(&original);
    for i in 0..5 {
        let outcome = Outcome::success("sprint", "fast", Duration::from_millis(300 + i * 50))
            .with_units(400)
            .with_quality(0.7);
        original.record_outcome(&outcome).unwrap();
    }
    original
        .record_outcome(&Outcome::failure("sage", "deep", Duration::from_millis(900)))
        .unwrap();
    original.mark_unavailable(&id("thrift"), "maintenance").unwrap();
    store.save(&original.snapshot()).unwrap();

    let restored = new_router(RouterConfig::default());
    register_fleet(&restored);
    let summary = restored.load_from(&store).unwrap().unwrap();
    assert_eq!(summary.applied, 3);
    assert_eq!(summary.deferred, 0);

    for name in ["sprint", "sage", "thrift"] {
        assert_eq!(
            restored.score(&id(name)).unwrap(),
            original.score(&id(name)).unwrap(),
            "{name} score vector differs after reload"
        );
    }

    let before = original.get_stats(&StatsScope::Global).unwrap();
    let after = restored.get_stats(&StatsScope::Global).unwrap();
    for stats in &before.candidates {
        let reloaded = after.candidate(&stats.id).unwrap();
        assert_eq!(reloaded.available, stats.available);
        assert_eq!(reloaded.call_count, stats.call_count);
        assert_eq!(reloaded.success_count, stats.success_count);
        assert_eq!(reloaded.mean_latency_ms, stats.mean_latency_ms);
    }
    let thrift = after.candidate(&id("thrift")).unwrap();
    assert!(!thrift.available);
    assert_eq!(thrift.disabled_reason.as_deref(), Some("maintenance"));
}

/// Test: records loaded before registration apply once the candidate registers
#[tokio::test]
async fn test_load_before_registration() {
    let source = new_router(RouterConfig::default());
    register_fleet(&source);
    source
        .record_outcome(&Outcome::success("sage", "deep", Duration::from_millis(4_000)))
        .unwrap();
    let snapshot = source.snapshot();

    let target = new_router(RouterConfig::default());
    let summary = target.load(snapshot).unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.deferred, 3);
    assert_eq!(target.registry().pending_count(), 3);

    target
        .register_candidate("sage", ["deep"], CandidateMetadata::new(ProviderClass::Premium))
        .unwrap();
    assert_eq!(target.score(&id("sage")).unwrap(), source.score(&id("sage")).unwrap());
    assert_eq!(target.registry().pending_count(), 2);

    // Unregistered records are still carried into the next snapshot
    let resaved = target.snapshot();
    assert!(resaved.candidates.contains_key(&id("sprint")));
    assert!(resaved.candidates.contains_key(&id("thrift")));
}

/// Test: snapshots from a future format are refused
#[tokio::test]
async fn test_load_rejects_unknown_version() {
    let router = new_router(RouterConfig::default());
    register_fleet(&router);
    let mut snapshot = router.snapshot();
    snapshot.version += 1;

    let err = router.load(snapshot).unwrap_err();
    assert!(matches!(err, RouterError::Persistence { .. }));
}

/// Test: the writer flushes once enough updates pile up, and again on shutdown
#[tokio::test]
async fn test_writer_flushes_on_threshold_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&path));

    let router = new_router(RouterConfig::default());
    let handle = spawn_writer(
        Arc::clone(&router),
        Arc::clone(&store),
        WriterCadence {
            every_updates: 4,
            interval: Duration::from_secs(3600),
        },
    );

    // Three registrations plus one outcome reach the threshold
    register_fleet(&router);
    let report = router.execute_default(&Tier::from("fast"), json!({"n": 1})).await;
    assert!(report.is_success());

    assert!(wait_until(|| path.exists()).await, "writer never flushed");
    assert!(wait_until(|| router.pending_updates() == 0).await);

    router
        .record_outcome(&Outcome::failure("sage", "deep", Duration::from_millis(50)))
        .unwrap();
    assert_eq!(router.pending_updates(), 1);
    handle.shutdown().await;
    assert_eq!(router.pending_updates(), 0);

    let saved = store.load().unwrap().unwrap();
    let total_calls: u64 = saved.candidates.values().map(|r| r.call_count).sum();
    assert_eq!(total_calls, 2);
    assert_eq!(saved.candidates[&id("sage")].call_count, 1);
    assert_eq!(saved.candidates[&id("sage")].success_count, 0);
}

/// Test: a failing store keeps updates pending and never blocks requests
#[tokio::test]
async fn test_writer_retries_after_store_failure() {
    let store = Arc::new(FlakyStore::default());
    store.failing.store(true, Ordering::SeqCst);
    let dyn_store: Arc<dyn SnapshotStore> = store.clone();

    let router = new_router(RouterConfig::default());
    register_fleet(&router);
    let handle = spawn_writer(
        Arc::clone(&router),
        dyn_store,
        WriterCadence {
            every_updates: 1,
            interval: Duration::from_millis(20),
        },
    );

    for i in 0..5 {
        let report = router.execute_default(&Tier::from("fast"), json!({ "n": i })).await;
        assert!(report.is_success());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    assert!(router.pending_updates() >= 5);

    store.failing.store(false, Ordering::SeqCst);
    assert!(wait_until(|| router.pending_updates() == 0).await);
    assert!(store.saves.load(Ordering::SeqCst) >= 1);
    handle.shutdown().await;

    let saved = store.load().unwrap().unwrap();
    let total_calls: u64 = saved.candidates.values().map(|r| r.call_count).sum();
    assert_eq!(total_calls, 5);
}

/// Test: an open circuit lets the candidate back in once its cooldown passes
#[tokio::test]
async fn test_circuit_recovers_after_cooldown() {
    let config = RouterConfig {
        failure_threshold: 1,
        cooldown_schedule_ms: vec![50],
        ..RouterConfig::default()
    };
    let router = new_router(config);
    router
        .register_candidate("solo", ["fast"], CandidateMetadata::new(ProviderClass::Fast))
        .unwrap();
    let fast = Tier::from("fast");

    router
        .record_outcome(&Outcome::failure("solo", "fast", Duration::from_millis(10)))
        .unwrap();
    assert!(router.list_eligible(&fast).unwrap().is_empty());
    let stats = router.get_stats(&StatsScope::Candidate(id("solo"))).unwrap();
    assert_eq!(stats.candidates[0].circuit, CircuitPhase::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(router.list_eligible(&fast).unwrap().len(), 1);

    let report = router.execute_default(&fast, json!({})).await;
    assert!(report.is_success());
    let stats = router.get_stats(&StatsScope::Candidate(id("solo"))).unwrap();
    assert_eq!(stats.candidates[0].circuit, CircuitPhase::Closed);
    assert_eq!(stats.candidates[0].consecutive_failures, 0);
}

/// Test: an explicit reset clears both manual disable and open circuit
#[tokio::test]
async fn test_mark_available_resets_candidate() {
    let router = new_router(RouterConfig::default());
    register_fleet(&router);
    let fast = Tier::from("fast");

    for _ in 0..3 {
        router
            .record_outcome(&Outcome::failure("sprint", "fast", Duration::from_millis(10)))
            .unwrap();
    }
    router.mark_unavailable(&id("thrift"), "quota").unwrap();
    assert!(router.list_eligible(&fast).unwrap().is_empty());

    router.mark_available(&id("sprint")).unwrap();
    router.mark_available(&id("thrift")).unwrap();
    let eligible: Vec<String> = router
        .list_eligible(&fast)
        .unwrap()
        .into_iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(eligible, vec!["sprint", "thrift"]);
}
