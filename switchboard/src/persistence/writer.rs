//! Batched background snapshot writer.
//!
//! The request path only bumps a pending-update counter and pings a
//! `Notify`. This task turns those pings into snapshot writes when either
//! `flush_every_updates` changes have piled up or `flush_interval_ms` has
//! passed with anything pending. A failed write is logged and the changes
//! stay pending, so the next cycle retries them. Cancelling the handle
//! triggers one last flush before the task exits.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SnapshotStore;
use crate::config::PersistenceConfig;
use crate::error::{RouterError, RouterResult};
use crate::router::SharedRouter;

/// When the writer flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterCadence {
    pub every_updates: u64,
    pub interval: Duration,
}

impl From<&PersistenceConfig> for WriterCadence {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            every_updates: config.flush_every_updates.max(1),
            interval: Duration::from_millis(config.flush_interval_ms.max(1)),
        }
    }
}

/// Running writer task.
#[derive(Debug)]
pub struct WriterHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WriterHandle {
    /// Stop the writer after a final flush and wait for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Snapshot writer task ended abnormally");
        }
    }
}

/// Spawn the writer on the current tokio runtime.
pub fn spawn_writer(
    router: SharedRouter,
    store: Arc<dyn SnapshotStore>,
    cadence: WriterCadence,
) -> WriterHandle {
    let cancel = CancellationToken::new();
    let join = tokio::spawn(run(router, store, cadence, cancel.clone()));
    WriterHandle { cancel, join }
}

async fn run(
    router: SharedRouter,
    store: Arc<dyn SnapshotStore>,
    cadence: WriterCadence,
    cancel: CancellationToken,
) {
    tracing::debug!(
        store = %store.describe(),
        every_updates = cadence.every_updates,
        interval_ms = cadence.interval.as_millis() as u64,
        "Snapshot writer started"
    );
    let mut ticker = tokio::time::interval(cadence.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if router.pending_updates() > 0 {
                    flush_logged(&router, &store).await;
                }
                break;
            }
            _ = ticker.tick() => {
                if router.pending_updates() > 0 {
                    flush_logged(&router, &store).await;
                }
            }
            _ = router.update_signal().notified() => {
                if router.pending_updates() >= cadence.every_updates {
                    flush_logged(&router, &store).await;
                }
            }
        }
    }
    tracing::debug!("Snapshot writer stopped");
}

async fn flush_logged(router: &SharedRouter, store: &Arc<dyn SnapshotStore>) {
    if let Err(e) = flush(router, store).await {
        tracing::warn!(
            store = %store.describe(),
            pending = router.pending_updates(),
            error = %e,
            "Snapshot write failed, will retry"
        );
    }
}

/// Write one snapshot now and acknowledge the changes it covers.
pub async fn flush(router: &SharedRouter, store: &Arc<dyn SnapshotStore>) -> RouterResult<()> {
    let covered = router.pending_updates();
    let snapshot = router.snapshot();
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .map_err(|e| RouterError::persistence(format!("snapshot task failed: {e}")))??;
    router.acknowledge_flush(covered);
    Ok(())
}
