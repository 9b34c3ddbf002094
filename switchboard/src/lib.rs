//! Switchboard Adaptive Router Library
//!
//! This library provides:
//! - A candidate registry of interchangeable backends with class-based priors
//! - Online multi-criteria scoring (speed, quality, token efficiency, cost,
//!   memory overhead, reliability) learned from execution outcomes
//! - Per-tier weight profiles and epsilon-greedy selection over a seeded RNG
//! - A retry/failover state machine with backoff and circuit breaking
//! - Snapshot persistence of learned state with a batched background writer
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard::{AdaptiveRouter, CandidateMetadata, ProviderClass, RouterConfig, Tier};
//! # use switchboard::executor::{AttemptContext, BackendFailure, Completion, Executable};
//! # struct Backend;
//! # #[async_trait::async_trait]
//! # impl Executable for Backend {
//! #     async fn execute(&self, _ctx: AttemptContext<'_>) -> Result<Completion, BackendFailure> {
//! #         Ok(Completion::new(serde_json::json!("ok")))
//! #     }
//! # }
//!
//! # async fn demo() -> switchboard::RouterResult<()> {
//! let router = AdaptiveRouter::new(RouterConfig::default(), Arc::new(Backend))?.shared();
//! router.register_candidate("sprint", ["fast"], CandidateMetadata::new(ProviderClass::Fast))?;
//! router.register_candidate("sage", ["fast", "deep"], CandidateMetadata::new(ProviderClass::Premium))?;
//!
//! let report = router
//!     .execute_default(&Tier::from("fast"), serde_json::json!({"prompt": "hi"}))
//!     .await;
//! println!("{} after {} attempt(s)", report.is_success(), report.attempts);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod executor;
pub mod failover;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod scoring;
pub mod stats;
pub mod types;

// Re-export the router surface
pub use config::{PersistenceConfig, RouterConfig};
pub use error::{ExhaustionReason, RouterError, RouterResult};
pub use executor::{AttemptContext, BackendFailure, Completion, Executable};
pub use failover::{AttemptOutcome, AttemptRecord, ExecutionReport, ExecutionStatus};
pub use persistence::{JsonFileStore, Snapshot, SnapshotStore, WriterCadence, WriterHandle};
pub use registry::{CandidateMetadata, CapacityHints, RegistrationOutcome};
pub use router::{AdaptiveRouter, RoutingDecision, SelectionMode, SharedRouter};
pub use scoring::{CostClass, Dimension, Outcome, ProviderClass, ScoreVector};
pub use stats::{CandidateStats, RouterStats, StatsScope};
pub use types::{CandidateId, Tier};
