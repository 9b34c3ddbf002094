//! Retry / failover engine
//!
//! - [`state`]: the per-request state machine and its transition log
//! - [`backoff`]: capped exponential backoff with jitter
//! - [`engine`]: `AdaptiveRouter::execute`, which drives both

pub mod backoff;
pub mod engine;
pub mod state;

pub use backoff::BackoffPolicy;
pub use engine::{AttemptOutcome, AttemptRecord, ExecutionReport, ExecutionStatus};
pub use state::{FailoverMachine, FailoverState, IllegalTransition, TransitionRecord};
