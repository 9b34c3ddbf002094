//! Multi-Criteria Scorer
//!
//! Maintains a normalized six-dimensional score vector per candidate and
//! updates it incrementally from observed outcomes.

pub mod learner;
pub mod priors;
pub mod vector;

pub use learner::{
    ema, update, LearnedState, Learner, LearningRates, ObservedScores, Outcome,
    ReliabilityParams, DEFAULT_SUCCESS_QUALITY,
};
pub use priors::{CostClass, ProviderClass};
pub use vector::{Dimension, ScoreVector};
