//! Command-line driver for the switchboard adaptive router.
//!
//! Loads a fleet of candidates from TOML, backs each one with a simulated
//! backend, and exposes simulation, ranking and statistics commands.

pub mod config;
pub mod sim;

pub use config::{CandidateSpec, SimulationProfile, SwitchboardConfig};
pub use sim::{SimulatedBackend, SimulationSummary};
