//! Shared test fixtures and utilities for motus crates.
//!
//! Provides reusable free-variable fixtures, evaluation-context helpers, mock
//! QP backends and deterministic RNG setup.

pub mod fixtures;
pub mod mocks;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{
    context_for, jerk_joint, random_variables, scenario_config, single_joint, velocity_joint,
};
pub use mocks::{CountingBackend, FailingBackend, FixedBackend, failing_registry};
pub use rng::{deterministic_vec, seeded_rng};
