//! Shared vocabulary of the motus controller.
//!
//! - [`Derivative`]: ordinal derivative orders (position through snap)
//! - [`error`]: the error taxonomy used by every motus crate
//! - [`config`]: controller configuration loaded from TOML

pub mod config;
pub mod derivative;
pub mod error;

pub use config::{QpBackendKind, QpControllerConfig, SolverSettings};
pub use derivative::Derivative;
pub use error::{
    ConfigError, GoalInitializationError, LimitError, MonitorError, MotusError, QpError,
    QpSolverError,
};
