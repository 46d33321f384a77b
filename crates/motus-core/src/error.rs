use motus_expr::ExprError;
use thiserror::Error;

use crate::derivative::Derivative;

/// Top-level error type for motus.
#[derive(Debug, Error)]
pub enum MotusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Limit error: {0}")]
    Limit(#[from] LimitError),

    #[error("Goal initialization error: {0}")]
    Goal(#[from] GoalInitializationError),

    #[error("QP error: {0}")]
    Qp(#[from] QpError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Expression error: {0}")]
    Expr(#[from] ExprError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid sample_period: {0} (must be > 0)")]
    InvalidSamplePeriod(f64),

    #[error("Invalid prediction_horizon: {0} (must be >= 1)")]
    InvalidPredictionHorizon(usize),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Free variable limit lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("Free variable '{variable}' has no symbol for derivative {derivative}")]
    UnknownDerivative {
        variable: String,
        derivative: Derivative,
    },

    #[error("Free variable '{variable}' has no {bound} limit for derivative {derivative}")]
    LimitNotDefined {
        variable: String,
        derivative: Derivative,
        bound: &'static str,
    },

    #[error("Free variable '{variable}' has a zero upper {derivative} limit")]
    ZeroLimit {
        variable: String,
        derivative: Derivative,
    },
}

/// Malformed constraint, task or monitor registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GoalInitializationError {
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Expression of '{name}' must be scalar, got shape {rows}x{cols}")]
    NonScalarExpression {
        name: String,
        rows: usize,
        cols: usize,
    },

    #[error("All parameters of '{name}' must have the same length")]
    LengthMismatch { name: String },

    #[error("Control horizon of '{name}' must be >= 1, got {value}")]
    InvalidControlHorizon { name: String, value: usize },

    #[error("Constraint '{name}': {message}")]
    Unsupported { name: String, message: String },

    #[error("Unknown monitor '{0}'")]
    UnknownMonitor(String),
}

/// Reasons a QP backend could not produce a solution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpSolverError {
    #[error("Cannot solve qp with no free variables")]
    NoFreeVariables,

    #[error("No QP backend registered for '{0}'")]
    NoBackend(String),

    #[error("Problem infeasible: {0}")]
    Infeasible(String),

    #[error("Backend setup failed: {0}")]
    Setup(String),
}

/// Errors surfaced by the QP controller.
#[derive(Debug, Error)]
pub enum QpError {
    #[error("QPSolverException: {0}")]
    Solver(#[from] QpSolverError),

    /// Fatal: retries exhausted or a hard bound is truly violated.
    #[error("Hard constraints violated: {0}")]
    HardConstraintsViolated(String),

    /// Fatal: a joint sits outside its position limits and the default-limit
    /// corridor could not recover it.
    #[error("Out of joint limits: {0}")]
    OutOfJointLimits(String),

    #[error("Matrix assembly failed: {0}")]
    Build(String),

    #[error(transparent)]
    Limit(#[from] LimitError),

    #[error(transparent)]
    Goal(#[from] GoalInitializationError),

    #[error(transparent)]
    Expr(#[from] ExprError),
}

impl QpError {
    /// True for errors that must abort the current motion.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HardConstraintsViolated(_) | Self::OutOfJointLimits(_)
        )
    }
}

/// Monitor runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("Motion cancelled by monitor '{monitor}': {message}")]
    Cancelled { monitor: String, message: String },

    #[error("Monitor '{monitor}' payload failed: {message}")]
    PayloadFailed { monitor: String, message: String },

    #[error("Unknown monitor kind '{0}'")]
    UnknownKind(String),

    #[error("Invalid monitor configuration for '{monitor}': {message}")]
    InvalidConfig { monitor: String, message: String },
}
