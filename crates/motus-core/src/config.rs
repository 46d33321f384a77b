use std::fmt;

use serde::{Deserialize, Serialize};

use crate::derivative::Derivative;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_sample_period() -> f64 {
    0.05
}
const fn default_prediction_horizon() -> usize {
    7
}
const fn default_max_derivative() -> Derivative {
    Derivative::Jerk
}
const fn default_retries() -> u32 {
    5
}
const fn default_retry_added_slack() -> f64 {
    100.0
}
const fn default_retry_weight_factor() -> f64 {
    100.0
}
const fn default_diagnosis_slack_bound() -> f64 {
    100.0
}
const fn default_bound_tolerance() -> f64 {
    1e-4
}
const fn default_true() -> bool {
    true
}
const fn default_last_state_decimals() -> i32 {
    5
}
const fn default_position_decimals() -> i32 {
    10
}
const fn default_max_iter() -> u32 {
    200
}
const fn default_tolerance() -> f64 {
    1e-7
}
const fn default_admm_rho() -> f64 {
    0.1
}
const fn default_admm_max_iter() -> u32 {
    20_000
}

// ---------------------------------------------------------------------------
// QpBackendKind
// ---------------------------------------------------------------------------

/// Which QP backend the controller solves with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QpBackendKind {
    /// Clarabel interior-point solver.
    #[default]
    Clarabel,
    /// Dense ADMM (operator splitting) solver.
    Admm,
}

impl fmt::Display for QpBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clarabel => f.write_str("clarabel"),
            Self::Admm => f.write_str("admm"),
        }
    }
}

// ---------------------------------------------------------------------------
// SolverSettings
// ---------------------------------------------------------------------------

/// Numeric settings handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Maximum solver iterations (default: 200).
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,

    /// Feasibility and optimality tolerance (default: 1e-7).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// ADMM penalty parameter (default: 0.1). Ignored by other backends.
    #[serde(default = "default_admm_rho")]
    pub admm_rho: f64,

    /// ADMM iteration cap (default: 20000). Operator splitting needs far more
    /// iterations than the interior-point `max_iter`.
    #[serde(default = "default_admm_max_iter")]
    pub admm_max_iter: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
            admm_rho: default_admm_rho(),
            admm_max_iter: default_admm_max_iter(),
        }
    }
}

// ---------------------------------------------------------------------------
// QpControllerConfig
// ---------------------------------------------------------------------------

/// Configuration of the horizon QP controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QpControllerConfig {
    /// Control period in seconds (default: 0.05 = 20 Hz).
    #[serde(default = "default_sample_period")]
    pub sample_period: f64,

    /// Number of future steps optimized jointly (default: 7).
    #[serde(default = "default_prediction_horizon")]
    pub prediction_horizon: usize,

    /// Highest derivative the controller may optimize (default: jerk).
    #[serde(default = "default_max_derivative")]
    pub max_derivative: Derivative,

    #[serde(default)]
    pub backend: QpBackendKind,

    /// Relaxed solve attempts allowed before infeasibility becomes fatal
    /// (default: 5).
    #[serde(default = "default_retries")]
    pub retries_with_relaxed_constraints: u32,

    /// Additive margin applied to slack bounds on a relaxed attempt.
    #[serde(default = "default_retry_added_slack")]
    pub retry_added_slack: f64,

    /// Weight multiplier for slack columns that break their bounds on a
    /// relaxed attempt.
    #[serde(default = "default_retry_weight_factor")]
    pub retry_weight_factor: f64,

    /// Slack bound used when diagnosing a failed solve.
    #[serde(default = "default_diagnosis_slack_bound")]
    pub diagnosis_slack_bound: f64,

    /// Allowed bound excess of a returned solution.
    #[serde(default = "default_bound_tolerance")]
    pub bound_tolerance: f64,

    /// Fraction of the position range treated as "at the limit" when deciding
    /// to switch to the default-limits variant (default: 0.0).
    #[serde(default)]
    pub position_limit_margin: f64,

    /// Force lower derivatives to zero at the last horizon step.
    #[serde(default = "default_true")]
    pub zero_final_derivatives: bool,

    /// Decimals used when rounding the current derivative state into the
    /// first link row.
    #[serde(default = "default_last_state_decimals")]
    pub last_state_decimals: i32,

    /// Decimals used when rounding position-limit row bounds.
    #[serde(default = "default_position_decimals")]
    pub position_decimals: i32,

    #[serde(default)]
    pub solver: SolverSettings,
}

impl Default for QpControllerConfig {
    fn default() -> Self {
        Self {
            sample_period: default_sample_period(),
            prediction_horizon: default_prediction_horizon(),
            max_derivative: default_max_derivative(),
            backend: QpBackendKind::default(),
            retries_with_relaxed_constraints: default_retries(),
            retry_added_slack: default_retry_added_slack(),
            retry_weight_factor: default_retry_weight_factor(),
            diagnosis_slack_bound: default_diagnosis_slack_bound(),
            bound_tolerance: default_bound_tolerance(),
            position_limit_margin: 0.0,
            zero_final_derivatives: true,
            last_state_decimals: default_last_state_decimals(),
            position_decimals: default_position_decimals(),
            solver: SolverSettings::default(),
        }
    }
}

impl QpControllerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_period > 0.0) {
            return Err(ConfigError::InvalidSamplePeriod(self.sample_period));
        }
        if self.prediction_horizon == 0 {
            return Err(ConfigError::InvalidPredictionHorizon(self.prediction_horizon));
        }
        if self.max_derivative < Derivative::Velocity {
            return Err(ConfigError::InvalidValue {
                field: "max_derivative".into(),
                message: "must be velocity or higher".into(),
            });
        }
        for (field, value) in [
            ("retry_added_slack", self.retry_added_slack),
            ("retry_weight_factor", self.retry_weight_factor),
            ("diagnosis_slack_bound", self.diagnosis_slack_bound),
            ("bound_tolerance", self.bound_tolerance),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: format!("must be >= 0, got {value}"),
                });
            }
        }
        if !(0.0..1.0).contains(&self.position_limit_margin) {
            return Err(ConfigError::InvalidValue {
                field: "position_limit_margin".into(),
                message: format!("must be in [0, 1), got {}", self.position_limit_margin),
            });
        }
        if self.solver.max_iter == 0 || self.solver.admm_max_iter == 0 {
            return Err(ConfigError::InvalidValue {
                field: "solver.max_iter".into(),
                message: "must be > 0".into(),
            });
        }
        if !(self.solver.admm_rho > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "solver.admm_rho".into(),
                message: format!("must be > 0, got {}", self.solver.admm_rho),
            });
        }
        Ok(())
    }

    /// Control rate in Hz.
    pub fn control_hz(&self) -> f64 {
        1.0 / self.sample_period
    }

    /// Parse and validate a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
