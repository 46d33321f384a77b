//! Motion description loaded from TOML.

use std::collections::BTreeMap;
use std::path::Path;

use motus_core::{ConfigError, QpControllerConfig};
use motus_qp::FreeVariableConfig;
use motus_tasks::{JointGoalConfig, MonitorConfig};
use serde::{Deserialize, Serialize};

/// Everything needed to run one motion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default)]
    pub controller: QpControllerConfig,

    #[serde(default)]
    pub free_variables: Vec<FreeVariableConfig>,

    /// Start position per free variable; missing entries start at 0.
    #[serde(default)]
    pub initial_positions: BTreeMap<String, f64>,

    #[serde(default)]
    pub goals: Vec<JointGoalConfig>,

    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

impl MotionConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.controller.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
