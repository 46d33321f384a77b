//! Monitor construction from configuration.
//!
//! [`MonitorRegistry`] maps a kind tag to a constructor. It is built once at
//! startup ([`MonitorRegistry::with_builtins`]) and may be extended with
//! [`register`](MonitorRegistry::register) before monitors are created.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use motus_core::{MonitorError, MotusError};
use motus_expr::Symbol;
use serde::{Deserialize, Serialize};

use crate::monitor::{
    Alternator, CancelMotion, EndMotion, ExpressionMonitor, Monitor, MonitorManager,
    PayloadMonitor, Print, SetMaxTrajectoryLength, Sleep, local_minimum_reached, time_above,
};

/// Serde description of one monitor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,

    /// Registry tag, e.g. `"time_above"` or `"end_motion"`.
    pub kind: String,

    #[serde(default)]
    pub start_monitors: Vec<String>,

    /// Overrides the kind's latching default.
    #[serde(default)]
    pub stay_true: Option<bool>,

    /// Payload monitors only.
    #[serde(default)]
    pub run_in_worker: bool,

    /// Numeric parameters (`threshold`, `seconds`, `modulus`, `length`).
    #[serde(default)]
    pub params: BTreeMap<String, f64>,

    #[serde(default)]
    pub message: Option<String>,

    /// Symbol names, e.g. the velocities watched by `local_minimum_reached`.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl MonitorConfig {
    /// A required numeric parameter.
    pub fn param(&self, key: &str) -> Result<f64, MonitorError> {
        self.params
            .get(key)
            .copied()
            .ok_or_else(|| MonitorError::InvalidConfig {
                monitor: self.name.clone(),
                message: format!("missing parameter '{key}'"),
            })
    }
}

/// Builds a monitor from its configuration.
pub type MonitorConstructor = Arc<dyn Fn(&MonitorConfig) -> Result<Monitor, MonitorError> + Send + Sync>;

/// Map from kind tag to constructor.
#[derive(Clone, Default)]
pub struct MonitorRegistry {
    constructors: HashMap<String, MonitorConstructor>,
}

impl fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_set().entries(kinds).finish()
    }
}

impl MonitorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in monitor kind.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("time_above", |c| {
            Ok(ExpressionMonitor::new(c.name.clone(), time_above(c.param("threshold")?)).into())
        });
        r.register("local_minimum_reached", |c| {
            let velocities: Vec<_> = c.symbols.iter().map(|s| Symbol::new(s).expr()).collect();
            let threshold = c.params.get("threshold").copied().unwrap_or(0.01);
            Ok(ExpressionMonitor::new(c.name.clone(), local_minimum_reached(&velocities, threshold)).into())
        });
        r.register("alternator", |c| {
            let modulus = c.param("modulus")?;
            if !(modulus >= 1.0) || modulus.fract() != 0.0 {
                return Err(MonitorError::InvalidConfig {
                    monitor: c.name.clone(),
                    message: format!("modulus must be a positive integer, got {modulus}"),
                });
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let modulus = modulus as u32;
            Ok(PayloadMonitor::new(c.name.clone(), Alternator { modulus }).into())
        });
        r.register("end_motion", |c| Ok(PayloadMonitor::new(c.name.clone(), EndMotion).into()));
        r.register("cancel_motion", |c| {
            let message = c.message.clone().unwrap_or_else(|| "cancelled".into());
            Ok(PayloadMonitor::new(c.name.clone(), CancelMotion::new(message)).into())
        });
        r.register("print", |c| {
            let message = c.message.clone().unwrap_or_default();
            Ok(PayloadMonitor::new(c.name.clone(), Print::new(message)).into())
        });
        r.register("sleep", |c| {
            let seconds = c.param("seconds")?;
            let duration = Duration::try_from_secs_f64(seconds).map_err(|e| MonitorError::InvalidConfig {
                monitor: c.name.clone(),
                message: e.to_string(),
            })?;
            Ok(PayloadMonitor::new(c.name.clone(), Sleep { duration }).into())
        });
        r.register("set_max_trajectory_length", |c| {
            let length = c.param("length")?;
            Ok(PayloadMonitor::new(c.name.clone(), SetMaxTrajectoryLength { length }).into())
        });
        r
    }

    /// Add or replace the constructor for `kind`.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        constructor: impl Fn(&MonitorConfig) -> Result<Monitor, MonitorError> + Send + Sync + 'static,
    ) {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Construct one monitor and apply the generic settings of `config`.
    pub fn create(&self, config: &MonitorConfig) -> Result<Monitor, MonitorError> {
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| MonitorError::UnknownKind(config.kind.clone()))?;
        let monitor = match constructor(config)? {
            Monitor::Expression(mut m) => {
                m.start_monitors.clone_from(&config.start_monitors);
                if let Some(stay_true) = config.stay_true {
                    m.stay_true = stay_true;
                }
                if config.run_in_worker {
                    return Err(MonitorError::InvalidConfig {
                        monitor: config.name.clone(),
                        message: "expression monitors cannot run in a worker".into(),
                    });
                }
                Monitor::Expression(m)
            }
            Monitor::Payload(mut m) => {
                m.start_monitors.clone_from(&config.start_monitors);
                if let Some(stay_true) = config.stay_true {
                    m.stay_true = stay_true;
                }
                m.run_in_worker = config.run_in_worker;
                Monitor::Payload(m)
            }
        };
        Ok(monitor)
    }

    /// Construct every monitor into a compiled manager.
    pub fn build_manager(&self, configs: &[MonitorConfig]) -> Result<MonitorManager, MotusError> {
        let mut manager = MonitorManager::new();
        for config in configs {
            manager.add(self.create(config)?)?;
        }
        manager.compile()?;
        Ok(manager)
    }
}
