//! Tasks, monitors and goal helpers for the motus controller.
//!
//! A [`Task`] groups named constraints under a weight gate driven by
//! [`monitor`] states. A [`TaskSet`] flattens every task into the integral and
//! derivative constraint lists consumed by [`motus_qp::QpController`].
//!
//! # Architecture
//!
//! Gating is symbolic: a constraint's weight is multiplied with the state
//! symbols of its task's start, hold and end monitors. The controller therefore
//! compiles once, and [`MonitorManager::tick`] switches tasks on or off by
//! writing 0/1 into the evaluation context before the controller ticks.
//!
//! Monitors are either [`ExpressionMonitor`]s compiled into one function or
//! [`PayloadMonitor`]s running side-effecting [`Payload`]s, optionally on a
//! worker thread. [`MonitorRegistry`] builds both from configuration.

pub mod goals;
pub mod monitor;
pub mod registry;
pub mod task;

pub use goals::{JointGoalConfig, JointPositionGoal, shortest_angular_distance};
pub use monitor::{
    ExpressionMonitor, LifeCycle, Monitor, MonitorManager, Payload, PayloadContext,
    PayloadMonitor, TIME_SYMBOL, state_symbol, time_symbol,
};
pub use registry::{MonitorConfig, MonitorConstructor, MonitorRegistry};
pub use task::{Task, TaskSet};
