//! Joint-space goals.

use std::collections::BTreeMap;
use std::f64::consts::{PI, TAU};

use motus_core::{Derivative, GoalInitializationError, MotusError};
use motus_expr::Expr;
use motus_qp::FreeVariable;
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Signed shortest angle from `from` to `to`, in `[-π, π)`.
pub fn shortest_angular_distance(from: &Expr, to: &Expr) -> Expr {
    let tau = Expr::constant(TAU);
    let d = to - from + PI;
    ((d.fmod(&tau) + TAU).fmod(&tau)) - PI
}

/// Drive joints to target positions, one equality constraint per joint.
///
/// Continuous joints use the shortest angular distance. The reference
/// velocity of a joint is the smallest of the goal's reference velocity, its
/// optional per-joint maximum and the joint's upper velocity limit.
#[derive(Debug, Clone, PartialEq)]
pub struct JointPositionGoal {
    targets: BTreeMap<String, f64>,
    max_velocities: BTreeMap<String, f64>,
    reference_velocity: f64,
    weight: f64,
}

impl JointPositionGoal {
    pub const fn new(reference_velocity: f64, weight: f64) -> Self {
        Self {
            targets: BTreeMap::new(),
            max_velocities: BTreeMap::new(),
            reference_velocity,
            weight,
        }
    }

    #[must_use]
    pub fn with_target(mut self, joint: impl Into<String>, position: f64) -> Self {
        self.targets.insert(joint.into(), position);
        self
    }

    #[must_use]
    pub fn with_max_velocity(mut self, joint: impl Into<String>, velocity: f64) -> Self {
        self.max_velocities.insert(joint.into(), velocity);
        self
    }

    /// Add the joint constraints to `task`.
    pub fn apply(&self, task: &mut Task, variables: &[FreeVariable]) -> Result<(), MotusError> {
        for (joint, &target) in &self.targets {
            let v = variables
                .iter()
                .find(|v| v.name() == joint)
                .ok_or_else(|| GoalInitializationError::Unsupported {
                    name: format!("{}/{joint}", task.name()),
                    message: format!("unknown free variable '{joint}'"),
                })?;
            let q = v.get_symbol(Derivative::Position)?.expr();
            let goal = Expr::constant(target);
            let error = if v.is_continuous() {
                shortest_angular_distance(&q, &goal)
            } else {
                goal - &q
            };

            let mut reference = self.reference_velocity;
            if let Some(&max) = self.max_velocities.get(joint) {
                reference = reference.min(max);
            }
            if let Some(limit) = v.upper_limit(Derivative::Velocity, false)?.as_const() {
                reference = reference.min(limit);
            }
            task.add_equality_constraint(joint, q, error, reference, self.weight)?;
        }
        Ok(())
    }
}

fn default_reference_velocity() -> f64 {
    1.0
}

fn default_weight() -> f64 {
    1.0
}

/// Serde description of a joint goal task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointGoalConfig {
    /// Task name.
    pub name: String,

    /// Target position per joint.
    pub targets: BTreeMap<String, f64>,

    #[serde(default)]
    pub max_velocities: BTreeMap<String, f64>,

    #[serde(default = "default_reference_velocity")]
    pub reference_velocity: f64,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub start_monitors: Vec<String>,

    #[serde(default)]
    pub hold_monitors: Vec<String>,

    #[serde(default)]
    pub end_monitors: Vec<String>,
}

impl JointGoalConfig {
    /// Build the task against `variables`.
    pub fn build(&self, variables: &[FreeVariable]) -> Result<Task, MotusError> {
        let goal = self
            .targets
            .iter()
            .fold(JointPositionGoal::new(self.reference_velocity, self.weight), |g, (j, &p)| {
                g.with_target(j.clone(), p)
            });
        let goal = self
            .max_velocities
            .iter()
            .fold(goal, |g, (j, &v)| g.with_max_velocity(j.clone(), v));

        let mut task = Task::new(self.name.clone());
        goal.apply(&mut task, variables)?;
        for m in &self.start_monitors {
            task.add_start_monitor(m.clone())?;
        }
        for m in &self.hold_monitors {
            task.add_hold_monitor(m.clone())?;
        }
        for m in &self.end_monitors {
            task.add_end_monitor(m.clone())?;
        }
        Ok(task)
    }
}
