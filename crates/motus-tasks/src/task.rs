//! Tasks: named constraint groups gated by monitors.
//!
//! A [`Task`] stores its constraints ungated. Gating is applied when the
//! constraints are read back, as a pure rewrite of the quadratic weight:
//!
//! ```text
//! weight · Π start · Π hold · (1 − Π end)
//! ```
//!
//! where each factor is the 0/1 state symbol of a monitor. The last factor is
//! only present when the task has end monitors. Because the states are plain
//! symbols in the evaluation context, a monitor flip changes the weight in the
//! very tick the new state is written.

use std::collections::{BTreeMap, BTreeSet};

use motus_core::{Derivative, GoalInitializationError};
use motus_expr::{Expr, ExprMatrix, Point3, RotationMatrix, Vector3};
use motus_qp::{DerivativeConstraint, EqualityConstraint, InequalityConstraint, IntegralConstraint};

use crate::monitor::state_symbol;

const AXES: [&str; 3] = ["x", "y", "z"];

fn scalar(name: &str, expression: impl Into<ExprMatrix>) -> Result<Expr, GoalInitializationError> {
    let m = expression.into();
    m.scalar()
        .cloned()
        .ok_or_else(|| {
            let (rows, cols) = m.shape();
            GoalInitializationError::NonScalarExpression {
                name: name.to_string(),
                rows,
                cols,
            }
        })
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A named group of constraints sharing monitor gating.
#[derive(Debug, Clone, Default)]
pub struct Task {
    name: String,
    equality: BTreeMap<String, EqualityConstraint>,
    inequality: BTreeMap<String, InequalityConstraint>,
    derivative: BTreeMap<String, DerivativeConstraint>,
    start_monitors: Vec<String>,
    hold_monitors: Vec<String>,
    end_monitors: Vec<String>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}/{name}", self.name)
    }

    // -- monitors ------------------------------------------------------------

    /// The task becomes active once every start monitor is true.
    pub fn add_start_monitor(&mut self, monitor: impl Into<String>) -> Result<(), GoalInitializationError> {
        push_unique(&mut self.start_monitors, monitor.into())
    }

    /// The task is paused while any hold monitor is false.
    pub fn add_hold_monitor(&mut self, monitor: impl Into<String>) -> Result<(), GoalInitializationError> {
        push_unique(&mut self.hold_monitors, monitor.into())
    }

    /// The task is switched off once every end monitor is true.
    pub fn add_end_monitor(&mut self, monitor: impl Into<String>) -> Result<(), GoalInitializationError> {
        push_unique(&mut self.end_monitors, monitor.into())
    }

    pub fn start_monitors(&self) -> &[String] {
        &self.start_monitors
    }

    pub fn hold_monitors(&self) -> &[String] {
        &self.hold_monitors
    }

    pub fn end_monitors(&self) -> &[String] {
        &self.end_monitors
    }

    /// Monitor names the gating refers to.
    pub fn monitor_names(&self) -> impl Iterator<Item = &str> {
        self.start_monitors
            .iter()
            .chain(&self.hold_monitors)
            .chain(&self.end_monitors)
            .map(String::as_str)
    }

    /// Apply this task's gating to `weight`.
    pub fn gate(&self, weight: &Expr) -> Expr {
        let product = |names: &[String]| -> Expr {
            names
                .iter()
                .fold(Expr::one(), |acc, n| acc * state_symbol(n).expr())
        };
        let mut gated = weight * product(&self.start_monitors) * product(&self.hold_monitors);
        if !self.end_monitors.is_empty() {
            gated = gated * (1.0 - product(&self.end_monitors));
        }
        gated
    }

    // -- generic constraints -------------------------------------------------

    fn check_integral_name(&self, name: &str) -> Result<(), GoalInitializationError> {
        if self.equality.contains_key(name) || self.inequality.contains_key(name) {
            return Err(GoalInitializationError::DuplicateName {
                kind: "constraint",
                name: self.qualified(name),
            });
        }
        Ok(())
    }

    /// Register a prebuilt equality constraint under its name.
    pub fn add_equality(&mut self, constraint: EqualityConstraint) -> Result<(), GoalInitializationError> {
        self.check_integral_name(&constraint.name)?;
        self.equality.insert(constraint.name.clone(), constraint);
        Ok(())
    }

    /// Register a prebuilt inequality constraint under its name.
    pub fn add_inequality(&mut self, constraint: InequalityConstraint) -> Result<(), GoalInitializationError> {
        self.check_integral_name(&constraint.name)?;
        self.inequality.insert(constraint.name.clone(), constraint);
        Ok(())
    }

    /// Register a prebuilt derivative constraint under its name.
    pub fn add_derivative(&mut self, constraint: DerivativeConstraint) -> Result<(), GoalInitializationError> {
        if self.derivative.contains_key(&constraint.name) {
            return Err(GoalInitializationError::DuplicateName {
                kind: "derivative constraint",
                name: self.qualified(&constraint.name),
            });
        }
        constraint.validate()?;
        self.derivative.insert(constraint.name.clone(), constraint);
        Ok(())
    }

    /// Move `expression` by `bound` within one control cycle.
    pub fn add_equality_constraint(
        &mut self,
        name: &str,
        expression: impl Into<ExprMatrix>,
        bound: impl Into<Expr>,
        reference_velocity: impl Into<Expr>,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let e = scalar(name, expression)?;
        self.add_equality(EqualityConstraint::new(name, e, bound, reference_velocity, weight))
    }

    /// Keep the change of `expression` within `[lower_error, upper_error]`.
    pub fn add_inequality_constraint(
        &mut self,
        name: &str,
        expression: impl Into<ExprMatrix>,
        lower_error: impl Into<Expr>,
        upper_error: impl Into<Expr>,
        reference_velocity: impl Into<Expr>,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let e = scalar(name, expression)?;
        self.add_inequality(InequalityConstraint::new(
            name,
            e,
            lower_error,
            upper_error,
            reference_velocity,
            weight,
        ))
    }

    fn add_derivative_limit(
        &mut self,
        name: &str,
        derivative: Derivative,
        expression: impl Into<ExprMatrix>,
        max: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let e = scalar(name, expression)?;
        self.add_derivative(DerivativeConstraint::new(
            name, derivative, e, -max, max, weight, max,
        ))
    }

    /// `|d/dt expression| <= max`.
    pub fn add_velocity_limit(
        &mut self,
        name: &str,
        expression: impl Into<ExprMatrix>,
        max: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        self.add_derivative_limit(name, Derivative::Velocity, expression, max, weight)
    }

    /// `|d²/dt² expression| <= max`. Needs a controller order of at least jerk.
    pub fn add_acceleration_limit(
        &mut self,
        name: &str,
        expression: impl Into<ExprMatrix>,
        max: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        self.add_derivative_limit(name, Derivative::Acceleration, expression, max, weight)
    }

    /// `|d³/dt³ expression| <= max`. Needs a controller order of snap.
    pub fn add_jerk_limit(
        &mut self,
        name: &str,
        expression: impl Into<ExprMatrix>,
        max: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        self.add_derivative_limit(name, Derivative::Jerk, expression, max, weight)
    }

    // -- geometric helpers ---------------------------------------------------

    /// Equality per axis driving `current` onto `goal` (`{name}/x`, ...).
    pub fn add_point_goal_constraints(
        &mut self,
        name: &str,
        current: &Point3,
        goal: &Point3,
        reference_velocity: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let weight = weight.into();
        for ((axis, c), g) in AXES.iter().zip(current.components()).zip(goal.components()) {
            self.add_equality_constraint(
                &format!("{name}/{axis}"),
                c.clone(),
                g - c,
                reference_velocity,
                weight.clone(),
            )?;
        }
        Ok(())
    }

    /// Inequality per axis keeping `current` within `tolerance` of `goal`.
    pub fn add_position_constraint(
        &mut self,
        name: &str,
        current: &Point3,
        goal: &Point3,
        tolerance: f64,
        reference_velocity: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let weight = weight.into();
        for ((axis, c), g) in AXES.iter().zip(current.components()).zip(goal.components()) {
            let error = g - c;
            self.add_inequality_constraint(
                &format!("{name}/{axis}"),
                c.clone(),
                &error - tolerance,
                &error + tolerance,
                reference_velocity,
                weight.clone(),
            )?;
        }
        Ok(())
    }

    /// Equality per component driving `current` onto `goal`
    /// (`{name}/trans/x`, ...).
    pub fn add_vector_goal_constraints(
        &mut self,
        name: &str,
        current: &Vector3,
        goal: &Vector3,
        reference_velocity: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let weight = weight.into();
        for ((axis, c), g) in AXES.iter().zip(current.components()).zip(goal.components()) {
            self.add_equality_constraint(
                &format!("{name}/trans/{axis}"),
                c.clone(),
                g - c,
                reference_velocity,
                weight.clone(),
            )?;
        }
        Ok(())
    }

    /// Equality per axis rotating `current` onto `goal` (`{name}/rot/x`, ...).
    ///
    /// `current_evaluated` is the current rotation frozen to this cycle's
    /// values; the expressions are the rotation relative to it, so their
    /// Jacobian is the angular velocity while their value is zero.
    pub fn add_rotation_goal_constraints(
        &mut self,
        name: &str,
        current: &RotationMatrix,
        current_evaluated: &RotationMatrix,
        goal: &RotationMatrix,
        reference_velocity: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let weight = weight.into();
        let q_frozen = current_evaluated.to_quaternion().conjugate();
        let q_goal = goal.to_quaternion().canonical();
        let q_error = q_goal.multiply(&q_frozen).canonical();
        let q_motion = current.to_quaternion().multiply(&q_frozen);
        for ((axis, m), e) in AXES
            .iter()
            .zip(q_motion.vector_part())
            .zip(q_error.vector_part())
        {
            self.add_equality_constraint(
                &format!("{name}/rot/{axis}"),
                m * 2.0,
                e * 2.0,
                reference_velocity,
                weight.clone(),
            )?;
        }
        Ok(())
    }

    /// Per-axis velocity limit of a point (`{name}/trans/x`, ...).
    pub fn add_translational_velocity_limit(
        &mut self,
        name: &str,
        point: &Point3,
        max_velocity: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let weight = weight.into();
        for (axis, c) in AXES.iter().zip(point.components()) {
            self.add_velocity_limit(
                &format!("{name}/trans/{axis}"),
                c.clone(),
                max_velocity,
                weight.clone(),
            )?;
        }
        Ok(())
    }

    /// Per-axis angular velocity limit of a rotation (`{name}/rot/x`, ...).
    pub fn add_rotational_velocity_limit(
        &mut self,
        name: &str,
        current: &RotationMatrix,
        current_evaluated: &RotationMatrix,
        max_velocity: f64,
        weight: impl Into<Expr>,
    ) -> Result<(), GoalInitializationError> {
        let weight = weight.into();
        let q_motion = current
            .to_quaternion()
            .multiply(&current_evaluated.to_quaternion().conjugate());
        for (axis, m) in AXES.iter().zip(q_motion.vector_part()) {
            self.add_velocity_limit(
                &format!("{name}/rot/{axis}"),
                m * 2.0,
                max_velocity,
                weight.clone(),
            )?;
        }
        Ok(())
    }

    // -- gated retrieval -----------------------------------------------------

    /// Equality constraints with gated weights and `task/name` names.
    pub fn equality_constraints(&self) -> Vec<EqualityConstraint> {
        self.equality
            .values()
            .map(|c| EqualityConstraint {
                name: self.qualified(&c.name),
                quadratic_weight: self.gate(&c.quadratic_weight),
                ..c.clone()
            })
            .collect()
    }

    /// Inequality constraints with gated weights and `task/name` names.
    pub fn inequality_constraints(&self) -> Vec<InequalityConstraint> {
        self.inequality
            .values()
            .map(|c| InequalityConstraint {
                name: self.qualified(&c.name),
                quadratic_weight: self.gate(&c.quadratic_weight),
                ..c.clone()
            })
            .collect()
    }

    /// Derivative constraints with gated weights and `task/name` names.
    pub fn derivative_constraints(&self) -> Vec<DerivativeConstraint> {
        self.derivative
            .values()
            .map(|c| {
                let mut gated = c.clone();
                gated.name = self.qualified(&c.name);
                gated.quadratic_weight = self.gate(&c.quadratic_weight);
                gated
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.equality.is_empty() && self.inequality.is_empty() && self.derivative.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, name: String) -> Result<(), GoalInitializationError> {
    if list.contains(&name) {
        return Err(GoalInitializationError::DuplicateName {
            kind: "monitor",
            name,
        });
    }
    list.push(name);
    Ok(())
}

// ---------------------------------------------------------------------------
// TaskSet
// ---------------------------------------------------------------------------

/// All tasks of one motion.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) -> Result<(), GoalInitializationError> {
        if self.tasks.iter().any(|t| t.name == task.name) {
            return Err(GoalInitializationError::DuplicateName {
                kind: "task",
                name: task.name,
            });
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Every monitor name referenced by a task, sorted.
    pub fn monitor_names(&self) -> BTreeSet<&str> {
        self.tasks.iter().flat_map(Task::monitor_names).collect()
    }

    /// Gated equality and inequality constraints of every task, sorted by
    /// qualified name.
    pub fn integral_constraints(&self) -> Result<Vec<IntegralConstraint>, GoalInitializationError> {
        let mut all: Vec<IntegralConstraint> = self
            .tasks
            .iter()
            .flat_map(|t| {
                t.equality_constraints()
                    .into_iter()
                    .map(IntegralConstraint::from)
                    .chain(t.inequality_constraints().into_iter().map(IntegralConstraint::from))
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        check_sorted_unique("constraint", all.iter().map(|c| c.name.as_str()))?;
        Ok(all)
    }

    /// Gated derivative constraints of every task, sorted by qualified name.
    pub fn derivative_constraints(&self) -> Result<Vec<DerivativeConstraint>, GoalInitializationError> {
        let mut all: Vec<DerivativeConstraint> =
            self.tasks.iter().flat_map(Task::derivative_constraints).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        check_sorted_unique("derivative constraint", all.iter().map(|c| c.name.as_str()))?;
        Ok(all)
    }
}

fn check_sorted_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), GoalInitializationError> {
    let mut previous = None;
    for name in names {
        if previous == Some(name) {
            return Err(GoalInitializationError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
        previous = Some(name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use motus_expr::{EvaluationContext, Symbol};

    fn q() -> Expr {
        Symbol::new("q").expr()
    }

    #[test]
    fn ungated_weight_is_unchanged() {
        let task = Task::new("t");
        assert_eq!(task.gate(&Expr::constant(3.0)).as_const(), Some(3.0));
    }

    #[test]
    fn gating_multiplies_monitor_states() {
        let mut task = Task::new("t");
        task.add_start_monitor("s").unwrap();
        task.add_end_monitor("e").unwrap();
        let w = task.gate(&Expr::constant(2.0));

        let mut ctx = EvaluationContext::new();
        ctx.insert(state_symbol("s"), 1.0);
        ctx.insert(state_symbol("e"), 0.0);
        assert_relative_eq!(ctx.evaluate(&w).unwrap(), 2.0);
        ctx.set(&state_symbol("e"), 1.0).unwrap();
        assert_relative_eq!(ctx.evaluate(&w).unwrap(), 0.0);
        ctx.set(&state_symbol("e"), 0.0).unwrap();
        ctx.set(&state_symbol("s"), 0.0).unwrap();
        assert_relative_eq!(ctx.evaluate(&w).unwrap(), 0.0);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut task = Task::new("t");
        task.add_equality_constraint("a", q(), 0.1, 1.0, 1.0).unwrap();
        let err = task
            .add_inequality_constraint("a", q(), -0.1, 0.1, 1.0, 1.0)
            .unwrap_err();
        assert_eq!(
            err,
            GoalInitializationError::DuplicateName {
                kind: "constraint",
                name: "t/a".into(),
            }
        );
        assert!(task.add_start_monitor("m").is_ok());
        assert!(task.add_start_monitor("m").is_err());
    }

    #[test]
    fn vector_expression_is_rejected() {
        let mut task = Task::new("t");
        let v = ExprMatrix::column(vec![q(), q()]);
        let err = task.add_equality_constraint("v", v, 0.0, 1.0, 1.0).unwrap_err();
        assert!(matches!(
            err,
            GoalInitializationError::NonScalarExpression { rows: 2, cols: 1, .. }
        ));
    }

    #[test]
    fn point_goal_adds_one_constraint_per_axis() {
        let mut task = Task::new("reach");
        let current = Point3::new(q(), 0.0, 0.0);
        let goal = Point3::new(1.0, 2.0, 3.0);
        task.add_point_goal_constraints("tip", &current, &goal, 0.2, 1.0)
            .unwrap();
        let names: Vec<String> = task.equality_constraints().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["reach/tip/x", "reach/tip/y", "reach/tip/z"]);
        let y = &task.equality_constraints()[1];
        assert_eq!(y.bound.as_const(), Some(2.0));
    }

    #[test]
    fn rotation_goal_error_is_twice_the_quaternion_vector() {
        let mut task = Task::new("turn");
        let z = Vector3::new(0.0, 0.0, 1.0);
        let identity = RotationMatrix::identity();
        let goal = RotationMatrix::from_axis_angle(&z, &Expr::constant(0.4));
        task.add_rotation_goal_constraints("tip", &identity, &identity, &goal, 0.5, 1.0)
            .unwrap();
        let c = task.equality_constraints();
        assert_eq!(c[2].name, "turn/tip/rot/z");
        assert_relative_eq!(c[2].bound.as_const().unwrap(), 2.0 * 0.2_f64.sin(), epsilon = 1e-12);
        assert_relative_eq!(c[0].bound.as_const().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn task_set_sorts_and_checks_across_tasks() {
        let mut b = Task::new("b");
        b.add_equality_constraint("goal", q(), 0.1, 1.0, 1.0).unwrap();
        let mut a = Task::new("a");
        a.add_equality_constraint("goal", q(), 0.2, 1.0, 1.0).unwrap();
        a.add_velocity_limit("speed", q(), 0.5, 1.0).unwrap();

        let mut set = TaskSet::new();
        set.add(b).unwrap();
        set.add(a).unwrap();
        assert!(set.add(Task::new("a")).is_err());

        let names: Vec<String> = set
            .integral_constraints()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["a/goal", "b/goal"]);
        assert_eq!(set.derivative_constraints().unwrap()[0].name, "a/speed");
    }
}
