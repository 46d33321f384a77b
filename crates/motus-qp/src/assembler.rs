//! Horizon matrix assembler: expands free variables and constraints over the
//! prediction horizon into symbolic H, B, A and BA.
//!
//! # QP Formulation
//!
//! Decision vector x = [derivative blocks | derivative slacks | error slacks]
//! (see [`crate::layout`]).
//!
//! Cost: ½ xᵀ diag(H) x
//!
//! Subject to:
//! - Box bounds: lb ≤ x ≤ ub (B)
//! - Position limits: dt · Σ_{s≤t} v[s] within the distance to the limits
//! - Derivative links: x_d[t] − x_d[t−1] − dt · x_{d+1}[t] = 0, with the
//!   measured state standing in for x_d[−1]
//! - Derivative constraints: Jacobian rows of the constrained expression per
//!   step, closed by a dt-scaled slack
//! - Task constraints: Jacobian rows summed over the control horizon, closed
//!   by a slack scaled with dt · control_horizon

use motus_core::{Derivative, GoalInitializationError, QpError};
use motus_expr::{Expr, Symbol, jacobian, jacobian_ddot, jacobian_dot};
use tracing::debug;

use crate::constraint::{DerivativeConstraint, IntegralConstraint, resolve_control_horizon};
use crate::free_variable::FreeVariable;
use crate::layout::{
    ColumnKind, DerivativeConstraintShape, Labels, ProblemDimensions, RowKind, Topology,
    VariableShape,
};

/// Numeric settings of one assembly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonSettings {
    pub sample_period: f64,
    pub prediction_horizon: usize,
    /// Highest optimized derivative.
    pub order: Derivative,
    pub zero_final_derivatives: bool,
    pub last_state_decimals: i32,
    pub position_decimals: i32,
}

/// Symbolic QP in assembler layout. Entries of A are sparse `(row, col, value)`.
#[derive(Debug, Clone)]
pub struct SymbolicProblem {
    pub dims: ProblemDimensions,
    pub weights: Vec<Expr>,
    pub lower: Vec<Expr>,
    pub upper: Vec<Expr>,
    pub lower_a: Vec<Expr>,
    pub upper_a: Vec<Expr>,
    pub a: Vec<(usize, usize, Expr)>,
}

impl SymbolicProblem {
    /// Every expression of the problem, for symbol collection.
    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.weights
            .iter()
            .chain(&self.lower)
            .chain(&self.upper)
            .chain(&self.lower_a)
            .chain(&self.upper_a)
            .chain(self.a.iter().map(|(_, _, e)| e))
    }
}

/// Expands a sorted variable/constraint set over the prediction horizon.
pub struct HorizonAssembler<'a> {
    free_variables: &'a [FreeVariable],
    constraints: &'a [IntegralConstraint],
    derivative_constraints: &'a [DerivativeConstraint],
    settings: HorizonSettings,
    control_horizons: Vec<usize>,
    topology: Topology,
}

impl<'a> HorizonAssembler<'a> {
    /// Validate inputs and lay out the problem.
    pub fn new(
        free_variables: &'a [FreeVariable],
        constraints: &'a [IntegralConstraint],
        derivative_constraints: &'a [DerivativeConstraint],
        settings: HorizonSettings,
    ) -> Result<Self, QpError> {
        let n = settings.prediction_horizon;
        let control_horizons = constraints
            .iter()
            .map(|c| resolve_control_horizon(&c.name, c.control_horizon, n))
            .collect::<Result<Vec<_>, _>>()?;

        let mut derivative_control_horizons = Vec::with_capacity(derivative_constraints.len());
        for c in derivative_constraints {
            c.validate()?;
            let needed = match c.derivative {
                Derivative::Acceleration => Some(Derivative::Jerk),
                Derivative::Jerk => Some(Derivative::Snap),
                _ => None,
            };
            if let Some(needed) = needed {
                if settings.order < needed {
                    return Err(GoalInitializationError::Unsupported {
                        name: c.name.clone(),
                        message: format!(
                            "{} constraints need a controller order of at least {needed}",
                            c.derivative
                        ),
                    }
                    .into());
                }
            }
            derivative_control_horizons.push(resolve_control_horizon(&c.name, c.control_horizon, n)?);
        }

        let variable_shapes: Vec<VariableShape> = free_variables
            .iter()
            .map(|v| VariableShape {
                order: v.order(),
                has_position_limits: v.has_position_limits(),
            })
            .collect();
        let derivative_shapes: Vec<DerivativeConstraintShape> = derivative_constraints
            .iter()
            .zip(&derivative_control_horizons)
            .map(|(c, &ch)| DerivativeConstraintShape {
                derivative: c.derivative,
                control_horizon: ch,
            })
            .collect();
        let topology = Topology::compute(
            &variable_shapes,
            &derivative_shapes,
            constraints.len(),
            n,
            settings.order,
        );
        debug!(
            width = topology.dimensions().width,
            height = topology.dimensions().height,
            order = %settings.order,
            "laid out horizon problem"
        );

        Ok(Self {
            free_variables,
            constraints,
            derivative_constraints,
            settings,
            control_horizons,
            topology,
        })
    }

    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    pub const fn dimensions(&self) -> ProblemDimensions {
        self.topology.dimensions()
    }

    /// Control horizons of the task constraints after clamping.
    pub fn control_horizons(&self) -> &[usize] {
        &self.control_horizons
    }

    /// Column and row labels.
    pub fn labels(&self) -> Labels {
        let vars: Vec<&str> = self.free_variables.iter().map(FreeVariable::name).collect();
        let dcs: Vec<&str> = self
            .derivative_constraints
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let tcs: Vec<&str> = self.constraints.iter().map(|c| c.name.as_str()).collect();
        Labels::new(&self.topology, &vars, &dcs, &tcs)
    }

    /// Fill H, B, A and BA. With `default_limits`, position rows of variables
    /// outside their limits are replaced by a reachable corridor.
    pub fn assemble(&self, default_limits: bool) -> Result<SymbolicProblem, QpError> {
        let dims = self.topology.dimensions();
        let (weights, lower, upper) = self.column_data()?;
        let mut lower_a = Vec::with_capacity(dims.height);
        let mut upper_a = Vec::with_capacity(dims.height);
        let mut a = Vec::new();

        for (row, kind) in self.topology.rows().iter().enumerate() {
            let (lb, ub) = match *kind {
                RowKind::PositionLimit { variable, step } => {
                    self.position_row(row, variable, step, default_limits, &mut a)?
                }
                RowKind::Link {
                    variable,
                    derivative,
                    step,
                } => self.link_row(row, variable, derivative, step, &mut a)?,
                RowKind::DerivativeConstraint { constraint, step } => {
                    self.derivative_constraint_row(row, constraint, step, &mut a)?
                }
                RowKind::TaskError { constraint } => self.task_row(row, constraint, &mut a)?,
            };
            lower_a.push(lb);
            upper_a.push(ub);
        }

        Ok(SymbolicProblem {
            dims,
            weights,
            lower,
            upper,
            lower_a,
            upper_a,
            a,
        })
    }

    // -- columns -------------------------------------------------------------

    fn column_data(&self) -> Result<(Vec<Expr>, Vec<Expr>, Vec<Expr>), QpError> {
        let n = self.settings.prediction_horizon;
        let order = self.settings.order;
        let width = self.topology.dimensions().width;
        let mut weights = Vec::with_capacity(width);
        let mut lower = Vec::with_capacity(width);
        let mut upper = Vec::with_capacity(width);

        for column in self.topology.columns() {
            match *column {
                ColumnKind::Variable {
                    variable,
                    derivative,
                    step,
                } => {
                    let v = &self.free_variables[variable];
                    weights.push(v.normalized_weight(step, derivative, n)?);
                    let zero_tail = self.settings.zero_final_derivatives
                        && n > 2
                        && step == n - 1
                        && derivative < v.order().min(order);
                    if zero_tail {
                        lower.push(Expr::zero());
                        upper.push(Expr::zero());
                    } else {
                        lower.push(v.lower_limit(derivative, true)?);
                        upper.push(v.upper_limit(derivative, true)?);
                    }
                }
                ColumnKind::DerivativeSlack { constraint, step } => {
                    let c = &self.derivative_constraints[constraint];
                    weights.push(c.normalized_weight(step));
                    lower.push(c.lower_slack_limit.at(step));
                    upper.push(c.upper_slack_limit.at(step));
                }
                ColumnKind::ErrorSlack { constraint } => {
                    let c = &self.constraints[constraint];
                    weights.push(c.normalized_weight());
                    lower.push(c.lower_slack_limit.clone());
                    upper.push(c.upper_slack_limit.clone());
                }
            }
        }
        Ok((weights, lower, upper))
    }

    // -- rows ----------------------------------------------------------------

    fn position_row(
        &self,
        row: usize,
        variable: usize,
        step: usize,
        default_limits: bool,
        a: &mut Vec<(usize, usize, Expr)>,
    ) -> Result<(Expr, Expr), QpError> {
        let dt = self.settings.sample_period;
        let v = &self.free_variables[variable];
        for s in 0..=step {
            let col = self.column(variable, Derivative::Velocity, s, v.name())?;
            a.push((row, col, Expr::constant(dt)));
        }

        let position = v.get_symbol(Derivative::Position)?.expr();
        let decimals = self.settings.position_decimals;
        let normal_lower = (v.lower_limit(Derivative::Position, false)? - &position).round_up(decimals);
        let normal_upper = (v.upper_limit(Derivative::Position, false)? - &position).round_down(decimals);
        if !default_limits {
            return Ok((normal_lower, normal_upper));
        }

        let effective = v.order().min(self.settings.order);
        let vel_lower = v.lower_limit(Derivative::Velocity, false)? * dt;
        let vel_upper = v.upper_limit(Derivative::Velocity, false)? * dt;
        let (lower_vel, upper_vel) = if effective >= Derivative::Jerk {
            (
                vel_upper.min(&(v.upper_limit(Derivative::Jerk, false)? * dt.powi(3))),
                vel_lower.max(&(v.lower_limit(Derivative::Jerk, false)? * dt.powi(3))),
            )
        } else if effective >= Derivative::Acceleration {
            (
                vel_upper.min(&(v.upper_limit(Derivative::Acceleration, false)? * dt.powi(2))),
                vel_lower.max(&(v.lower_limit(Derivative::Acceleration, false)? * dt.powi(2))),
            )
        } else {
            (vel_upper, vel_lower)
        };
        let lower = Expr::if_greater_zero(&normal_lower, &lower_vel, &normal_lower);
        let upper = Expr::if_greater_zero(&(-&normal_upper), &upper_vel, &normal_upper);
        Ok((lower, upper))
    }

    fn link_row(
        &self,
        row: usize,
        variable: usize,
        derivative: Derivative,
        step: usize,
        a: &mut Vec<(usize, usize, Expr)>,
    ) -> Result<(Expr, Expr), QpError> {
        let dt = self.settings.sample_period;
        let v = &self.free_variables[variable];
        let next = derivative.next().ok_or_else(|| {
            QpError::Build(format!("no derivative above {derivative} for '{}'", v.name()))
        })?;
        a.push((row, self.column(variable, derivative, step, v.name())?, Expr::one()));
        a.push((row, self.column(variable, next, step, v.name())?, Expr::constant(-dt)));
        if step == 0 {
            let current = v.get_symbol(derivative)?.expr();
            let decimals = self.settings.last_state_decimals;
            Ok((current.round_down(decimals), current.round_up(decimals)))
        } else {
            a.push((
                row,
                self.column(variable, derivative, step - 1, v.name())?,
                Expr::constant(-1.0),
            ));
            Ok((Expr::zero(), Expr::zero()))
        }
    }

    fn derivative_constraint_row(
        &self,
        row: usize,
        constraint: usize,
        step: usize,
        a: &mut Vec<(usize, usize, Expr)>,
    ) -> Result<(Expr, Expr), QpError> {
        let dt = self.settings.sample_period;
        let c = &self.derivative_constraints[constraint];
        for (col_derivative, entries) in self.derivative_constraint_blocks(c)? {
            self.place_jacobian(row, &c.name, col_derivative, step, &entries, dt, a)?;
        }

        let slack = self.slack_column(ColumnKind::DerivativeSlack { constraint, step })?;
        a.push((row, slack, Expr::constant(dt)));

        let bound = &c.normalization_factor * dt;
        let lower = (c.lower_limit.at(step) * dt).limit(&(-&bound), &bound);
        let upper = (c.upper_limit.at(step) * dt).limit(&(-&bound), &bound);
        Ok((lower, upper))
    }

    fn task_row(
        &self,
        row: usize,
        constraint: usize,
        a: &mut Vec<(usize, usize, Expr)>,
    ) -> Result<(Expr, Expr), QpError> {
        let dt = self.settings.sample_period;
        let c = &self.constraints[constraint];
        let ch = self.control_horizons[constraint];
        let exprs = std::slice::from_ref(&c.expression);
        for o in Derivative::range(Derivative::Position, self.below_order()) {
            let Some(col_derivative) = o.next() else { continue };
            let j = jacobian(exprs, &self.symbols(o)?).swap_remove(0);
            for step in 0..ch {
                self.place_jacobian(row, &c.name, col_derivative, step, &j, dt, a)?;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let horizon_scale = dt * ch as f64;
        let slack = self.slack_column(ColumnKind::ErrorSlack { constraint })?;
        a.push((row, slack, Expr::constant(horizon_scale)));

        let bound = &c.reference_velocity * horizon_scale;
        let lower = c.lower_error.limit(&(-&bound), &bound);
        let upper = c.upper_error.limit(&(-&bound), &bound);
        Ok((lower, upper))
    }

    // -- helpers -------------------------------------------------------------

    /// Per-variable Jacobian entries of a derivative constraint, grouped by the
    /// derivative block they multiply.
    fn derivative_constraint_blocks(
        &self,
        c: &DerivativeConstraint,
    ) -> Result<Vec<(Derivative, Vec<Expr>)>, QpError> {
        let exprs = std::slice::from_ref(&c.expression);
        let q = self.symbols(Derivative::Position)?;
        let qd = self.symbols(Derivative::Velocity)?;
        let qdd = self.symbols(Derivative::Acceleration)?;
        let first = |m: Vec<Vec<Expr>>| m.into_iter().next().unwrap_or_default();

        let blocks = match c.derivative {
            Derivative::Velocity => {
                let mut blocks = Vec::new();
                for o in Derivative::range(Derivative::Position, self.below_order()) {
                    if let Some(col) = o.next() {
                        blocks.push((col, first(jacobian(exprs, &self.symbols(o)?))));
                    }
                }
                blocks
            }
            Derivative::Acceleration => {
                let j_q = first(jacobian(exprs, &q));
                let j_qd = first(jacobian(exprs, &qd));
                let jd_q = first(jacobian_dot(exprs, &q, &qd));
                let jd_qd = first(jacobian_dot(exprs, &qd, &qdd));
                vec![
                    (Derivative::Velocity, jd_q),
                    (Derivative::Acceleration, add(&j_q, &jd_qd)),
                    (Derivative::Jerk, j_qd),
                ]
            }
            Derivative::Jerk => {
                let qddd = self.symbols(Derivative::Jerk)?;
                let j_q = first(jacobian(exprs, &q));
                let j_qd = first(jacobian(exprs, &qd));
                let jd_q = first(jacobian_dot(exprs, &q, &qd));
                let jd_qd = first(jacobian_dot(exprs, &qd, &qdd));
                let jdd_q = first(jacobian_ddot(exprs, &q, &qd, &qdd));
                let jdd_qd = first(jacobian_ddot(exprs, &qd, &qdd, &qddd));
                vec![
                    (Derivative::Velocity, jdd_q),
                    (Derivative::Acceleration, add(&scale(&jd_q, 2.0), &jdd_qd)),
                    (Derivative::Jerk, add(&j_q, &scale(&jd_qd, 2.0))),
                    (Derivative::Snap, j_qd),
                ]
            }
            other => {
                return Err(QpError::Build(format!(
                    "'{}': no derivative constraints on {other}",
                    c.name
                )));
            }
        };
        Ok(blocks)
    }

    /// Write `entries[v] * dt` into the `col_derivative` column of each
    /// variable at `step`. Structural zeros are skipped.
    #[allow(clippy::too_many_arguments)]
    fn place_jacobian(
        &self,
        row: usize,
        constraint: &str,
        col_derivative: Derivative,
        step: usize,
        entries: &[Expr],
        dt: f64,
        a: &mut Vec<(usize, usize, Expr)>,
    ) -> Result<(), QpError> {
        for (variable, entry) in entries.iter().enumerate() {
            if entry.is_zero() {
                continue;
            }
            let col = self
                .topology
                .variable_column(variable, col_derivative, step)
                .ok_or_else(|| {
                    QpError::Build(format!(
                        "constraint '{constraint}' depends on the {col_derivative} of '{}', which is not optimized",
                        self.free_variables[variable].name()
                    ))
                })?;
            a.push((row, col, entry * dt));
        }
        Ok(())
    }

    /// Highest derivative whose symbols feed a Jacobian block: one below the
    /// controller order.
    fn below_order(&self) -> Derivative {
        self.settings.order.prev().unwrap_or(Derivative::Position)
    }

    fn symbols(&self, derivative: Derivative) -> Result<Vec<Symbol>, QpError> {
        self.free_variables
            .iter()
            .map(|v| v.get_symbol(derivative).cloned().map_err(QpError::from))
            .collect()
    }

    fn column(&self, variable: usize, derivative: Derivative, step: usize, name: &str) -> Result<usize, QpError> {
        self.topology
            .variable_column(variable, derivative, step)
            .ok_or_else(|| QpError::Build(format!("no {derivative} column for '{name}' at step {step}")))
    }

    fn slack_column(&self, kind: ColumnKind) -> Result<usize, QpError> {
        // Slack columns follow the non-slack prefix in row order, so a linear
        // scan from the prefix end finds them.
        let dims = self.topology.dimensions();
        self.topology.columns()[dims.num_non_slack..]
            .iter()
            .position(|c| *c == kind)
            .map(|i| i + dims.num_non_slack)
            .ok_or_else(|| QpError::Build(format!("missing slack column {kind:?}")))
    }
}

fn add(a: &[Expr], b: &[Expr]) -> Vec<Expr> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn scale(a: &[Expr], factor: f64) -> Vec<Expr> {
    a.iter().map(|x| x * factor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::EqualityConstraint;
    use approx::assert_relative_eq;

    fn settings(n: usize, order: Derivative) -> HorizonSettings {
        HorizonSettings {
            sample_period: 0.1,
            prediction_horizon: n,
            order,
            zero_final_derivatives: true,
            last_state_decimals: 5,
            position_decimals: 10,
        }
    }

    fn joint(name: &str) -> FreeVariable {
        FreeVariable::builder(name)
            .limits(Derivative::Position, -1.0, 1.0)
            .symmetric_limit(Derivative::Velocity, 1.0)
            .symmetric_limit(Derivative::Acceleration, 5.0)
            .symmetric_limit(Derivative::Jerk, 30.0)
            .weight(Derivative::Velocity, 1.0)
            .build()
            .unwrap()
    }

    fn entry(p: &SymbolicProblem, row: usize, col: usize) -> Option<f64> {
        p.a.iter()
            .filter(|(r, c, _)| *r == row && *c == col)
            .map(|(_, _, e)| e.as_const().unwrap())
            .reduce(|a, b| a + b)
    }

    #[test]
    fn dimension_invariant_holds() {
        let vars = vec![joint("a"), joint("b")];
        let goal: IntegralConstraint =
            EqualityConstraint::new("g", vars[0].get_symbol(Derivative::Position).unwrap().expr(), 0.1, 1.0, 1.0)
                .into();
        let cons = vec![goal];
        let asm = HorizonAssembler::new(&vars, &cons, &[], settings(4, Derivative::Jerk)).unwrap();
        let p = asm.assemble(false).unwrap();
        let dims = p.dims;
        assert_eq!(p.weights.len(), dims.width);
        assert_eq!(p.lower.len(), dims.width);
        assert_eq!(p.upper.len(), dims.width);
        assert_eq!(p.lower_a.len(), dims.height);
        assert_eq!(p.upper_a.len(), dims.height);
        assert!(p.a.iter().all(|(r, c, _)| *r < dims.height && *c < dims.width));
    }

    #[test]
    fn position_rows_integrate_velocity() {
        let vars = vec![joint("a")];
        let asm = HorizonAssembler::new(&vars, &[], &[], settings(3, Derivative::Velocity)).unwrap();
        let p = asm.assemble(false).unwrap();
        // row 2 = step 2 sums velocity columns 0..=2
        for col in 0..3 {
            assert_relative_eq!(entry(&p, 2, col).unwrap(), 0.1);
        }
        assert!(entry(&p, 0, 1).is_none());
    }

    #[test]
    fn link_rows_chain_derivatives() {
        let vars = vec![joint("a")];
        let asm =
            HorizonAssembler::new(&vars, &[], &[], settings(2, Derivative::Acceleration)).unwrap();
        let p = asm.assemble(false).unwrap();
        let t = asm.topology();
        let v0 = t.variable_column(0, Derivative::Velocity, 0).unwrap();
        let v1 = t.variable_column(0, Derivative::Velocity, 1).unwrap();
        let a1 = t.variable_column(0, Derivative::Acceleration, 1).unwrap();
        // rows: 2 position, then link t0, link t1
        let link1 = 3;
        assert_relative_eq!(entry(&p, link1, v1).unwrap(), 1.0);
        assert_relative_eq!(entry(&p, link1, v0).unwrap(), -1.0);
        assert_relative_eq!(entry(&p, link1, a1).unwrap(), -0.1);
        assert!(p.lower_a[link1].is_zero());
    }

    #[test]
    fn last_step_bounds_are_zeroed() {
        let vars = vec![joint("a")];
        let asm = HorizonAssembler::new(&vars, &[], &[], settings(3, Derivative::Jerk)).unwrap();
        let p = asm.assemble(false).unwrap();
        let t = asm.topology();
        let v_last = t.variable_column(0, Derivative::Velocity, 2).unwrap();
        let j_last = t.variable_column(0, Derivative::Jerk, 2).unwrap();
        assert!(p.upper[v_last].is_zero());
        assert_eq!(p.upper[j_last].as_const(), Some(30.0));
    }

    #[test]
    fn task_row_spans_control_horizon() {
        let vars = vec![joint("a")];
        let q = vars[0].get_symbol(Derivative::Position).unwrap().expr();
        let cons: Vec<IntegralConstraint> = vec![
            EqualityConstraint::new("g", q * 2.0, 0.5, 1.0, 1.0)
                .with_control_horizon(2)
                .into(),
        ];
        let asm = HorizonAssembler::new(&vars, &cons, &[], settings(4, Derivative::Velocity)).unwrap();
        let p = asm.assemble(false).unwrap();
        let row = p.dims.height - 1;
        assert_relative_eq!(entry(&p, row, 0).unwrap(), 0.2);
        assert_relative_eq!(entry(&p, row, 1).unwrap(), 0.2);
        assert!(entry(&p, row, 2).is_none());
        let slack = p.dims.width - 1;
        assert_relative_eq!(entry(&p, row, slack).unwrap(), 0.2);
        // bound clipped to reference velocity * dt * ch
        assert_relative_eq!(p.upper_a[row].as_const().unwrap(), 0.2);
    }

    #[test]
    fn acceleration_constraint_needs_jerk_order() {
        let vars = vec![joint("a")];
        let q = vars[0].get_symbol(Derivative::Position).unwrap().expr();
        let dc = vec![DerivativeConstraint::new(
            "acc",
            Derivative::Acceleration,
            q,
            -1.0,
            1.0,
            1.0,
            1.0,
        )];
        let err = HorizonAssembler::new(&vars, &[], &dc, settings(3, Derivative::Acceleration))
            .err()
            .unwrap();
        assert!(matches!(err, QpError::Goal(_)));
    }

    #[test]
    fn default_limits_replace_violated_lower_bound() {
        let vars = vec![joint("a")];
        let asm = HorizonAssembler::new(&vars, &[], &[], settings(3, Derivative::Jerk)).unwrap();
        let p = asm.assemble(true).unwrap();
        let pos = vars[0].get_symbol(Derivative::Position).unwrap().clone();
        let lb = motus_expr::CompiledFunction::compile_dense(&[p.lower_a[0].clone()], &[pos]).unwrap();
        // below the lower limit: corridor min(1 * 0.1, 30 * 0.001)
        assert_relative_eq!(lb.evaluate(&[-1.5]).unwrap()[0], 0.03, epsilon = 1e-12);
        // inside the limits: unchanged
        assert_relative_eq!(lb.evaluate(&[0.0]).unwrap()[0], -1.0, epsilon = 1e-12);
    }
}
