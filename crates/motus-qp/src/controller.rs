//! QP solve controller: owns the compiled problem and a backend and turns
//! live substitutions into next-step commands.
//!
//! # Tick state machine
//!
//! 1. Evaluate the compiled problem.
//! 2. Filter gated slacks and their rows.
//! 3. Solve. A solution whose slacks leave their bounds is a hard violation.
//! 4. On solver failure, retry once with widened slack bounds (bounded budget)
//!    and reweighted violating slacks.
//! 5. If that fails too: a joint outside its position limits switches to the
//!    default-limits variant; anything else is diagnosed with generously
//!    bounded slacks and the original error is returned.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use motus_core::{
    Derivative, GoalInitializationError, MotusError, QpControllerConfig, QpError, QpSolverError,
};
use motus_expr::{Binding, EvaluationContext, Expr, Symbol};
use nalgebra::DVector;
use tracing::{debug, error, info, warn};

use crate::assembler::{HorizonAssembler, HorizonSettings};
use crate::backend::{BackendRegistry, QpBackend};
use crate::compiled::{CompiledProblem, DebugExpressions, EvaluatedProblem};
use crate::constraint::{DerivativeConstraint, IntegralConstraint};
use crate::free_variable::FreeVariable;
use crate::layout::{ColumnKind, Labels, ProblemDimensions, RowKind, Topology};
use crate::problem::{FilteredProblem, QpProblem};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one backend solve.
#[derive(Debug)]
pub enum SolveOutcome {
    Solved(DVector<f64>),
    /// The backend failed; a relaxed retry may still succeed.
    Relaxable(QpSolverError),
    /// A solution exists but breaks a hard bound.
    Hard(QpError),
}

/// First-step commands per free variable, plus the full decision vector.
#[derive(Debug, Clone, PartialEq)]
pub struct NextCommands {
    names: Vec<String>,
    values: Vec<BTreeMap<Derivative, f64>>,
    solution: DVector<f64>,
}

impl NextCommands {
    /// First-step value of `derivative` for `variable`.
    pub fn get(&self, variable: &str, derivative: Derivative) -> Option<f64> {
        let i = self
            .names
            .binary_search_by(|n| n.as_str().cmp(variable))
            .ok()?;
        self.values[i].get(&derivative).copied()
    }

    pub fn velocity(&self, variable: &str) -> Option<f64> {
        self.get(variable, Derivative::Velocity)
    }

    /// `(variable, derivative values)` sorted by variable name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<Derivative, f64>)> {
        self.names.iter().map(String::as_str).zip(&self.values)
    }

    /// Full decision vector in column order.
    pub const fn solution(&self) -> &DVector<f64> {
        &self.solution
    }
}

/// Counters since build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStatistics {
    pub ticks: u64,
    pub relaxed_attempts: u64,
    pub default_limit_swaps: u64,
    pub last_solve_time: Duration,
}

// ---------------------------------------------------------------------------
// QpController
// ---------------------------------------------------------------------------

/// Horizon QP controller.
pub struct QpController {
    config: QpControllerConfig,
    free_variables: Vec<FreeVariable>,
    constraints: Vec<IntegralConstraint>,
    derivative_constraints: Vec<DerivativeConstraint>,
    settings: HorizonSettings,
    topology: Topology,
    labels: Labels,
    /// Constraint name owning each slack column, indexed from the prefix end.
    slack_owners: Vec<String>,
    /// Position range `upper - lower` of each position-limit row.
    position_ranges: Vec<f64>,
    compiled: CompiledProblem,
    default_limits: Option<CompiledProblem>,
    debug: Option<DebugExpressions>,
    debug_values: Vec<(String, f64)>,
    backend: Box<dyn QpBackend>,
    retries_left: u32,
    statistics: ControllerStatistics,
    binding: Option<Binding>,
    debug_binding: Option<Binding>,
    args: Vec<f64>,
}

impl std::fmt::Debug for QpController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QpController")
            .field("dimensions", &self.dimensions())
            .field("order", &self.settings.order)
            .field("backend", &self.backend.kind())
            .field("retries_left", &self.retries_left)
            .finish_non_exhaustive()
    }
}

impl QpController {
    /// Build with the built-in backends.
    pub fn build(
        config: QpControllerConfig,
        free_variables: Vec<FreeVariable>,
        constraints: Vec<IntegralConstraint>,
        derivative_constraints: Vec<DerivativeConstraint>,
        debug_expressions: Vec<(String, Expr)>,
    ) -> Result<Self, MotusError> {
        Self::build_with_registry(
            config,
            free_variables,
            constraints,
            derivative_constraints,
            debug_expressions,
            &BackendRegistry::with_builtins(),
        )
    }

    /// Sort, validate, assemble and compile; then pick the backend.
    pub fn build_with_registry(
        config: QpControllerConfig,
        mut free_variables: Vec<FreeVariable>,
        mut constraints: Vec<IntegralConstraint>,
        mut derivative_constraints: Vec<DerivativeConstraint>,
        debug_expressions: Vec<(String, Expr)>,
        registry: &BackendRegistry,
    ) -> Result<Self, MotusError> {
        config.validate()?;
        if free_variables.is_empty() {
            return Err(QpError::from(QpSolverError::NoFreeVariables).into());
        }

        free_variables.sort_by(|a, b| a.name().cmp(b.name()));
        constraints.sort_by(|a, b| a.name.cmp(&b.name));
        derivative_constraints.sort_by(|a, b| a.name.cmp(&b.name));
        ensure_unique("free variable", free_variables.iter().map(FreeVariable::name))?;
        ensure_unique("constraint", constraints.iter().map(|c| c.name.as_str()))?;
        ensure_unique(
            "derivative constraint",
            derivative_constraints.iter().map(|c| c.name.as_str()),
        )?;

        let n = config.prediction_horizon;
        let max_variable_order = free_variables
            .iter()
            .map(FreeVariable::order)
            .max()
            .unwrap_or(Derivative::Velocity);
        let horizon_cap = Derivative::from_index(n + 1).unwrap_or(Derivative::Snap);
        let order = config.max_derivative.min(max_variable_order).min(horizon_cap);

        let settings = HorizonSettings {
            sample_period: config.sample_period,
            prediction_horizon: n,
            order,
            zero_final_derivatives: config.zero_final_derivatives,
            last_state_decimals: config.last_state_decimals,
            position_decimals: config.position_decimals,
        };

        let assembler =
            HorizonAssembler::new(&free_variables, &constraints, &derivative_constraints, settings)?;
        let topology = assembler.topology().clone();
        let labels = assembler.labels();
        let symbolic = assembler.assemble(false)?;
        let exprs: Vec<Expr> = symbolic.expressions().cloned().collect();
        let params = motus_expr::free_symbols(&exprs);
        let compiled = CompiledProblem::compile(&symbolic, &params)?;

        let dims = topology.dimensions();
        let slack_owners = topology.columns()[dims.num_non_slack..]
            .iter()
            .map(|c| match *c {
                ColumnKind::DerivativeSlack { constraint, .. } => {
                    derivative_constraints[constraint].name.clone()
                }
                ColumnKind::ErrorSlack { constraint } => constraints[constraint].name.clone(),
                ColumnKind::Variable { .. } => String::new(),
            })
            .collect();
        let position_ranges = topology.rows()[..dims.num_position_rows]
            .iter()
            .map(|r| match *r {
                RowKind::PositionLimit { variable, .. } => position_range(&free_variables[variable]),
                _ => Ok(0.0),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let debug = if debug_expressions.is_empty() {
            None
        } else {
            Some(DebugExpressions::compile(debug_expressions)?)
        };

        let backend = registry
            .create(config.backend, &config.solver)
            .map_err(QpError::from)?;

        info!(
            variables = free_variables.len(),
            constraints = constraints.len(),
            derivative_constraints = derivative_constraints.len(),
            width = dims.width,
            height = dims.height,
            order = %order,
            backend = %config.backend,
            "built qp controller"
        );

        Ok(Self {
            retries_left: config.retries_with_relaxed_constraints,
            config,
            free_variables,
            constraints,
            derivative_constraints,
            settings,
            topology,
            labels,
            slack_owners,
            position_ranges,
            compiled,
            default_limits: None,
            debug,
            debug_values: Vec::new(),
            backend,
            statistics: ControllerStatistics::default(),
            binding: None,
            debug_binding: None,
            args: Vec::new(),
        })
    }

    // -- accessors -----------------------------------------------------------

    pub const fn config(&self) -> &QpControllerConfig {
        &self.config
    }

    pub const fn dimensions(&self) -> ProblemDimensions {
        self.topology.dimensions()
    }

    /// Highest optimized derivative.
    pub const fn order(&self) -> Derivative {
        self.settings.order
    }

    /// Free variables sorted by name.
    pub fn free_variables(&self) -> &[FreeVariable] {
        &self.free_variables
    }

    /// Parameter order expected by [`tick_with`](Self::tick_with).
    pub fn parameters(&self) -> &[Symbol] {
        self.compiled.params()
    }

    pub fn column_labels(&self) -> &[String] {
        &self.labels.columns
    }

    pub fn row_labels(&self) -> &[String] {
        &self.labels.rows
    }

    /// Debug expression values from the last [`tick`](Self::tick).
    pub fn debug_values(&self) -> &[(String, f64)] {
        &self.debug_values
    }

    pub const fn statistics(&self) -> ControllerStatistics {
        self.statistics
    }

    pub const fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Restore the relaxed-retry budget.
    pub fn reset_retries(&mut self) {
        self.retries_left = self.config.retries_with_relaxed_constraints;
    }

    // -- ticking -------------------------------------------------------------

    /// Solve one control cycle with values from `ctx`.
    ///
    /// Parameter slots are resolved once per context and reused while the
    /// same context is passed in.
    pub fn tick(&mut self, ctx: &EvaluationContext) -> Result<NextCommands, QpError> {
        let binding = ctx.rebind(self.binding.take(), self.compiled.params())?;
        let mut args = std::mem::take(&mut self.args);
        ctx.gather(&binding, &mut args);
        self.binding = Some(binding);

        self.update_debug_values(ctx)?;
        let result = self.tick_with(&args);
        self.args = args;
        result
    }

    /// Solve one control cycle with `args` in [`parameters`](Self::parameters)
    /// order.
    pub fn tick_with(&mut self, args: &[f64]) -> Result<NextCommands, QpError> {
        self.statistics.ticks += 1;
        let start = Instant::now();
        let evaluated = self.compiled.evaluate(args)?;
        let result = self.solve_evaluated(&evaluated, args);
        self.statistics.last_solve_time = start.elapsed();
        Ok(self.commands(result?))
    }

    fn update_debug_values(&mut self, ctx: &EvaluationContext) -> Result<(), QpError> {
        let Some(debug) = &self.debug else {
            return Ok(());
        };
        let binding = ctx.rebind(self.debug_binding.take(), debug.params())?;
        let mut args = Vec::with_capacity(binding.len());
        ctx.gather(&binding, &mut args);
        self.debug_binding = Some(binding);
        self.debug_values = debug.evaluate(&args)?;
        Ok(())
    }

    fn commands(&self, solution: DVector<f64>) -> NextCommands {
        let order = self.settings.order;
        let values = self
            .free_variables
            .iter()
            .enumerate()
            .map(|(i, v)| {
                Derivative::range(Derivative::Velocity, v.order().min(order))
                    .filter_map(|d| {
                        self.topology
                            .variable_column(i, d, 0)
                            .map(|col| (d, solution[col]))
                    })
                    .collect()
            })
            .collect();
        NextCommands {
            names: self.free_variables.iter().map(|v| v.name().to_string()).collect(),
            values,
            solution,
        }
    }

    // -- solving -------------------------------------------------------------

    fn solve_evaluated(
        &mut self,
        problem: &EvaluatedProblem,
        args: &[f64],
    ) -> Result<DVector<f64>, QpError> {
        let dims = self.dimensions();
        let filtered = FilteredProblem::new(problem, dims);
        let original = match self.solve_filtered(&filtered) {
            SolveOutcome::Solved(x) => return Ok(filtered.expand(&x, dims.width)),
            SolveOutcome::Hard(e) => return Err(e),
            SolveOutcome::Relaxable(e) => e,
        };

        match self.retry_relaxed(&filtered, original) {
            Ok(x) => Ok(filtered.expand(&x, dims.width)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => self.recover(problem, args, e),
        }
    }

    fn solve_filtered(&mut self, filtered: &FilteredProblem) -> SolveOutcome {
        match self.backend.solve(&QpProblem::from_filtered(filtered)) {
            Ok(x) => {
                if let Err(e) = self.check_variable_bounds(filtered, &x) {
                    return SolveOutcome::Hard(e);
                }
                let violated = self.slack_violations(filtered, &x);
                if violated.is_empty() {
                    SolveOutcome::Solved(x)
                } else {
                    SolveOutcome::Hard(QpError::HardConstraintsViolated(
                        self.describe_slacks(filtered, &violated),
                    ))
                }
            }
            Err(e) => SolveOutcome::Relaxable(e),
        }
    }

    /// Widen every slack bound, solve, reweight slacks that left their
    /// original bounds and solve again.
    fn retry_relaxed(
        &mut self,
        filtered: &FilteredProblem,
        original: QpSolverError,
    ) -> Result<DVector<f64>, QpError> {
        if self.retries_left == 0 {
            return Err(QpError::HardConstraintsViolated(format!(
                "Out of retries with relaxed hard constraints: {original}"
            )));
        }
        self.retries_left -= 1;
        self.statistics.relaxed_attempts += 1;
        info!(
            retries_left = self.retries_left,
            "{original}; retrying with relaxed hard constraints"
        );

        let added = self.config.retry_added_slack;
        let mut relaxed = filtered.clone();
        for i in relaxed.slack_columns() {
            relaxed.lower[i] -= added;
            relaxed.upper[i] += added;
        }
        let Ok(x) = self.backend.solve(&QpProblem::from_filtered(&relaxed)) else {
            return Err(original.into());
        };
        self.check_variable_bounds(filtered, &x)?;
        let violated = self.slack_violations(filtered, &x);
        if violated.is_empty() {
            return Ok(x);
        }

        for &i in &violated {
            relaxed.weights[i] *= self.config.retry_weight_factor;
        }
        let Ok(x) = self.backend.solve(&QpProblem::from_filtered(&relaxed)) else {
            return Err(original.into());
        };
        self.check_variable_bounds(filtered, &x)?;
        let violated = self.slack_violations(filtered, &x);
        if violated.is_empty() {
            Ok(x)
        } else {
            Err(QpError::HardConstraintsViolated(
                self.describe_slacks(filtered, &violated),
            ))
        }
    }

    fn recover(
        &mut self,
        problem: &EvaluatedProblem,
        args: &[f64],
        original: QpError,
    ) -> Result<DVector<f64>, QpError> {
        if self.outside_position_limits(problem) {
            self.statistics.default_limit_swaps += 1;
            warn!("{original}; a joint is outside its position limits, solving with default limits");
            let dims = self.dimensions();
            let evaluated = self.default_limits_problem()?.evaluate(args)?;
            let filtered = FilteredProblem::new(&evaluated, dims);
            return match self.solve_filtered(&filtered) {
                SolveOutcome::Solved(x) => Ok(filtered.expand(&x, dims.width)),
                SolveOutcome::Hard(e) => Err(e),
                SolveOutcome::Relaxable(e) => Err(QpError::OutOfJointLimits(e.to_string())),
            };
        }
        self.diagnose(problem, original)
    }

    /// Position rows whose lower bound is above `-range * margin` or upper bound
    /// below `range * margin`.
    fn outside_position_limits(&self, problem: &EvaluatedProblem) -> bool {
        let margin = self.config.position_limit_margin;
        self.position_ranges.iter().enumerate().any(|(row, range)| {
            problem.lower_a[row] > -range * margin || problem.upper_a[row] < range * margin
        })
    }

    fn default_limits_problem(&mut self) -> Result<&mut CompiledProblem, QpError> {
        if self.default_limits.is_none() {
            debug!("compiling default-limits variant");
            let assembler = HorizonAssembler::new(
                &self.free_variables,
                &self.constraints,
                &self.derivative_constraints,
                self.settings,
            )?;
            let symbolic = assembler.assemble(true)?;
            let compiled = CompiledProblem::compile(&symbolic, self.compiled.params())?;
            self.default_limits = Some(compiled);
        }
        self.default_limits
            .as_mut()
            .ok_or_else(|| QpError::Build("default-limits variant missing".into()))
    }

    /// Solve with wide slack bounds to name the constraints that cannot be met,
    /// log non-finite entries, then return `original`.
    fn diagnose(&mut self, problem: &EvaluatedProblem, original: QpError) -> Result<DVector<f64>, QpError> {
        let filtered = FilteredProblem::new(problem, self.dimensions());
        let bound = self.config.diagnosis_slack_bound;
        let mut relaxed = filtered.clone();
        for i in relaxed.slack_columns() {
            relaxed.lower[i] = -bound;
            relaxed.upper[i] = bound;
        }
        if let Ok(x) = self.backend.solve(&QpProblem::from_filtered(&relaxed)) {
            let violated = self.slack_violations(&filtered, &x);
            if !violated.is_empty() {
                return Err(QpError::HardConstraintsViolated(
                    self.describe_slacks(&filtered, &violated),
                ));
            }
        }
        self.log_non_finite(problem);
        Err(original)
    }

    fn log_non_finite(&self, problem: &EvaluatedProblem) {
        let columns = &self.labels.columns;
        let rows = &self.labels.rows;
        for (i, w) in problem.weights.iter().enumerate() {
            if !w.is_finite() {
                error!(column = %columns[i], value = w, "non-finite weight");
            }
        }
        for (i, (lb, ub)) in problem.lower.iter().zip(problem.upper.iter()).enumerate() {
            if lb.is_nan() || ub.is_nan() {
                error!(column = %columns[i], lb, ub, "NaN in column bounds");
            }
        }
        for (i, (lb, ub)) in problem.lower_a.iter().zip(problem.upper_a.iter()).enumerate() {
            if !lb.is_finite() || !ub.is_finite() {
                error!(row = %rows[i], lb, ub, "non-finite row bounds");
            }
        }
        for r in 0..problem.height() {
            for c in 0..problem.width() {
                let v = problem.a[(r, c)];
                if !v.is_finite() {
                    error!(row = %rows[r], column = %columns[c], value = v, "non-finite entry in A");
                }
            }
        }
    }

    /// Fail when a kept non-slack column of `x` leaves its bounds in `filtered`.
    fn check_variable_bounds(&self, filtered: &FilteredProblem, x: &DVector<f64>) -> Result<(), QpError> {
        let violated: Vec<&str> = filtered
            .bound_violations(x, self.config.bound_tolerance)
            .into_iter()
            .filter(|&i| i < filtered.num_non_slack)
            .map(|i| self.labels.columns[filtered.columns[i]].as_str())
            .collect();
        if violated.is_empty() {
            return Ok(());
        }
        warn!(columns = ?violated, "solution leaves variable bounds");
        Err(QpError::HardConstraintsViolated(format!(
            "violated bounds: {}",
            violated.join(", ")
        )))
    }

    /// Kept slack columns whose value in `x` leaves the bounds of `filtered`.
    fn slack_violations(&self, filtered: &FilteredProblem, x: &DVector<f64>) -> Vec<usize> {
        let tol = self.config.bound_tolerance;
        filtered
            .slack_columns()
            .filter(|&i| x[i] < filtered.lower[i] - tol || x[i] > filtered.upper[i] + tol)
            .collect()
    }

    fn describe_slacks(&self, filtered: &FilteredProblem, columns: &[usize]) -> String {
        let num_non_slack = self.dimensions().num_non_slack;
        let mut names: Vec<&str> = columns
            .iter()
            .map(|&i| self.slack_owners[filtered.columns[i] - num_non_slack].as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        format!("violated constraints: {}", names.join(", "))
    }
}

fn ensure_unique<'a>(
    kind: &'static str,
    sorted_names: impl Iterator<Item = &'a str>,
) -> Result<(), GoalInitializationError> {
    let mut previous: Option<&str> = None;
    for name in sorted_names {
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

fn position_range(v: &FreeVariable) -> Result<f64, QpError> {
    let lower = v.lower_limit(Derivative::Position, false)?;
    let upper = v.upper_limit(Derivative::Position, false)?;
    match (lower.as_const(), upper.as_const()) {
        (Some(l), Some(u)) => Ok(u - l),
        _ => Err(QpError::Build(format!(
            "position limits of '{}' are not constant",
            v.name()
        ))),
    }
}
