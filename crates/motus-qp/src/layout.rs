//! Column and row topology of the horizon QP.
//!
//! Computed before any entry is filled so the assembler allocates exactly
//! once and never deletes rows or columns.
//!
//! # Column order
//!
//! 1. Derivative blocks, velocity first. Inside a block: step-major, variables
//!    sorted by name. A variable only has columns up to its effective order
//!    `min(variable.order, controller order)`.
//! 2. Derivative-constraint slacks: velocity, acceleration then jerk kinds,
//!    each step-major, only steps inside the constraint's control horizon.
//! 3. One error slack per task constraint.
//!
//! # Row order
//!
//! 1. Position-limit rows (variables with position limits), step-major.
//! 2. Derivative link rows per derivative block, step-major.
//! 3. Derivative-constraint rows, in the order of their slack columns.
//! 4. Task rows, in the order of their error slacks.
//!
//! Rows of groups 3 and 4 pair one-to-one with the slack columns, which is
//! what lets the controller filter rows through the slack weights.

use motus_core::Derivative;

/// What a decision column stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Variable {
        variable: usize,
        derivative: Derivative,
        step: usize,
    },
    DerivativeSlack {
        constraint: usize,
        step: usize,
    },
    ErrorSlack {
        constraint: usize,
    },
}

/// What a constraint row stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    PositionLimit {
        variable: usize,
        step: usize,
    },
    Link {
        variable: usize,
        derivative: Derivative,
        step: usize,
    },
    DerivativeConstraint {
        constraint: usize,
        step: usize,
    },
    TaskError {
        constraint: usize,
    },
}

/// Sizes of the column and row groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProblemDimensions {
    /// Number of decision columns (|H| = |B| = width(A)).
    pub width: usize,
    /// Number of constraint rows (|BA| = height(A)).
    pub height: usize,
    /// Free-variable columns; always kept by the filter.
    pub num_non_slack: usize,
    pub num_derivative_slack: usize,
    pub num_error_slack: usize,
    pub num_position_rows: usize,
    pub num_link_rows: usize,
}

impl ProblemDimensions {
    /// Number of slack columns.
    pub const fn num_slack(&self) -> usize {
        self.num_derivative_slack + self.num_error_slack
    }
}

/// Per-variable facts the topology needs.
#[derive(Debug, Clone, Copy)]
pub struct VariableShape {
    pub order: Derivative,
    pub has_position_limits: bool,
}

/// Per-derivative-constraint facts the topology needs.
#[derive(Debug, Clone, Copy)]
pub struct DerivativeConstraintShape {
    pub derivative: Derivative,
    pub control_horizon: usize,
}

/// Column and row layout of one horizon QP.
#[derive(Debug, Clone)]
pub struct Topology {
    horizon: usize,
    order: Derivative,
    n_vars: usize,
    columns: Vec<ColumnKind>,
    rows: Vec<RowKind>,
    /// Indexed by `((d - 1) * horizon + step) * n_vars + variable`.
    variable_columns: Vec<Option<usize>>,
    dims: ProblemDimensions,
}

impl Topology {
    /// Lay out the problem. `order` must be at least velocity.
    pub fn compute(
        variables: &[VariableShape],
        derivative_constraints: &[DerivativeConstraintShape],
        num_task_constraints: usize,
        horizon: usize,
        order: Derivative,
    ) -> Self {
        let n_vars = variables.len();
        let n_blocks = order.index();
        let effective = |v: &VariableShape| v.order.min(order);

        let mut columns = Vec::new();
        let mut variable_columns = vec![None; n_blocks * horizon * n_vars];
        for d in Derivative::range(Derivative::Velocity, order) {
            for step in 0..horizon {
                for (variable, shape) in variables.iter().enumerate() {
                    if effective(shape) >= d {
                        let idx = ((d.index() - 1) * horizon + step) * n_vars + variable;
                        variable_columns[idx] = Some(columns.len());
                        columns.push(ColumnKind::Variable {
                            variable,
                            derivative: d,
                            step,
                        });
                    }
                }
            }
        }
        let num_non_slack = columns.len();

        let mut derivative_rows = Vec::new();
        for d in Derivative::range(Derivative::Velocity, Derivative::Jerk) {
            for step in 0..horizon {
                for (constraint, shape) in derivative_constraints.iter().enumerate() {
                    if shape.derivative == d && step < shape.control_horizon {
                        columns.push(ColumnKind::DerivativeSlack { constraint, step });
                        derivative_rows.push(RowKind::DerivativeConstraint { constraint, step });
                    }
                }
            }
        }
        let num_derivative_slack = derivative_rows.len();

        for constraint in 0..num_task_constraints {
            columns.push(ColumnKind::ErrorSlack { constraint });
        }

        let mut rows = Vec::new();
        for step in 0..horizon {
            for (variable, shape) in variables.iter().enumerate() {
                if shape.has_position_limits {
                    rows.push(RowKind::PositionLimit { variable, step });
                }
            }
        }
        let num_position_rows = rows.len();

        for d in Derivative::range(Derivative::Velocity, order) {
            for step in 0..horizon {
                for (variable, shape) in variables.iter().enumerate() {
                    if effective(shape) > d {
                        rows.push(RowKind::Link {
                            variable,
                            derivative: d,
                            step,
                        });
                    }
                }
            }
        }
        let num_link_rows = rows.len() - num_position_rows;

        rows.extend(derivative_rows);
        rows.extend((0..num_task_constraints).map(|constraint| RowKind::TaskError { constraint }));

        let dims = ProblemDimensions {
            width: columns.len(),
            height: rows.len(),
            num_non_slack,
            num_derivative_slack,
            num_error_slack: num_task_constraints,
            num_position_rows,
            num_link_rows,
        };

        Self {
            horizon,
            order,
            n_vars,
            columns,
            rows,
            variable_columns,
            dims,
        }
    }

    pub const fn horizon(&self) -> usize {
        self.horizon
    }

    pub const fn order(&self) -> Derivative {
        self.order
    }

    pub const fn dimensions(&self) -> ProblemDimensions {
        self.dims
    }

    pub fn columns(&self) -> &[ColumnKind] {
        &self.columns
    }

    pub fn rows(&self) -> &[RowKind] {
        &self.rows
    }

    /// Column of `variable`'s `derivative` at `step`, if the variable has one.
    pub fn variable_column(&self, variable: usize, derivative: Derivative, step: usize) -> Option<usize> {
        if derivative < Derivative::Velocity
            || derivative > self.order
            || step >= self.horizon
            || variable >= self.n_vars
        {
            return None;
        }
        let idx = ((derivative.index() - 1) * self.horizon + step) * self.n_vars + variable;
        self.variable_columns[idx]
    }
}

/// Human-readable labels of every column and row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
}

impl Labels {
    /// Label columns and rows by variable and constraint names.
    pub fn new(
        topology: &Topology,
        variable_names: &[&str],
        derivative_constraint_names: &[&str],
        task_constraint_names: &[&str],
    ) -> Self {
        let columns = topology
            .columns()
            .iter()
            .map(|c| match *c {
                ColumnKind::Variable {
                    variable,
                    derivative,
                    step,
                } => format!("t{step:03}/{}/{derivative}", variable_names[variable]),
                ColumnKind::DerivativeSlack { constraint, step } => {
                    format!("t{step:03}/{}", derivative_constraint_names[constraint])
                }
                ColumnKind::ErrorSlack { constraint } => {
                    format!("{}/error", task_constraint_names[constraint])
                }
            })
            .collect();
        let rows = topology
            .rows()
            .iter()
            .map(|r| match *r {
                RowKind::PositionLimit { variable, step } => {
                    format!("t{step:03}/{}/p_limit", variable_names[variable])
                }
                RowKind::Link {
                    variable,
                    derivative,
                    step: 0,
                } => format!("{}/last_{derivative}", variable_names[variable]),
                RowKind::Link {
                    variable,
                    derivative,
                    step,
                } => format!("t{step:03}/{derivative}/{}/link", variable_names[variable]),
                RowKind::DerivativeConstraint { constraint, step } => {
                    format!("t{step:03}/{}", derivative_constraint_names[constraint])
                }
                RowKind::TaskError { constraint } => {
                    format!("{}/e", task_constraint_names[constraint])
                }
            })
            .collect();
        Self { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(order: Derivative, limited: bool) -> VariableShape {
        VariableShape {
            order,
            has_position_limits: limited,
        }
    }

    #[test]
    fn velocity_only_variable_has_no_higher_columns() {
        let vars = [shape(Derivative::Jerk, true), shape(Derivative::Velocity, true)];
        let t = Topology::compute(&vars, &[], 0, 3, Derivative::Jerk);
        // 3 blocks * 3 steps for the first, 1 block * 3 steps for the second
        assert_eq!(t.dimensions().num_non_slack, 9 + 3);
        assert!(t.variable_column(1, Derivative::Acceleration, 0).is_none());
        assert!(t.variable_column(1, Derivative::Velocity, 2).is_some());
        assert!(t.variable_column(0, Derivative::Jerk, 2).is_some());
    }

    #[test]
    fn link_rows_only_where_next_derivative_exists() {
        let vars = [shape(Derivative::Acceleration, true), shape(Derivative::Velocity, false)];
        let t = Topology::compute(&vars, &[], 0, 2, Derivative::Acceleration);
        let dims = t.dimensions();
        assert_eq!(dims.num_position_rows, 2);
        assert_eq!(dims.num_link_rows, 2);
    }

    #[test]
    fn control_horizon_truncates_derivative_constraints() {
        let vars = [shape(Derivative::Jerk, true)];
        let dc = [DerivativeConstraintShape {
            derivative: Derivative::Velocity,
            control_horizon: 2,
        }];
        let t = Topology::compute(&vars, &dc, 1, 5, Derivative::Jerk);
        let dims = t.dimensions();
        assert_eq!(dims.num_derivative_slack, 2);
        assert_eq!(dims.num_error_slack, 1);
        assert_eq!(dims.width, 15 + 2 + 1);
        assert_eq!(
            dims.height,
            dims.num_position_rows + dims.num_link_rows + 2 + 1
        );
    }

    #[test]
    fn columns_are_step_major_within_block() {
        let vars = [shape(Derivative::Velocity, true), shape(Derivative::Velocity, true)];
        let t = Topology::compute(&vars, &[], 0, 2, Derivative::Velocity);
        assert_eq!(t.variable_column(0, Derivative::Velocity, 0), Some(0));
        assert_eq!(t.variable_column(1, Derivative::Velocity, 0), Some(1));
        assert_eq!(t.variable_column(0, Derivative::Velocity, 1), Some(2));
    }

    #[test]
    fn labels_follow_layout() {
        let vars = [shape(Derivative::Acceleration, true)];
        let t = Topology::compute(&vars, &[], 1, 2, Derivative::Acceleration);
        let labels = Labels::new(&t, &["j"], &[], &["goal"]);
        assert_eq!(labels.columns[0], "t000/j/velocity");
        assert_eq!(labels.columns.last().unwrap(), "goal/error");
        assert_eq!(labels.rows[0], "t000/j/p_limit");
        assert_eq!(labels.rows[2], "j/last_velocity");
        assert_eq!(labels.rows[3], "t001/velocity/j/link");
        assert_eq!(labels.rows.last().unwrap(), "goal/e");
    }
}
