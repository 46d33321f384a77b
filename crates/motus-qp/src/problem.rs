//! Filtering of evaluated problems and conversion to the backend layout.
//!
//! # Backend layout
//!
//! ```text
//! minimize   ½ xᵀ diag(w) x
//! subject to E x  = b        rows with lbA = ubA
//!            G x <= h        [-I; I] box rows, then [-A; A] rows
//! ```
//!
//! Infinite bounds produce no row.

use nalgebra::{DMatrix, DVector};

use crate::compiled::EvaluatedProblem;
use crate::layout::ProblemDimensions;

/// An evaluated problem with zero-weight slacks and their rows removed.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredProblem {
    pub weights: DVector<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub lower_a: DVector<f64>,
    pub upper_a: DVector<f64>,
    pub a: DMatrix<f64>,
    /// Original index of every kept column.
    pub columns: Vec<usize>,
    /// Original index of every kept row.
    pub rows: Vec<usize>,
    /// Kept columns belonging to the non-slack prefix.
    pub num_non_slack: usize,
}

impl FilteredProblem {
    /// Drop slack columns with zero weight and the constraint rows tied to
    /// them. Free-variable columns and the position / link rows always stay.
    pub fn new(problem: &EvaluatedProblem, dims: ProblemDimensions) -> Self {
        let columns: Vec<usize> = (0..dims.width)
            .filter(|&i| i < dims.num_non_slack || problem.weights[i] != 0.0)
            .collect();

        let fixed_rows = dims.num_position_rows + dims.num_link_rows;
        let rows: Vec<usize> = (0..dims.height)
            .filter(|&r| {
                r < fixed_rows || problem.weights[dims.num_non_slack + (r - fixed_rows)] != 0.0
            })
            .collect();

        let pick = |v: &DVector<f64>, idx: &[usize]| DVector::from_iterator(idx.len(), idx.iter().map(|&i| v[i]));
        let a = DMatrix::from_fn(rows.len(), columns.len(), |r, c| problem.a[(rows[r], columns[c])]);

        Self {
            weights: pick(&problem.weights, &columns),
            lower: pick(&problem.lower, &columns),
            upper: pick(&problem.upper, &columns),
            lower_a: pick(&problem.lower_a, &rows),
            upper_a: pick(&problem.upper_a, &rows),
            a,
            num_non_slack: dims.num_non_slack,
            columns,
            rows,
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Indices (into the kept columns) of slack columns.
    pub fn slack_columns(&self) -> std::ops::Range<usize> {
        self.num_non_slack..self.width()
    }

    /// Scatter a filtered solution back to the full width; dropped columns
    /// read zero.
    pub fn expand(&self, x: &DVector<f64>, width: usize) -> DVector<f64> {
        let mut full = DVector::zeros(width);
        for (i, &col) in self.columns.iter().enumerate() {
            full[col] = x[i];
        }
        full
    }

    /// Kept columns whose value in `x` leaves `[lower, upper]` by more than
    /// `tolerance`.
    pub fn bound_violations(&self, x: &DVector<f64>, tolerance: f64) -> Vec<usize> {
        (0..self.width())
            .filter(|&i| x[i] < self.lower[i] - tolerance || x[i] > self.upper[i] + tolerance)
            .collect()
    }
}

/// Problem handed to a [`QpBackend`](crate::backend::QpBackend).
#[derive(Debug, Clone, PartialEq)]
pub struct QpProblem {
    /// Diagonal of the quadratic cost.
    pub weights: DVector<f64>,
    pub eq_matrix: DMatrix<f64>,
    pub eq_vector: DVector<f64>,
    pub ineq_matrix: DMatrix<f64>,
    pub ineq_vector: DVector<f64>,
}

impl QpProblem {
    /// Reformat a filtered problem into the backend layout.
    pub fn from_filtered(problem: &FilteredProblem) -> Self {
        let n = problem.width();
        let mut eq_rows: Vec<(DVector<f64>, f64)> = Vec::new();
        let mut ineq_rows: Vec<(DVector<f64>, f64)> = Vec::new();

        let unit = |i: usize, sign: f64| {
            let mut row = DVector::zeros(n);
            row[i] = sign;
            row
        };
        for i in 0..n {
            if problem.lower[i].is_finite() {
                ineq_rows.push((unit(i, -1.0), -problem.lower[i]));
            }
        }
        for i in 0..n {
            if problem.upper[i].is_finite() {
                ineq_rows.push((unit(i, 1.0), problem.upper[i]));
            }
        }

        let mut upper_rows = Vec::new();
        for r in 0..problem.height() {
            let row: DVector<f64> = problem.a.row(r).transpose();
            let (lb, ub) = (problem.lower_a[r], problem.upper_a[r]);
            if lb == ub && lb.is_finite() {
                eq_rows.push((row, lb));
                continue;
            }
            if lb.is_finite() {
                ineq_rows.push((-&row, -lb));
            }
            if ub.is_finite() {
                upper_rows.push((row, ub));
            }
        }
        ineq_rows.extend(upper_rows);

        let (eq_matrix, eq_vector) = stack(&eq_rows, n);
        let (ineq_matrix, ineq_vector) = stack(&ineq_rows, n);
        Self {
            weights: problem.weights.clone(),
            eq_matrix,
            eq_vector,
            ineq_matrix,
            ineq_vector,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.weights.len()
    }

    pub fn num_equalities(&self) -> usize {
        self.eq_vector.len()
    }

    pub fn num_inequalities(&self) -> usize {
        self.ineq_vector.len()
    }
}

fn stack(rows: &[(DVector<f64>, f64)], n: usize) -> (DMatrix<f64>, DVector<f64>) {
    let matrix = DMatrix::from_fn(rows.len(), n, |r, c| rows[r].0[c]);
    let vector = DVector::from_iterator(rows.len(), rows.iter().map(|(_, b)| *b));
    (matrix, vector)
}
