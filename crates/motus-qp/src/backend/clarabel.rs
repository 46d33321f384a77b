//! Clarabel interior-point backend.
//!
//! Maps the common layout onto Clarabel's conic form
//!
//! ```text
//! minimize   ½ xᵀ P x + qᵀ x
//! subject to [E; G] x + s = [b; h],  s ∈ Zero(n_eq) × Nonnegative(n_ineq)
//! ```
//!
//! with `P = diag(w)` and `q = 0`.

use ::clarabel::algebra::CscMatrix;
use ::clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use motus_core::{QpBackendKind, QpSolverError, SolverSettings};
use nalgebra::{DMatrix, DVector};

use super::QpBackend;
use crate::problem::QpProblem;

/// Interior-point backend built on Clarabel.
#[derive(Debug, Clone)]
pub struct ClarabelBackend {
    settings: SolverSettings,
}

impl ClarabelBackend {
    pub const fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }
}

impl QpBackend for ClarabelBackend {
    fn kind(&self) -> QpBackendKind {
        QpBackendKind::Clarabel
    }

    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpSolverError> {
        let n = problem.num_variables();
        let n_eq = problem.num_equalities();
        let n_ineq = problem.num_inequalities();

        let p_csc = dmatrix_to_csc_upper_tri(&DMatrix::from_diagonal(&problem.weights));
        let q = vec![0.0; n];

        let mut a_all = DMatrix::<f64>::zeros(n_eq + n_ineq, n);
        a_all.rows_mut(0, n_eq).copy_from(&problem.eq_matrix);
        a_all.rows_mut(n_eq, n_ineq).copy_from(&problem.ineq_matrix);
        let a_csc = dmatrix_to_csc(&a_all);
        let b: Vec<f64> = problem
            .eq_vector
            .iter()
            .chain(problem.ineq_vector.iter())
            .copied()
            .collect();

        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_ineq > 0 {
            cones.push(NonnegativeConeT(n_ineq));
        }

        let tol = self.settings.tolerance;
        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.settings.max_iter)
            .verbose(false)
            .tol_gap_abs(tol)
            .tol_gap_rel(tol)
            .tol_feas(tol)
            .build()
            .map_err(|e| QpSolverError::Setup(e.to_string()))?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings)
            .map_err(|e| QpSolverError::Setup(format!("{e:?}")))?;
        solver.solve();
        let sol = &solver.solution;
        match sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                Ok(DVector::from_column_slice(&sol.x))
            }
            status => Err(QpSolverError::Infeasible(format!("{status:?}"))),
        }
    }
}

/// Convert a nalgebra `DMatrix<f64>` to Clarabel's `CscMatrix<f64>`.
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric `DMatrix<f64>` to upper-triangular `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn box_problem(lower: f64, upper: f64) -> QpProblem {
        // min ½ (x0² + x1²)  s.t.  x0 + x1 = 1,  lower <= x0 <= upper
        QpProblem {
            weights: DVector::from_vec(vec![1.0, 1.0]),
            eq_matrix: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            eq_vector: DVector::from_vec(vec![1.0]),
            ineq_matrix: DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 1.0, 0.0]),
            ineq_vector: DVector::from_vec(vec![-lower, upper]),
        }
    }

    #[test]
    fn splits_equality_evenly() {
        let mut backend = ClarabelBackend::new(SolverSettings::default());
        let x = backend.solve(&box_problem(-1.0, 1.0)).unwrap();
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(x[1], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn active_bound_shifts_solution() {
        let mut backend = ClarabelBackend::new(SolverSettings::default());
        let x = backend.solve(&box_problem(-1.0, 0.2)).unwrap();
        assert_relative_eq!(x[0], 0.2, epsilon = 1e-5);
        assert_relative_eq!(x[1], 0.8, epsilon = 1e-5);
    }

    #[test]
    fn infeasible_problem_is_an_error() {
        let mut backend = ClarabelBackend::new(SolverSettings::default());
        let err = backend.solve(&box_problem(2.0, -2.0)).unwrap_err();
        assert!(matches!(err, QpSolverError::Infeasible(_)));
    }

    #[test]
    fn csc_skips_zeros() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]);
        let csc = dmatrix_to_csc(&m);
        assert_eq!(csc.nzval, vec![1.0, 2.0]);
        assert_eq!(csc.colptr, vec![0, 1, 2]);
    }

    #[test]
    fn upper_tri_drops_lower_half() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 3.0, 3.0, 2.0]);
        let csc = dmatrix_to_csc_upper_tri(&m);
        assert_eq!(csc.nzval, vec![1.0, 3.0, 2.0]);
    }
}
