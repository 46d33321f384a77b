//! Dense ADMM (operator splitting) backend.
//!
//! Solves
//!
//! ```text
//! minimize   ½ xᵀ diag(w) x
//! subject to l <= C x <= u,   C = [E; G],  l = [b; -∞],  u = [b; h]
//! ```
//!
//! with the OSQP iteration: one cached Cholesky factor of
//! `diag(w) + σI + Cᵀ diag(ρ) C`, equality rows penalized with a larger ρ,
//! over-relaxation α and a primal infeasibility certificate check.

use motus_core::{QpBackendKind, QpSolverError, SolverSettings};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::QpBackend;
use crate::problem::QpProblem;

const SIGMA: f64 = 1e-6;
const ALPHA: f64 = 1.6;
const EQUALITY_RHO_SCALE: f64 = 1e3;
/// ADMM does not reach interior-point accuracy in useful time.
const TOLERANCE_FLOOR: f64 = 1e-6;
const CHECK_INTERVAL: u32 = 10;

/// Dense ADMM backend on nalgebra Cholesky.
#[derive(Debug, Clone)]
pub struct AdmmBackend {
    settings: SolverSettings,
}

impl AdmmBackend {
    pub const fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }
}

impl QpBackend for AdmmBackend {
    fn kind(&self) -> QpBackendKind {
        QpBackendKind::Admm
    }

    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpSolverError> {
        let n = problem.num_variables();
        let n_eq = problem.num_equalities();
        let m = n_eq + problem.num_inequalities();

        let mut c = DMatrix::<f64>::zeros(m, n);
        c.rows_mut(0, n_eq).copy_from(&problem.eq_matrix);
        c.rows_mut(n_eq, m - n_eq).copy_from(&problem.ineq_matrix);
        let l = DVector::from_fn(m, |i, _| {
            if i < n_eq {
                problem.eq_vector[i]
            } else {
                f64::NEG_INFINITY
            }
        });
        let u = DVector::from_fn(m, |i, _| {
            if i < n_eq {
                problem.eq_vector[i]
            } else {
                problem.ineq_vector[i - n_eq]
            }
        });

        let rho0 = self.settings.admm_rho;
        let rho = DVector::from_fn(m, |i, _| if i < n_eq { rho0 * EQUALITY_RHO_SCALE } else { rho0 });

        let p = DMatrix::from_diagonal(&problem.weights);
        let mut k = &p + DMatrix::identity(n, n) * SIGMA;
        let mut rho_c = c.clone();
        for (i, mut row) in rho_c.row_iter_mut().enumerate() {
            row *= rho[i];
        }
        k += c.transpose() * &rho_c;
        let factor = k
            .cholesky()
            .ok_or_else(|| QpSolverError::Setup("KKT matrix not positive definite".into()))?;

        let eps = self.settings.tolerance.max(TOLERANCE_FLOOR);
        let mut x = DVector::zeros(n);
        let mut z = DVector::zeros(m);
        let mut y = DVector::zeros(m);
        let ct = c.transpose();

        for iter in 1..=self.settings.admm_max_iter {
            let y_prev = y.clone();

            let rhs = &x * SIGMA + &ct * (rho.component_mul(&z) - &y);
            let x_tilde = factor.solve(&rhs);
            let z_tilde = &c * &x_tilde;

            let x_next = &x_tilde * ALPHA + &x * (1.0 - ALPHA);
            let z_relaxed = &z_tilde * ALPHA + &z * (1.0 - ALPHA);
            let z_next = DVector::from_fn(m, |i, _| {
                (z_relaxed[i] + y[i] / rho[i]).max(l[i]).min(u[i])
            });
            y += rho.component_mul(&(&z_relaxed - &z_next));
            x = x_next;
            z = z_next;

            if iter % CHECK_INTERVAL != 0 {
                continue;
            }

            let cx = &c * &x;
            let px = &p * &x;
            let cty = &ct * &y;
            let r_prim = (&cx - &z).amax();
            let r_dual = (&px + &cty).amax();
            let eps_prim = eps + eps * cx.amax().max(z.amax());
            let eps_dual = eps + eps * px.amax().max(cty.amax());
            if r_prim <= eps_prim && r_dual <= eps_dual {
                debug!(iterations = iter, r_prim, r_dual, "admm converged");
                return Ok(x);
            }

            let dy = &y - &y_prev;
            if primal_infeasible(&ct, &dy, &l, &u, eps) {
                return Err(QpSolverError::Infeasible(format!(
                    "primal infeasibility certificate after {iter} iterations"
                )));
            }
        }

        Err(QpSolverError::Infeasible(format!(
            "no convergence within {} iterations",
            self.settings.admm_max_iter
        )))
    }
}

/// `Cᵀ δy ≈ 0` and `uᵀ max(δy, 0) + lᵀ min(δy, 0) < 0`.
fn primal_infeasible(
    ct: &DMatrix<f64>,
    dy: &DVector<f64>,
    l: &DVector<f64>,
    u: &DVector<f64>,
    eps: f64,
) -> bool {
    let norm = dy.amax();
    if norm <= eps {
        return false;
    }
    if (ct * dy).amax() > eps * norm {
        return false;
    }
    let mut support = 0.0;
    for i in 0..dy.len() {
        if dy[i] > 0.0 {
            if !u[i].is_finite() {
                return false;
            }
            support += u[i] * dy[i];
        } else if dy[i] < 0.0 {
            if !l[i].is_finite() {
                return false;
            }
            support += l[i] * dy[i];
        }
    }
    support < -eps * norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn box_problem(lower: f64, upper: f64) -> QpProblem {
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
        let mut backend = AdmmBackend::new(SolverSettings::default());
        let x = backend.solve(&box_problem(-1.0, 1.0)).unwrap();
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-3);
        assert_relative_eq!(x[1], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn active_bound_shifts_solution() {
        let mut backend = AdmmBackend::new(SolverSettings::default());
        let x = backend.solve(&box_problem(-1.0, 0.2)).unwrap();
        assert_relative_eq!(x[0], 0.2, epsilon = 1e-3);
        assert_relative_eq!(x[1], 0.8, epsilon = 1e-3);
    }

    #[test]
    fn zero_weight_columns_are_regularized() {
        // x1 has no cost; the equality still pins it
        let problem = QpProblem {
            weights: DVector::from_vec(vec![1.0, 0.0]),
            eq_matrix: DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            eq_vector: DVector::from_vec(vec![0.3]),
            ineq_matrix: DMatrix::zeros(0, 2),
            ineq_vector: DVector::zeros(0),
        };
        let x = AdmmBackend::new(SolverSettings::default()).solve(&problem).unwrap();
        assert_relative_eq!(x[0], 0.0, epsilon = 1e-3);
        assert_relative_eq!(x[1], 0.3, epsilon = 1e-3);
    }

    #[test]
    fn infeasible_problem_is_an_error() {
        let settings = SolverSettings {
            admm_max_iter: 2_000,
            ..SolverSettings::default()
        };
        let err = AdmmBackend::new(settings)
            .solve(&box_problem(2.0, -2.0))
            .unwrap_err();
        assert!(matches!(err, QpSolverError::Infeasible(_)));
    }
}
