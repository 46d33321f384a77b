//! Mock QP backends for controller tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use motus_core::{QpBackendKind, QpSolverError, SolverSettings};
use motus_qp::{BackendRegistry, ClarabelBackend, QpBackend, QpProblem};
use nalgebra::DVector;

// ---------------------------------------------------------------------------
// FailingBackend
// ---------------------------------------------------------------------------

/// A backend that reports every problem infeasible and counts calls.
#[derive(Debug, Clone, Default)]
pub struct FailingBackend {
    calls: Arc<AtomicUsize>,
}

impl FailingBackend {
    pub const fn new(calls: Arc<AtomicUsize>) -> Self {
        Self { calls }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QpBackend for FailingBackend {
    fn kind(&self) -> QpBackendKind {
        QpBackendKind::Clarabel
    }

    fn solve(&mut self, _problem: &QpProblem) -> Result<DVector<f64>, QpSolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QpSolverError::Infeasible("mock backend".into()))
    }
}

/// Registry whose Clarabel slot builds [`FailingBackend`]s sharing `calls`.
pub fn failing_registry(calls: Arc<AtomicUsize>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(QpBackendKind::Clarabel, move |_: &SolverSettings| {
        Box::new(FailingBackend::new(Arc::clone(&calls))) as Box<dyn QpBackend>
    });
    registry
}

// ---------------------------------------------------------------------------
// FixedBackend
// ---------------------------------------------------------------------------

/// A backend that answers every problem with the same value in each column,
/// regardless of bounds.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackend {
    value: f64,
}

impl FixedBackend {
    pub const fn new(value: f64) -> Self {
        Self { value }
    }

    /// Registry whose Clarabel slot builds fixed backends returning `value`.
    pub fn registry(value: f64) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(QpBackendKind::Clarabel, move |_: &SolverSettings| {
            Box::new(Self::new(value)) as Box<dyn QpBackend>
        });
        registry
    }
}

impl QpBackend for FixedBackend {
    fn kind(&self) -> QpBackendKind {
        QpBackendKind::Clarabel
    }

    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpSolverError> {
        Ok(DVector::from_element(problem.num_variables(), self.value))
    }
}

// ---------------------------------------------------------------------------
// CountingBackend
// ---------------------------------------------------------------------------

/// Clarabel wrapped with a shared call counter and the last problem size.
#[derive(Debug, Clone)]
pub struct CountingBackend {
    inner: ClarabelBackend,
    calls: Arc<AtomicUsize>,
    last_width: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new(settings: &SolverSettings, calls: Arc<AtomicUsize>, last_width: Arc<AtomicUsize>) -> Self {
        Self {
            inner: ClarabelBackend::new(settings.clone()),
            calls,
            last_width,
        }
    }

    /// Registry whose Clarabel slot builds counting backends.
    pub fn registry(calls: Arc<AtomicUsize>, last_width: Arc<AtomicUsize>) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(QpBackendKind::Clarabel, move |settings: &SolverSettings| {
            Box::new(Self::new(settings, Arc::clone(&calls), Arc::clone(&last_width)))
                as Box<dyn QpBackend>
        });
        registry
    }
}

impl QpBackend for CountingBackend {
    fn kind(&self) -> QpBackendKind {
        QpBackendKind::Clarabel
    }

    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpSolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_width.store(problem.num_variables(), Ordering::SeqCst);
        self.inner.solve(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn trivial() -> QpProblem {
        QpProblem {
            weights: DVector::from_vec(vec![1.0]),
            eq_matrix: DMatrix::zeros(0, 1),
            eq_vector: DVector::zeros(0),
            ineq_matrix: DMatrix::zeros(0, 1),
            ineq_vector: DVector::zeros(0),
        }
    }

    #[test]
    fn failing_backend_counts_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = failing_registry(Arc::clone(&calls));
        let mut backend = registry
            .create(QpBackendKind::Clarabel, &SolverSettings::default())
            .unwrap();
        assert!(backend.solve(&trivial()).is_err());
        assert!(backend.solve(&trivial()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fixed_backend_ignores_bounds() {
        let mut backend = FixedBackend::new(3.0);
        let x = backend.solve(&trivial()).unwrap();
        assert_eq!(x, DVector::from_vec(vec![3.0]));
    }

    #[test]
    fn counting_backend_records_width() {
        let calls = Arc::new(AtomicUsize::new(0));
        let width = Arc::new(AtomicUsize::new(0));
        let mut backend = CountingBackend::new(&SolverSettings::default(), calls.clone(), width.clone());
        let x = backend.solve(&trivial()).unwrap();
        assert!(x[0].abs() < 1e-6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(width.load(Ordering::SeqCst), 1);
    }
}
