//! Pluggable QP backends.
//!
//! A backend receives a [`QpProblem`] in the common layout and returns the
//! primal solution or a [`QpSolverError`]. Backends are selected by
//! [`QpBackendKind`] through a [`BackendRegistry`] built once at startup.

pub mod admm;
pub mod clarabel;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use motus_core::{QpBackendKind, QpSolverError, SolverSettings};
use nalgebra::DVector;

use crate::problem::QpProblem;

pub use admm::AdmmBackend;
pub use clarabel::ClarabelBackend;

/// A QP solver.
pub trait QpBackend: Send {
    fn kind(&self) -> QpBackendKind;

    /// Solve `problem`, returning the primal solution.
    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpSolverError>;
}

/// Builds a backend from solver settings.
pub type BackendConstructor = Arc<dyn Fn(&SolverSettings) -> Box<dyn QpBackend> + Send + Sync>;

/// Map from backend kind to constructor.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    constructors: HashMap<QpBackendKind, BackendConstructor>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Clarabel and ADMM backends.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(QpBackendKind::Clarabel, clarabel_backend);
        registry.register(QpBackendKind::Admm, admm_backend);
        registry
    }

    /// Add or replace the constructor for `kind`.
    pub fn register(
        &mut self,
        kind: QpBackendKind,
        constructor: impl Fn(&SolverSettings) -> Box<dyn QpBackend> + Send + Sync + 'static,
    ) {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    pub fn contains(&self, kind: QpBackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Instantiate the backend registered for `kind`.
    pub fn create(
        &self,
        kind: QpBackendKind,
        settings: &SolverSettings,
    ) -> Result<Box<dyn QpBackend>, QpSolverError> {
        self.constructors
            .get(&kind)
            .map(|constructor| constructor(settings))
            .ok_or_else(|| QpSolverError::NoBackend(kind.to_string()))
    }
}

fn clarabel_backend(settings: &SolverSettings) -> Box<dyn QpBackend> {
    Box::new(ClarabelBackend::new(settings.clone()))
}

fn admm_backend(settings: &SolverSettings) -> Box<dyn QpBackend> {
    Box::new(AdmmBackend::new(settings.clone()))
}
