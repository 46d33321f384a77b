//! Horizon QP construction and solving for the motus controller.
//!
//! This crate turns free variables and constraints into one quadratic program
//! per control cycle and solves it:
//!
//! 1. **Free variables** ([`FreeVariable`]) with per-derivative limits and weights
//! 2. **Constraints**: task constraints on the integrated velocity
//!    ([`IntegralConstraint`]) and per-step [`DerivativeConstraint`]s
//! 3. **Horizon assembly** ([`HorizonAssembler`]) of H, B, A and BA over the
//!    prediction horizon, laid out by a precomputed [`Topology`]
//! 4. **Compilation** ([`CompiledProblem`]) of the whole problem into a single
//!    evaluation tape
//! 5. **Solve controller** ([`QpController`]) with relaxed retries, a
//!    default-limits fallback and diagnostics, on a pluggable [`QpBackend`]
//!
//! # Architecture
//!
//! Assembly and compilation happen once per structural change. Each tick only
//! gathers parameter values, evaluates the tape, filters gated slacks and calls
//! the backend.

pub mod assembler;
pub mod backend;
pub mod compiled;
pub mod constraint;
pub mod controller;
pub mod free_variable;
pub mod layout;
pub mod problem;

pub use assembler::{HorizonAssembler, HorizonSettings, SymbolicProblem};
pub use backend::{AdmmBackend, BackendRegistry, ClarabelBackend, QpBackend};
pub use compiled::{CompiledProblem, DebugExpressions, EvaluatedProblem, ProblemOffsets};
pub use constraint::{
    DERIVATIVE_SLACK_LIMIT, DerivativeConstraint, EqualityConstraint, HorizonFunction,
    HorizonValues, InequalityConstraint, IntegralConstraint,
};
pub use controller::{ControllerStatistics, NextCommands, QpController, SolveOutcome};
pub use free_variable::{FreeVariable, FreeVariableBuilder, FreeVariableConfig};
pub use layout::{ColumnKind, Labels, ProblemDimensions, RowKind, Topology};
pub use problem::{FilteredProblem, QpProblem};
