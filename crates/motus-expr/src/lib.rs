//! Symbolic scalar expressions for the motus controller.
//!
//! Provides what the QP pipeline needs from a symbolic engine and nothing
//! more:
//!
//! 1. **Expressions** built from named scalar [`Symbol`]s, constants and
//!    elementary functions, stored as a shared DAG ([`Expr`])
//! 2. **Differentiation** including Jacobians and their first and second total
//!    time derivatives ([`jacobian`], [`jacobian_dot`], [`jacobian_ddot`])
//! 3. **Compilation** of many expressions into one flat evaluation tape
//!    ([`CompiledFunction`]) taking an ordered parameter vector
//!
//! # Architecture
//!
//! Numeric values never live in the expressions. A caller-owned
//! [`EvaluationContext`] holds the live value of every symbol; compiled
//! functions read an ordered slice gathered from it through a precomputed
//! [`Binding`], so no name lookup happens on the hot path.

pub mod compile;
pub mod context;
pub mod diff;
pub mod error;
pub mod expr;
pub mod geometry;
pub mod matrix;
pub mod symbol;

pub use compile::CompiledFunction;
pub use context::{Binding, EvaluationContext};
pub use diff::{jacobian, jacobian_ddot, jacobian_dot, second_total_derivative, total_derivative};
pub use error::ExprError;
pub use expr::{BinaryOp, Expr, UnaryOp, free_symbols};
pub use geometry::{Point3, Quaternion, RotationMatrix, Vector3};
pub use matrix::ExprMatrix;
pub use symbol::Symbol;
