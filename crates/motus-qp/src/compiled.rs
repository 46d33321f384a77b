//! Compilation of a symbolic horizon problem into one numeric evaluator.
//!
//! Every component of the QP (weights, box bounds, row bounds and the
//! row-major A matrix) is written into one flat output vector, so a single
//! tape evaluation per tick produces the whole numeric problem. The fixed
//! [`ProblemOffsets`] slice that vector back into its parts.

use std::collections::BTreeMap;

use motus_core::QpError;
use motus_expr::{CompiledFunction, Expr, Symbol};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::assembler::SymbolicProblem;
use crate::layout::ProblemDimensions;

/// Start of each component inside the flat output vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemOffsets {
    pub weights: usize,
    pub lower: usize,
    pub upper: usize,
    pub lower_a: usize,
    pub upper_a: usize,
    pub a: usize,
    pub len: usize,
}

impl ProblemOffsets {
    pub const fn new(dims: ProblemDimensions) -> Self {
        let weights = 0;
        let lower = weights + dims.width;
        let upper = lower + dims.width;
        let lower_a = upper + dims.width;
        let upper_a = lower_a + dims.height;
        let a = upper_a + dims.height;
        Self {
            weights,
            lower,
            upper,
            lower_a,
            upper_a,
            a,
            len: a + dims.width * dims.height,
        }
    }
}

/// Numeric QP in assembler layout.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedProblem {
    pub weights: DVector<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub lower_a: DVector<f64>,
    pub upper_a: DVector<f64>,
    pub a: DMatrix<f64>,
}

impl EvaluatedProblem {
    pub fn width(&self) -> usize {
        self.weights.len()
    }

    pub fn height(&self) -> usize {
        self.lower_a.len()
    }
}

/// A [`SymbolicProblem`] compiled against an ordered parameter list.
#[derive(Debug, Clone)]
pub struct CompiledProblem {
    function: CompiledFunction,
    dims: ProblemDimensions,
    offsets: ProblemOffsets,
    scratch: Vec<f64>,
    output: Vec<f64>,
}

impl CompiledProblem {
    /// Compile `problem`; every free symbol must appear in `params`.
    pub fn compile(problem: &SymbolicProblem, params: &[Symbol]) -> Result<Self, QpError> {
        let dims = problem.dims;
        let offsets = ProblemOffsets::new(dims);

        let mut outputs: Vec<(usize, Expr)> = Vec::with_capacity(
            3 * dims.width + 2 * dims.height + problem.a.len(),
        );
        let dense = [
            (offsets.weights, &problem.weights),
            (offsets.lower, &problem.lower),
            (offsets.upper, &problem.upper),
            (offsets.lower_a, &problem.lower_a),
            (offsets.upper_a, &problem.upper_a),
        ];
        for (start, values) in dense {
            outputs.extend(values.iter().enumerate().map(|(i, e)| (start + i, e.clone())));
        }

        // Entries hitting the same cell are summed.
        let mut cells: BTreeMap<usize, Expr> = BTreeMap::new();
        for (row, col, value) in &problem.a {
            let index = offsets.a + row * dims.width + col;
            let merged = match cells.remove(&index) {
                Some(existing) => existing + value,
                None => value.clone(),
            };
            cells.insert(index, merged);
        }
        outputs.extend(cells.into_iter().filter(|(_, e)| !e.is_zero()));

        let function = CompiledFunction::compile(&outputs, offsets.len, params)?;
        debug!(
            params = params.len(),
            outputs = offsets.len,
            instructions = function.instruction_count(),
            "compiled horizon problem"
        );
        Ok(Self {
            function,
            dims,
            offsets,
            scratch: Vec::new(),
            output: vec![0.0; offsets.len],
        })
    }

    pub fn params(&self) -> &[Symbol] {
        self.function.params()
    }

    pub const fn dimensions(&self) -> ProblemDimensions {
        self.dims
    }

    pub const fn offsets(&self) -> ProblemOffsets {
        self.offsets
    }

    /// Evaluate with `args` in [`params`](Self::params) order.
    pub fn evaluate(&mut self, args: &[f64]) -> Result<EvaluatedProblem, QpError> {
        self.function.call(args, &mut self.scratch, &mut self.output)?;
        let o = self.offsets;
        let w = self.dims.width;
        let h = self.dims.height;
        let out = &self.output;
        Ok(EvaluatedProblem {
            weights: DVector::from_column_slice(&out[o.weights..o.weights + w]),
            lower: DVector::from_column_slice(&out[o.lower..o.lower + w]),
            upper: DVector::from_column_slice(&out[o.upper..o.upper + w]),
            lower_a: DVector::from_column_slice(&out[o.lower_a..o.lower_a + h]),
            upper_a: DVector::from_column_slice(&out[o.upper_a..o.upper_a + h]),
            a: DMatrix::from_row_slice(h, w, &out[o.a..o.len]),
        })
    }
}

// ---------------------------------------------------------------------------
// Debug expressions
// ---------------------------------------------------------------------------

/// Named auxiliary expressions evaluated alongside the QP for inspection.
#[derive(Debug, Clone)]
pub struct DebugExpressions {
    names: Vec<String>,
    function: CompiledFunction,
}

impl DebugExpressions {
    /// Compile `expressions` against their own free symbols, sorted by name.
    pub fn compile(mut expressions: Vec<(String, Expr)>) -> Result<Self, QpError> {
        expressions.sort_by(|a, b| a.0.cmp(&b.0));
        let exprs: Vec<Expr> = expressions.iter().map(|(_, e)| e.clone()).collect();
        let params = motus_expr::free_symbols(&exprs);
        let function = CompiledFunction::compile_dense(&exprs, &params)?;
        Ok(Self {
            names: expressions.into_iter().map(|(n, _)| n).collect(),
            function,
        })
    }

    pub fn params(&self) -> &[Symbol] {
        self.function.params()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Evaluate to `(name, value)` pairs.
    pub fn evaluate(&self, args: &[f64]) -> Result<Vec<(String, f64)>, QpError> {
        let values = self.function.evaluate(args)?;
        Ok(self.names.iter().cloned().zip(values).collect())
    }
}
