//! Compilation of expression DAGs into a flat evaluation tape.
//!
//! # Layout
//!
//! The scratch buffer holds, in order: the parameters, the deduplicated
//! constants, then one slot per instruction. Every DAG node maps to exactly one
//! slot, so a sub-expression shared by several outputs is computed once per
//! call. The compiled function is immutable and `Send + Sync`; callers own the
//! scratch buffer.

use std::collections::HashMap;

use crate::error::ExprError;
use crate::expr::{BinaryOp, Expr, Node, UnaryOp};
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy)]
enum Instr {
    Unary {
        op: UnaryOp,
        dst: usize,
        a: usize,
    },
    Binary {
        op: BinaryOp,
        dst: usize,
        a: usize,
        b: usize,
    },
    Select {
        dst: usize,
        cond: usize,
        then: usize,
        otherwise: usize,
    },
}

/// A compiled numeric evaluator for a set of expressions.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    params: Vec<Symbol>,
    constants: Vec<f64>,
    instructions: Vec<Instr>,
    /// `(output index, slot)` pairs.
    outputs: Vec<(usize, usize)>,
    output_len: usize,
    slot_count: usize,
}

struct Builder<'a> {
    param_index: HashMap<&'a Symbol, usize>,
    constant_index: HashMap<u64, usize>,
    constants: Vec<f64>,
    instructions: Vec<Instr>,
    memo: HashMap<*const Node, Slot>,
}

/// Slot reference before the final layout is known.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Param(usize),
    Const(usize),
    Instr(usize),
}

impl Builder<'_> {
    fn emit(&mut self, e: &Expr) -> Result<Slot, ExprError> {
        if let Some(slot) = self.memo.get(&e.ptr()) {
            return Ok(*slot);
        }
        let slot = match e.node() {
            Node::Const(v) => {
                let next = self.constants.len();
                let idx = *self.constant_index.entry(v.to_bits()).or_insert(next);
                if idx == next {
                    self.constants.push(*v);
                }
                Slot::Const(idx)
            }
            Node::Symbol(s) => match self.param_index.get(s) {
                Some(&idx) => Slot::Param(idx),
                None => return Err(ExprError::UnboundSymbol(s.name().to_string())),
            },
            Node::Unary(op, a) => {
                let a = self.emit(a)?;
                self.push(Pending::Unary(*op, a))
            }
            Node::Binary(op, a, b) => {
                let a = self.emit(a)?;
                let b = self.emit(b)?;
                self.push(Pending::Binary(*op, a, b))
            }
            Node::IfGreaterZero(c, a, b) => {
                let c = self.emit(c)?;
                let a = self.emit(a)?;
                let b = self.emit(b)?;
                self.push(Pending::Select(c, a, b))
            }
        };
        self.memo.insert(e.ptr(), slot);
        Ok(slot)
    }

    fn push(&mut self, pending: Pending) -> Slot {
        let idx = self.instructions.len();
        // Slot indices are resolved once the constant count is final.
        let instr = match pending {
            Pending::Unary(op, a) => Instr::Unary {
                op,
                dst: idx,
                a: encode(a),
            },
            Pending::Binary(op, a, b) => Instr::Binary {
                op,
                dst: idx,
                a: encode(a),
                b: encode(b),
            },
            Pending::Select(c, a, b) => Instr::Select {
                dst: idx,
                cond: encode(c),
                then: encode(a),
                otherwise: encode(b),
            },
        };
        self.instructions.push(instr);
        Slot::Instr(idx)
    }
}

enum Pending {
    Unary(UnaryOp, Slot),
    Binary(BinaryOp, Slot, Slot),
    Select(Slot, Slot, Slot),
}

// Two high bits tag the slot kind until relocation.
const TAG_SHIFT: u32 = usize::BITS - 2;
const TAG_PARAM: usize = 0;
const TAG_CONST: usize = 1;
const TAG_INSTR: usize = 2;

const fn encode(slot: Slot) -> usize {
    match slot {
        Slot::Param(i) => (TAG_PARAM << TAG_SHIFT) | i,
        Slot::Const(i) => (TAG_CONST << TAG_SHIFT) | i,
        Slot::Instr(i) => (TAG_INSTR << TAG_SHIFT) | i,
    }
}

const fn relocate(encoded: usize, n_params: usize, n_consts: usize) -> usize {
    let tag = encoded >> TAG_SHIFT;
    let idx = encoded & ((1 << TAG_SHIFT) - 1);
    match tag {
        TAG_PARAM => idx,
        TAG_CONST => n_params + idx,
        _ => n_params + n_consts + idx,
    }
}

impl CompiledFunction {
    /// Compile `outputs` (pairs of output index and expression) into a function
    /// writing a vector of length `output_len`. Entries not listed are zero.
    ///
    /// Fails if an expression references a symbol not in `params`.
    pub fn compile(
        outputs: &[(usize, Expr)],
        output_len: usize,
        params: &[Symbol],
    ) -> Result<Self, ExprError> {
        let mut builder = Builder {
            param_index: params.iter().enumerate().map(|(i, s)| (s, i)).collect(),
            constant_index: HashMap::new(),
            constants: Vec::new(),
            instructions: Vec::new(),
            memo: HashMap::new(),
        };

        let mut slots = Vec::with_capacity(outputs.len());
        for (index, expr) in outputs {
            if *index >= output_len {
                return Err(ExprError::OutputIndex {
                    index: *index,
                    len: output_len,
                });
            }
            slots.push((*index, builder.emit(expr)?));
        }

        let n_params = params.len();
        let n_consts = builder.constants.len();
        let instructions = builder
            .instructions
            .into_iter()
            .map(|instr| match instr {
                Instr::Unary { op, dst, a } => Instr::Unary {
                    op,
                    dst: n_params + n_consts + dst,
                    a: relocate(a, n_params, n_consts),
                },
                Instr::Binary { op, dst, a, b } => Instr::Binary {
                    op,
                    dst: n_params + n_consts + dst,
                    a: relocate(a, n_params, n_consts),
                    b: relocate(b, n_params, n_consts),
                },
                Instr::Select {
                    dst,
                    cond,
                    then,
                    otherwise,
                } => Instr::Select {
                    dst: n_params + n_consts + dst,
                    cond: relocate(cond, n_params, n_consts),
                    then: relocate(then, n_params, n_consts),
                    otherwise: relocate(otherwise, n_params, n_consts),
                },
            })
            .collect::<Vec<_>>();

        let outputs = slots
            .into_iter()
            .map(|(index, slot)| (index, relocate(encode(slot), n_params, n_consts)))
            .collect();

        Ok(Self {
            params: params.to_vec(),
            slot_count: n_params + n_consts + instructions.len(),
            constants: builder.constants,
            instructions,
            outputs,
            output_len,
        })
    }

    /// Compile expressions into consecutive outputs.
    pub fn compile_dense(exprs: &[Expr], params: &[Symbol]) -> Result<Self, ExprError> {
        let outputs: Vec<(usize, Expr)> = exprs.iter().cloned().enumerate().collect();
        Self::compile(&outputs, exprs.len(), params)
    }

    /// Ordered parameter list expected by [`call`](Self::call).
    pub fn params(&self) -> &[Symbol] {
        &self.params
    }

    /// Length of the output vector.
    pub const fn output_len(&self) -> usize {
        self.output_len
    }

    /// Number of tape instructions.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Evaluate into `out`, using `scratch` as working memory.
    pub fn call(&self, args: &[f64], scratch: &mut Vec<f64>, out: &mut [f64]) -> Result<(), ExprError> {
        if args.len() != self.params.len() {
            return Err(ExprError::ArgumentCount {
                expected: self.params.len(),
                got: args.len(),
            });
        }
        if out.len() != self.output_len {
            return Err(ExprError::OutputLength {
                expected: self.output_len,
                got: out.len(),
            });
        }

        scratch.clear();
        scratch.resize(self.slot_count, 0.0);
        scratch[..args.len()].copy_from_slice(args);
        let n_params = args.len();
        scratch[n_params..n_params + self.constants.len()].copy_from_slice(&self.constants);

        for instr in &self.instructions {
            match *instr {
                Instr::Unary { op, dst, a } => scratch[dst] = op.apply(scratch[a]),
                Instr::Binary { op, dst, a, b } => scratch[dst] = op.apply(scratch[a], scratch[b]),
                Instr::Select {
                    dst,
                    cond,
                    then,
                    otherwise,
                } => {
                    scratch[dst] = if scratch[cond] > 0.0 {
                        scratch[then]
                    } else {
                        scratch[otherwise]
                    };
                }
            }
        }

        out.fill(0.0);
        for &(index, slot) in &self.outputs {
            out[index] = scratch[slot];
        }
        Ok(())
    }

    /// Evaluate and return a freshly allocated output vector.
    pub fn evaluate(&self, args: &[f64]) -> Result<Vec<f64>, ExprError> {
        let mut scratch = Vec::new();
        let mut out = vec![0.0; self.output_len];
        self.call(args, &mut scratch, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn evaluates_sparse_outputs() {
        let x = Symbol::new("x");
        let y = Symbol::new("y");
        let outputs = vec![(0, x.expr() + y.expr()), (3, x.expr() * y.expr())];
        let f = CompiledFunction::compile(&outputs, 4, &[x, y]).unwrap();
        let out = f.evaluate(&[2.0, 5.0]).unwrap();
        assert_eq!(out, vec![7.0, 0.0, 0.0, 10.0]);
    }

    #[test]
    fn shared_subexpressions_compile_once() {
        let x = Symbol::new("x");
        let s = x.expr().sin();
        let f = CompiledFunction::compile_dense(&[&s * 2.0, &s + 1.0], &[x]).unwrap();
        // sin, mul, add
        assert_eq!(f.instruction_count(), 3);
        let out = f.evaluate(&[0.5]).unwrap();
        assert_relative_eq!(out[0], 2.0 * 0.5f64.sin());
        assert_relative_eq!(out[1], 0.5f64.sin() + 1.0);
    }

    #[test]
    fn constant_outputs_need_no_params() {
        let f = CompiledFunction::compile_dense(&[Expr::constant(4.0)], &[]).unwrap();
        assert_eq!(f.evaluate(&[]).unwrap(), vec![4.0]);
    }

    #[test]
    fn unbound_symbol_is_an_error() {
        let x = Symbol::new("x");
        let err = CompiledFunction::compile_dense(&[x.expr()], &[]).unwrap_err();
        assert_eq!(err, ExprError::UnboundSymbol("x".into()));
    }

    #[test]
    fn wrong_argument_count_is_an_error() {
        let x = Symbol::new("x");
        let f = CompiledFunction::compile_dense(&[x.expr()], &[x]).unwrap();
        assert!(matches!(
            f.evaluate(&[]),
            Err(ExprError::ArgumentCount { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn select_picks_branch_at_runtime() {
        let x = Symbol::new("x");
        let e = Expr::if_greater_zero(&x.expr(), &Expr::constant(1.0), &Expr::constant(-1.0));
        let f = CompiledFunction::compile_dense(&[e], &[x]).unwrap();
        assert_eq!(f.evaluate(&[0.3]).unwrap(), vec![1.0]);
        assert_eq!(f.evaluate(&[-0.3]).unwrap(), vec![-1.0]);
        assert_eq!(f.evaluate(&[0.0]).unwrap(), vec![-1.0]);
    }

    #[test]
    fn output_index_out_of_range() {
        let err = CompiledFunction::compile(&[(2, Expr::one())], 2, &[]).unwrap_err();
        assert_eq!(err, ExprError::OutputIndex { index: 2, len: 2 });
    }
}
