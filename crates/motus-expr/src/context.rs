//! Caller-owned symbol table holding live numeric values.

use std::collections::HashMap;

use crate::compile::CompiledFunction;
use crate::error::ExprError;
use crate::expr::Expr;
use crate::symbol::Symbol;

/// Ordered table of symbol values supplied to compiled functions.
///
/// Symbols are append-only: once inserted a symbol keeps its slot, so a
/// [`Binding`] created earlier stays valid while values change and new symbols
/// are added. A binding is only valid for contexts with the same slot layout
/// for its parameters; [`rebind`](Self::rebind) checks this.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    symbols: Vec<Symbol>,
    index: HashMap<Symbol, usize>,
    values: Vec<f64>,
}

/// Precomputed slot indices of a parameter list inside a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    slots: Vec<usize>,
}

impl Binding {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol or overwrite its value.
    pub fn insert(&mut self, symbol: Symbol, value: f64) {
        if let Some(&slot) = self.index.get(&symbol) {
            self.values[slot] = value;
        } else {
            self.index.insert(symbol.clone(), self.symbols.len());
            self.symbols.push(symbol);
            self.values.push(value);
        }
    }

    /// Update the value of an existing symbol.
    pub fn set(&mut self, symbol: &Symbol, value: f64) -> Result<(), ExprError> {
        let slot = self
            .index
            .get(symbol)
            .ok_or_else(|| ExprError::UnboundSymbol(symbol.name().to_string()))?;
        self.values[*slot] = value;
        Ok(())
    }

    pub fn get(&self, symbol: &Symbol) -> Option<f64> {
        self.index.get(symbol).map(|&slot| self.values[slot])
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.index.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in insertion order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Resolve the slots of `params` once, for use with [`gather`](Self::gather).
    pub fn bind(&self, params: &[Symbol]) -> Result<Binding, ExprError> {
        let slots = params
            .iter()
            .map(|s| {
                self.index
                    .get(s)
                    .copied()
                    .ok_or_else(|| ExprError::UnboundSymbol(s.name().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Binding { slots })
    }

    /// True when every slot of `binding` holds the matching symbol of `params`.
    pub fn matches(&self, binding: &Binding, params: &[Symbol]) -> bool {
        binding.slots.len() == params.len()
            && binding
                .slots
                .iter()
                .zip(params)
                .all(|(&slot, p)| self.symbols.get(slot) == Some(p))
    }

    /// Reuse `cached` when it still matches this context, otherwise bind anew.
    pub fn rebind(&self, cached: Option<Binding>, params: &[Symbol]) -> Result<Binding, ExprError> {
        match cached {
            Some(binding) if self.matches(&binding, params) => Ok(binding),
            _ => self.bind(params),
        }
    }

    /// Write the bound values into `out` in parameter order.
    ///
    /// `binding` must match this context; see [`matches`](Self::matches).
    pub fn gather(&self, binding: &Binding, out: &mut Vec<f64>) {
        out.clear();
        out.extend(binding.slots.iter().map(|&slot| self.values[slot]));
    }

    /// Values of `params` in order.
    pub fn values_for(&self, params: &[Symbol]) -> Result<Vec<f64>, ExprError> {
        let binding = self.bind(params)?;
        let mut out = Vec::with_capacity(binding.len());
        self.gather(&binding, &mut out);
        Ok(out)
    }

    /// Evaluate a single expression against the current values.
    ///
    /// Compiles on every call; meant for build-time and diagnostic use, not the
    /// per-tick path.
    pub fn evaluate(&self, expr: &Expr) -> Result<f64, ExprError> {
        if let Some(v) = expr.as_const() {
            return Ok(v);
        }
        let params = expr.free_symbols();
        let f = CompiledFunction::compile_dense(std::slice::from_ref(expr), &params)?;
        let args = self.values_for(&params)?;
        Ok(f.evaluate(&args)?[0])
    }
}
