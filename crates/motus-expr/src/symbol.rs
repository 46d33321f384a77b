//! Named scalar symbols.

use std::fmt;
use std::sync::Arc;

use crate::expr::Expr;

/// A named scalar placeholder whose numeric value is supplied at evaluation
/// time.
///
/// Symbols compare, hash and order by name, so two symbols created from the
/// same string are interchangeable. Cloning is a reference-count bump.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Create a symbol with the given name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The symbol's name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Wrap the symbol in an expression.
    pub fn expr(&self) -> Expr {
        Expr::symbol(self)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
