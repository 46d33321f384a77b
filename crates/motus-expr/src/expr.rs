//! Expression DAG and its constructors.
//!
//! Nodes are immutable and shared through `Arc`, so cloning an expression is
//! cheap and a sub-expression reused in several places is stored (and later
//! compiled) once. Constructors fold constant operands and drop neutral
//! elements; this keeps Jacobians of sparse constraint rows structurally zero,
//! which the matrix assembler relies on to skip entries.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::symbol::Symbol;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Sqrt,
    Abs,
    Acos,
    Exp,
    Ln,
    Floor,
    Ceil,
    Sign,
}

impl UnaryOp {
    /// Apply the operation to a number.
    pub fn apply(self, a: f64) -> f64 {
        match self {
            Self::Neg => -a,
            Self::Sin => a.sin(),
            Self::Cos => a.cos(),
            Self::Sqrt => a.sqrt(),
            Self::Abs => a.abs(),
            Self::Acos => a.acos(),
            Self::Exp => a.exp(),
            Self::Ln => a.ln(),
            Self::Floor => a.floor(),
            Self::Ceil => a.ceil(),
            Self::Sign => {
                if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
            Self::Acos => "acos",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Sign => "sign",
        }
    }
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Atan2,
    Fmod,
    /// 1.0 if `a > b`, else 0.0.
    Greater,
    /// 1.0 if `a < b`, else 0.0.
    Less,
}

impl BinaryOp {
    /// Apply the operation to two numbers.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Pow => a.powf(b),
            Self::Min => a.min(b),
            Self::Max => a.max(b),
            Self::Atan2 => a.atan2(b),
            Self::Fmod => a % b,
            Self::Greater => f64::from(u8::from(a > b)),
            Self::Less => f64::from(u8::from(a < b)),
        }
    }

    const fn infix(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("+"),
            Self::Sub => Some("-"),
            Self::Mul => Some("*"),
            Self::Div => Some("/"),
            Self::Pow => Some("^"),
            Self::Greater => Some(">"),
            Self::Less => Some("<"),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Atan2 => "atan2",
            Self::Fmod => "fmod",
            _ => "?",
        }
    }
}

// ---------------------------------------------------------------------------
// Expr
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum Node {
    Const(f64),
    Symbol(Symbol),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    /// `then` if `cond > 0`, else `otherwise`.
    IfGreaterZero(Expr, Expr, Expr),
}

/// A scalar symbolic expression.
#[derive(Clone)]
pub struct Expr(pub(crate) Arc<Node>);

impl Expr {
    /// A constant.
    pub fn constant(value: f64) -> Self {
        Self(Arc::new(Node::Const(value)))
    }

    pub fn zero() -> Self {
        Self::constant(0.0)
    }

    pub fn one() -> Self {
        Self::constant(1.0)
    }

    /// A free symbol.
    pub fn symbol(symbol: &Symbol) -> Self {
        Self(Arc::new(Node::Symbol(symbol.clone())))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    pub(crate) fn ptr(&self) -> *const Node {
        Arc::as_ptr(&self.0)
    }

    /// The constant value if this expression is a constant.
    pub fn as_const(&self) -> Option<f64> {
        match self.node() {
            Node::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// The symbol if this expression is a bare symbol.
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self.node() {
            Node::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// True if the expression is the constant zero.
    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0.0)
    }

    /// True if the expression is the constant one.
    pub fn is_one(&self) -> bool {
        self.as_const() == Some(1.0)
    }

    /// True if both expressions share the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn unary(op: UnaryOp, a: Self) -> Self {
        if let Some(x) = a.as_const() {
            return Self::constant(op.apply(x));
        }
        if op == UnaryOp::Neg {
            if let Node::Unary(UnaryOp::Neg, inner) = a.node() {
                return inner.clone();
            }
        }
        Self(Arc::new(Node::Unary(op, a)))
    }

    pub(crate) fn binary(op: BinaryOp, a: Self, b: Self) -> Self {
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return Self::constant(op.apply(x, y));
        }
        match op {
            BinaryOp::Add => {
                if a.is_zero() {
                    return b;
                }
                if b.is_zero() {
                    return a;
                }
            }
            BinaryOp::Sub => {
                if b.is_zero() {
                    return a;
                }
                if a.is_zero() {
                    return Self::unary(UnaryOp::Neg, b);
                }
                if a.ptr_eq(&b) {
                    return Self::zero();
                }
            }
            BinaryOp::Mul => {
                if a.is_zero() || b.is_zero() {
                    return Self::zero();
                }
                if a.is_one() {
                    return b;
                }
                if b.is_one() {
                    return a;
                }
                if a.as_const() == Some(-1.0) {
                    return Self::unary(UnaryOp::Neg, b);
                }
                if b.as_const() == Some(-1.0) {
                    return Self::unary(UnaryOp::Neg, a);
                }
            }
            BinaryOp::Div => {
                if a.is_zero() {
                    return Self::zero();
                }
                if b.is_one() {
                    return a;
                }
            }
            BinaryOp::Pow => {
                if b.is_zero() {
                    return Self::one();
                }
                if b.is_one() {
                    return a;
                }
            }
            _ => {}
        }
        Self(Arc::new(Node::Binary(op, a, b)))
    }

    // -- elementary functions ------------------------------------------------

    pub fn sin(&self) -> Self {
        Self::unary(UnaryOp::Sin, self.clone())
    }

    pub fn cos(&self) -> Self {
        Self::unary(UnaryOp::Cos, self.clone())
    }

    pub fn sqrt(&self) -> Self {
        Self::unary(UnaryOp::Sqrt, self.clone())
    }

    pub fn abs(&self) -> Self {
        Self::unary(UnaryOp::Abs, self.clone())
    }

    pub fn acos(&self) -> Self {
        Self::unary(UnaryOp::Acos, self.clone())
    }

    pub fn exp(&self) -> Self {
        Self::unary(UnaryOp::Exp, self.clone())
    }

    pub fn ln(&self) -> Self {
        Self::unary(UnaryOp::Ln, self.clone())
    }

    pub fn floor(&self) -> Self {
        Self::unary(UnaryOp::Floor, self.clone())
    }

    pub fn ceil(&self) -> Self {
        Self::unary(UnaryOp::Ceil, self.clone())
    }

    pub fn sign(&self) -> Self {
        Self::unary(UnaryOp::Sign, self.clone())
    }

    pub fn powf(&self, exponent: f64) -> Self {
        Self::binary(BinaryOp::Pow, self.clone(), Self::constant(exponent))
    }

    pub fn pow(&self, exponent: &Self) -> Self {
        Self::binary(BinaryOp::Pow, self.clone(), exponent.clone())
    }

    pub fn min(&self, other: &Self) -> Self {
        Self::binary(BinaryOp::Min, self.clone(), other.clone())
    }

    pub fn max(&self, other: &Self) -> Self {
        Self::binary(BinaryOp::Max, self.clone(), other.clone())
    }

    /// `atan2(self, x)`.
    pub fn atan2(&self, x: &Self) -> Self {
        Self::binary(BinaryOp::Atan2, self.clone(), x.clone())
    }

    pub fn fmod(&self, modulus: &Self) -> Self {
        Self::binary(BinaryOp::Fmod, self.clone(), modulus.clone())
    }

    /// 1.0 where `self > other`, else 0.0.
    pub fn greater(&self, other: &Self) -> Self {
        Self::binary(BinaryOp::Greater, self.clone(), other.clone())
    }

    /// 1.0 where `self < other`, else 0.0.
    pub fn less(&self, other: &Self) -> Self {
        Self::binary(BinaryOp::Less, self.clone(), other.clone())
    }

    /// `then` where `cond > 0`, else `otherwise`.
    pub fn if_greater_zero(cond: &Self, then: &Self, otherwise: &Self) -> Self {
        if let Some(c) = cond.as_const() {
            return if c > 0.0 { then.clone() } else { otherwise.clone() };
        }
        if then.ptr_eq(otherwise) {
            return then.clone();
        }
        if let (Some(a), Some(b)) = (then.as_const(), otherwise.as_const()) {
            if a.to_bits() == b.to_bits() {
                return then.clone();
            }
        }
        Self(Arc::new(Node::IfGreaterZero(
            cond.clone(),
            then.clone(),
            otherwise.clone(),
        )))
    }

    /// Clamp into `[lower, upper]`.
    pub fn limit(&self, lower: &Self, upper: &Self) -> Self {
        lower.max(&self.min(upper))
    }

    /// Round toward +inf at the given number of decimals.
    pub fn round_up(&self, decimals: i32) -> Self {
        let scale = 10f64.powi(decimals);
        (self * scale).ceil() / scale
    }

    /// Round toward -inf at the given number of decimals.
    pub fn round_down(&self, decimals: i32) -> Self {
        let scale = 10f64.powi(decimals);
        (self * scale).floor() / scale
    }

    /// Logical and of 0/1 valued expressions.
    pub fn logic_and(&self, other: &Self) -> Self {
        self * other
    }

    /// Logical not of a 0/1 valued expression.
    pub fn logic_not(&self) -> Self {
        1.0 - self
    }

    /// Symbols this expression depends on, sorted by name.
    pub fn free_symbols(&self) -> Vec<Symbol> {
        free_symbols(std::slice::from_ref(self))
    }
}

/// Symbols the given expressions depend on, sorted by name and deduplicated.
pub fn free_symbols(exprs: &[Expr]) -> Vec<Symbol> {
    let mut visited: HashSet<*const Node> = HashSet::new();
    let mut found: Vec<Symbol> = Vec::new();
    let mut stack: Vec<&Expr> = exprs.iter().collect();
    while let Some(e) = stack.pop() {
        if !visited.insert(e.ptr()) {
            continue;
        }
        match e.node() {
            Node::Const(_) => {}
            Node::Symbol(s) => found.push(s.clone()),
            Node::Unary(_, a) => stack.push(a),
            Node::Binary(_, a, b) => {
                stack.push(a);
                stack.push(b);
            }
            Node::IfGreaterZero(c, a, b) => {
                stack.push(c);
                stack.push(a);
                stack.push(b);
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl From<&Symbol> for Expr {
    fn from(symbol: &Symbol) -> Self {
        Self::symbol(symbol)
    }
}

impl From<Symbol> for Expr {
    fn from(symbol: Symbol) -> Self {
        Self::symbol(&symbol)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Const(v) => write!(f, "{v}"),
            Node::Symbol(s) => write!(f, "{s}"),
            Node::Unary(UnaryOp::Neg, a) => write!(f, "(-{a})"),
            Node::Unary(op, a) => write!(f, "{}({a})", op.name()),
            Node::Binary(op, a, b) => match op.infix() {
                Some(sym) => write!(f, "({a} {sym} {b})"),
                None => write!(f, "{}({a}, {b})", op.name()),
            },
            Node::IfGreaterZero(c, a, b) => write!(f, "if_greater_zero({c}, {a}, {b})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Operator overloads
// ---------------------------------------------------------------------------

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self, rhs.clone())
            }
        }
        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }
        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self, Expr::constant(rhs))
            }
        }
        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self.clone(), Expr::constant(rhs))
            }
        }
        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::constant(self), rhs)
            }
        }
        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, Expr::constant(self), rhs.clone())
            }
        }
    };
}

impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self.clone())
    }
}

impl std::iter::Sum for Expr {
    fn sum<I: Iterator<Item = Expr>>(iter: I) -> Self {
        iter.fold(Expr::zero(), |acc, e| acc + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_fold() {
        let e = Expr::constant(2.0) * 3.0 + 1.0;
        assert_eq!(e.as_const(), Some(7.0));
    }

    #[test]
    fn multiplication_by_zero_is_structural_zero() {
        let q = Symbol::new("q").expr();
        assert!((&q * 0.0).is_zero());
        assert!((0.0 * q.sin()).is_zero());
    }

    #[test]
    fn neutral_elements_are_dropped() {
        let q = Symbol::new("q").expr();
        assert!((&q + 0.0).ptr_eq(&q));
        assert!((&q * 1.0).ptr_eq(&q));
        assert!((&q - &q).is_zero());
        assert!((-(-q.clone())).ptr_eq(&q));
    }

    #[test]
    fn free_symbols_are_sorted_and_unique() {
        let b = Symbol::new("b");
        let a = Symbol::new("a");
        let e = b.expr() * a.expr() + b.expr().sin();
        assert_eq!(e.free_symbols(), vec![a, b]);
    }

    #[test]
    fn constant_condition_selects_branch() {
        let q = Symbol::new("q").expr();
        let r = Expr::if_greater_zero(&Expr::constant(-1.0), &q, &Expr::one());
        assert!(r.is_one());
    }

    #[test]
    fn rounding_of_constants() {
        let up = Expr::constant(0.123_41).round_up(3);
        let down = Expr::constant(0.123_41).round_down(3);
        approx::assert_relative_eq!(up.as_const().unwrap(), 0.124, epsilon = 1e-12);
        approx::assert_relative_eq!(down.as_const().unwrap(), 0.123, epsilon = 1e-12);
    }

    #[test]
    fn display_is_readable() {
        let q = Symbol::new("q").expr();
        assert_eq!((&q * 2.0).to_string(), "(q * 2)");
    }
}
