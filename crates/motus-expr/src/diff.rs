//! Symbolic differentiation and Jacobians.
//!
//! Derivatives are computed by a memoized walk over the DAG, so shared
//! sub-expressions are differentiated once per call.

use std::collections::HashMap;

use crate::expr::{BinaryOp, Expr, Node, UnaryOp};
use crate::symbol::Symbol;

impl Expr {
    /// Partial derivative with respect to `symbol`.
    pub fn diff(&self, symbol: &Symbol) -> Self {
        let mut memo = HashMap::new();
        diff_rec(self, symbol, &mut memo)
    }
}

fn diff_rec(e: &Expr, s: &Symbol, memo: &mut HashMap<*const Node, Expr>) -> Expr {
    if let Some(d) = memo.get(&e.ptr()) {
        return d.clone();
    }
    let d = match e.node() {
        Node::Const(_) => Expr::zero(),
        Node::Symbol(sym) => {
            if sym == s {
                Expr::one()
            } else {
                Expr::zero()
            }
        }
        Node::Unary(op, a) => {
            let da = diff_rec(a, s, memo);
            if da.is_zero() {
                Expr::zero()
            } else {
                match op {
                    UnaryOp::Neg => -da,
                    UnaryOp::Sin => a.cos() * da,
                    UnaryOp::Cos => -(a.sin() * da),
                    UnaryOp::Sqrt => da / (e * 2.0),
                    UnaryOp::Abs => a.sign() * da,
                    UnaryOp::Acos => -(da / (1.0 - a * a).sqrt()),
                    UnaryOp::Exp => e * da,
                    UnaryOp::Ln => da / a,
                    UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Sign => Expr::zero(),
                }
            }
        }
        Node::Binary(op, a, b) => {
            let da = diff_rec(a, s, memo);
            let db = diff_rec(b, s, memo);
            if da.is_zero() && db.is_zero() {
                Expr::zero()
            } else {
                diff_binary(*op, e, a, b, da, db)
            }
        }
        Node::IfGreaterZero(c, a, b) => {
            let da = diff_rec(a, s, memo);
            let db = diff_rec(b, s, memo);
            Expr::if_greater_zero(c, &da, &db)
        }
    };
    memo.insert(e.ptr(), d.clone());
    d
}

fn diff_binary(op: BinaryOp, e: &Expr, a: &Expr, b: &Expr, da: Expr, db: Expr) -> Expr {
    match op {
        BinaryOp::Add => da + db,
        BinaryOp::Sub => da - db,
        BinaryOp::Mul => da * b + a * db,
        BinaryOp::Div => (da * b - a * db) / (b * b),
        BinaryOp::Pow => match b.as_const() {
            Some(c) => c * a.powf(c - 1.0) * da,
            None => e * (db * a.ln() + b * da / a),
        },
        BinaryOp::Min => Expr::if_greater_zero(&(b - a), &da, &db),
        BinaryOp::Max => Expr::if_greater_zero(&(a - b), &da, &db),
        BinaryOp::Atan2 => (b * da - a * db) / (a * a + b * b),
        BinaryOp::Fmod => da - (a / b).floor() * db,
        BinaryOp::Greater | BinaryOp::Less => Expr::zero(),
    }
}

/// Total time derivative `Σ ∂e/∂q_k · qd_k`.
pub fn total_derivative(e: &Expr, q: &[Symbol], qd: &[Symbol]) -> Expr {
    q.iter()
        .zip(qd)
        .map(|(qi, qdi)| e.diff(qi) * qdi.expr())
        .sum()
}

/// Second total time derivative
/// `Σ_i Σ_j ∂²e/∂q_i∂q_j · qd_i · qd_j + Σ_i ∂e/∂q_i · qdd_i`.
pub fn second_total_derivative(e: &Expr, q: &[Symbol], qd: &[Symbol], qdd: &[Symbol]) -> Expr {
    let mut result = Expr::zero();
    for (i, qi) in q.iter().enumerate() {
        let de = e.diff(qi);
        if de.is_zero() {
            continue;
        }
        for (j, qj) in q.iter().enumerate() {
            let dde = de.diff(qj);
            if !dde.is_zero() {
                result = result + dde * qd[i].expr() * qd[j].expr();
            }
        }
        result = result + de * qdd[i].expr();
    }
    result
}

/// Jacobian `J[i][j] = ∂exprs[i]/∂symbols[j]`.
pub fn jacobian(exprs: &[Expr], symbols: &[Symbol]) -> Vec<Vec<Expr>> {
    exprs
        .iter()
        .map(|e| symbols.iter().map(|s| e.diff(s)).collect())
        .collect()
}

/// Time derivative of the Jacobian of `exprs` w.r.t. `q`, given velocities `qd`.
pub fn jacobian_dot(exprs: &[Expr], q: &[Symbol], qd: &[Symbol]) -> Vec<Vec<Expr>> {
    jacobian(exprs, q)
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|entry| total_derivative(entry, q, qd))
                .collect()
        })
        .collect()
}

/// Second time derivative of the Jacobian of `exprs` w.r.t. `q`.
pub fn jacobian_ddot(
    exprs: &[Expr],
    q: &[Symbol],
    qd: &[Symbol],
    qdd: &[Symbol],
) -> Vec<Vec<Expr>> {
    jacobian(exprs, q)
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|entry| second_total_derivative(entry, q, qd, qdd))
                .collect()
        })
        .collect()
}
