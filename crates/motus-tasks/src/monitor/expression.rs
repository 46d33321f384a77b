//! Monitors whose state is a symbolic expression.

use motus_expr::Expr;

use super::time_symbol;

/// State from `expression > 0.5`, evaluated every tick while running.
#[derive(Debug, Clone)]
pub struct ExpressionMonitor {
    pub name: String,
    pub expression: Expr,
    pub stay_true: bool,
    pub start_monitors: Vec<String>,
}

impl ExpressionMonitor {
    /// A latching monitor without start conditions.
    pub fn new(name: impl Into<String>, expression: Expr) -> Self {
        Self {
            name: name.into(),
            expression,
            stay_true: true,
            start_monitors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_stay_true(mut self, stay_true: bool) -> Self {
        self.stay_true = stay_true;
        self
    }

    #[must_use]
    pub fn with_start_monitors(mut self, monitors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.start_monitors = monitors.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Expression helpers
// ---------------------------------------------------------------------------

/// 1 once the motion time exceeds `threshold` seconds.
pub fn time_above(threshold: f64) -> Expr {
    time_symbol().expr().greater(&Expr::constant(threshold))
}

/// 1 while `floor(time) % modulus == 0`.
pub fn alternator(modulus: f64) -> Expr {
    time_symbol()
        .expr()
        .floor()
        .fmod(&Expr::constant(modulus))
        .abs()
        .less(&Expr::constant(0.5))
}

/// 1 when every velocity magnitude is below `threshold`.
pub fn local_minimum_reached(velocities: &[Expr], threshold: f64) -> Expr {
    let threshold = Expr::constant(threshold);
    velocities
        .iter()
        .fold(Expr::one(), |acc, v| acc * v.abs().less(&threshold))
}
