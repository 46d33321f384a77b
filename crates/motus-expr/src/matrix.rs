use crate::expr::Expr;

/// A dense row-major matrix of expressions.
///
/// Used where an API accepts "an expression" that may turn out to be
/// vector-valued, so the shape can be checked at registration time.
#[derive(Debug, Clone)]
pub struct ExprMatrix {
    rows: usize,
    cols: usize,
    data: Vec<Expr>,
}

impl ExprMatrix {
    /// Build from row-major data. Returns `None` when `data.len() != rows * cols`.
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<Expr>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    /// A column vector.
    pub fn column(data: Vec<Expr>) -> Self {
        Self {
            rows: data.len(),
            cols: 1,
            data,
        }
    }

    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub const fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Expr> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// The single entry of a 1x1 matrix.
    pub fn scalar(&self) -> Option<&Expr> {
        if self.is_scalar() { self.data.first() } else { None }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expr> {
        self.data.iter()
    }
}

impl From<Expr> for ExprMatrix {
    fn from(e: Expr) -> Self {
        Self {
            rows: 1,
            cols: 1,
            data: vec![e],
        }
    }
}

impl From<&Expr> for ExprMatrix {
    fn from(e: &Expr) -> Self {
        Self::from(e.clone())
    }
}

impl From<f64> for ExprMatrix {
    fn from(v: f64) -> Self {
        Self::from(Expr::constant(v))
    }
}
