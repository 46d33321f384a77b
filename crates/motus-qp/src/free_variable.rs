//! Free variable model: one controlled scalar degree of freedom.

use std::collections::BTreeMap;

use motus_core::{ConfigError, Derivative, LimitError, MotusError, QpError};
use motus_expr::{EvaluationContext, Expr, Symbol};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default quadratic weight for a derivative.
pub const fn default_quadratic_weight(derivative: Derivative) -> f64 {
    match derivative {
        Derivative::Position | Derivative::Acceleration => 0.0,
        _ => 0.01,
    }
}

/// Default fraction of the weight applied at horizon step 0.
pub const fn default_horizon_function(derivative: Derivative) -> f64 {
    match derivative {
        Derivative::Velocity | Derivative::Acceleration | Derivative::Jerk => 0.1,
        _ => 1e-5,
    }
}

// ---------------------------------------------------------------------------
// FreeVariable
// ---------------------------------------------------------------------------

/// A controlled scalar with per-derivative symbols, limits and weights.
#[derive(Debug, Clone)]
pub struct FreeVariable {
    name: String,
    symbols: BTreeMap<Derivative, Symbol>,
    lower_limits: BTreeMap<Derivative, f64>,
    upper_limits: BTreeMap<Derivative, f64>,
    lower_overrides: BTreeMap<Derivative, Expr>,
    upper_overrides: BTreeMap<Derivative, Expr>,
    quadratic_weights: BTreeMap<Derivative, f64>,
    horizon_functions: BTreeMap<Derivative, f64>,
}

impl FreeVariable {
    /// Start building a free variable. Symbols for every derivative are named
    /// `"{name}/{derivative}"`.
    pub fn builder(name: impl Into<String>) -> FreeVariableBuilder {
        FreeVariableBuilder {
            variable: Self::unchecked(name.into()),
        }
    }

    fn unchecked(name: String) -> Self {
        let symbols = Derivative::ALL
            .into_iter()
            .map(|d| (d, Symbol::new(format!("{name}/{d}"))))
            .collect();
        Self {
            name,
            symbols,
            lower_limits: BTreeMap::new(),
            upper_limits: BTreeMap::new(),
            lower_overrides: BTreeMap::new(),
            upper_overrides: BTreeMap::new(),
            quadratic_weights: BTreeMap::new(),
            horizon_functions: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The live symbol for `derivative`.
    pub fn get_symbol(&self, derivative: Derivative) -> Result<&Symbol, LimitError> {
        self.symbols
            .get(&derivative)
            .ok_or_else(|| LimitError::UnknownDerivative {
                variable: self.name.clone(),
                derivative,
            })
    }

    /// Symbols of every derivative, lowest first.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    fn has_lower(&self, d: Derivative) -> bool {
        self.lower_limits.contains_key(&d) || self.lower_overrides.contains_key(&d)
    }

    fn has_upper(&self, d: Derivative) -> bool {
        self.upper_limits.contains_key(&d) || self.upper_overrides.contains_key(&d)
    }

    /// Lower limit, combining default and override via max.
    pub fn lower_limit(&self, derivative: Derivative, use_override: bool) -> Result<Expr, LimitError> {
        let default = self.lower_limits.get(&derivative).map(|v| Expr::constant(*v));
        let over = if use_override {
            self.lower_overrides.get(&derivative).cloned()
        } else {
            None
        };
        match (default, over) {
            (Some(a), Some(b)) => Ok(a.max(&b)),
            (Some(a), None) | (None, Some(a)) => Ok(a),
            (None, None) => Err(LimitError::LimitNotDefined {
                variable: self.name.clone(),
                derivative,
                bound: "lower",
            }),
        }
    }

    /// Upper limit, combining default and override via min.
    pub fn upper_limit(&self, derivative: Derivative, use_override: bool) -> Result<Expr, LimitError> {
        let default = self.upper_limits.get(&derivative).map(|v| Expr::constant(*v));
        let over = if use_override {
            self.upper_overrides.get(&derivative).cloned()
        } else {
            None
        };
        match (default, over) {
            (Some(a), Some(b)) => Ok(a.min(&b)),
            (Some(a), None) | (None, Some(a)) => Ok(a),
            (None, None) => Err(LimitError::LimitNotDefined {
                variable: self.name.clone(),
                derivative,
                bound: "upper",
            }),
        }
    }

    /// Lower limit resolved against the current values in `ctx`.
    pub fn evaluated_lower_limit(
        &self,
        derivative: Derivative,
        use_override: bool,
        ctx: &EvaluationContext,
    ) -> Result<f64, QpError> {
        Ok(ctx.evaluate(&self.lower_limit(derivative, use_override)?)?)
    }

    /// Upper limit resolved against the current values in `ctx`.
    pub fn evaluated_upper_limit(
        &self,
        derivative: Derivative,
        use_override: bool,
        ctx: &EvaluationContext,
    ) -> Result<f64, QpError> {
        Ok(ctx.evaluate(&self.upper_limit(derivative, use_override)?)?)
    }

    pub fn has_position_limits(&self) -> bool {
        self.has_lower(Derivative::Position) && self.has_upper(Derivative::Position)
    }

    /// True if the variable has no position limits (e.g. a continuous joint).
    pub fn is_continuous(&self) -> bool {
        !self.has_position_limits()
    }

    /// Highest derivative `d >= velocity` with limits on every order from
    /// velocity through `d`.
    pub fn order(&self) -> Derivative {
        let mut order = Derivative::Velocity;
        for d in Derivative::range(Derivative::Velocity, Derivative::Snap) {
            if self.has_lower(d) && self.has_upper(d) {
                order = d;
            } else {
                break;
            }
        }
        order
    }

    pub fn quadratic_weight(&self, derivative: Derivative) -> f64 {
        self.quadratic_weights
            .get(&derivative)
            .copied()
            .unwrap_or_else(|| default_quadratic_weight(derivative))
    }

    pub fn horizon_function(&self, derivative: Derivative) -> f64 {
        self.horizon_functions
            .get(&derivative)
            .copied()
            .unwrap_or_else(|| default_horizon_function(derivative))
    }

    /// Weight of `derivative` at horizon `step`, ramped linearly from
    /// `weight * horizon_function` at step 0 to `weight` at the last step, and
    /// divided by the squared upper limit.
    pub fn normalized_weight(
        &self,
        step: usize,
        derivative: Derivative,
        horizon: usize,
    ) -> Result<Expr, LimitError> {
        let upper = self.upper_limit(derivative, true)?;
        if upper.is_zero() {
            return Err(LimitError::ZeroLimit {
                variable: self.name.clone(),
                derivative,
            });
        }
        let weight = self.quadratic_weight(derivative);
        #[allow(clippy::cast_precision_loss)]
        let weight = if horizon > 1 {
            let start = weight * self.horizon_function(derivative);
            let slope = (weight - start) / (horizon - 1) as f64;
            start + slope * step as f64
        } else {
            weight
        };
        Ok(weight / (&upper * &upper))
    }

    /// Replace the override lower limit of `derivative`.
    pub fn set_lower_limit(&mut self, derivative: Derivative, limit: Expr) {
        self.lower_overrides.insert(derivative, limit);
    }

    /// Replace the override upper limit of `derivative`.
    pub fn set_upper_limit(&mut self, derivative: Derivative, limit: Expr) {
        self.upper_overrides.insert(derivative, limit);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`FreeVariable`].
#[derive(Debug, Clone)]
pub struct FreeVariableBuilder {
    variable: FreeVariable,
}

impl FreeVariableBuilder {
    /// Default lower/upper limits for `derivative`.
    #[must_use]
    pub fn limits(mut self, derivative: Derivative, lower: f64, upper: f64) -> Self {
        self.variable.lower_limits.insert(derivative, lower);
        self.variable.upper_limits.insert(derivative, upper);
        self
    }

    /// Symmetric limits `[-limit, limit]`.
    #[must_use]
    pub fn symmetric_limit(self, derivative: Derivative, limit: f64) -> Self {
        self.limits(derivative, -limit, limit)
    }

    /// Override limits, combined with the defaults via max/min.
    #[must_use]
    pub fn override_limits(mut self, derivative: Derivative, lower: Expr, upper: Expr) -> Self {
        self.variable.lower_overrides.insert(derivative, lower);
        self.variable.upper_overrides.insert(derivative, upper);
        self
    }

    #[must_use]
    pub fn weight(mut self, derivative: Derivative, weight: f64) -> Self {
        self.variable.quadratic_weights.insert(derivative, weight);
        self
    }

    #[must_use]
    pub fn horizon_function(mut self, derivative: Derivative, start_fraction: f64) -> Self {
        self.variable
            .horizon_functions
            .insert(derivative, start_fraction);
        self
    }

    /// Finish; velocity limits are mandatory.
    pub fn build(self) -> Result<FreeVariable, LimitError> {
        let v = self.variable;
        if !v.has_lower(Derivative::Velocity) {
            return Err(LimitError::LimitNotDefined {
                variable: v.name,
                derivative: Derivative::Velocity,
                bound: "lower",
            });
        }
        if !v.has_upper(Derivative::Velocity) {
            return Err(LimitError::LimitNotDefined {
                variable: v.name,
                derivative: Derivative::Velocity,
                bound: "upper",
            });
        }
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// FreeVariableConfig
// ---------------------------------------------------------------------------

/// Serde description of a free variable. Map keys are derivative names
/// (`"position"`, `"velocity"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeVariableConfig {
    pub name: String,

    #[serde(default)]
    pub lower_limits: BTreeMap<String, f64>,

    #[serde(default)]
    pub upper_limits: BTreeMap<String, f64>,

    #[serde(default)]
    pub quadratic_weights: BTreeMap<String, f64>,

    #[serde(default)]
    pub horizon_functions: BTreeMap<String, f64>,
}

impl FreeVariableConfig {
    fn parse_key(&self, key: &str) -> Result<Derivative, ConfigError> {
        key.parse().map_err(|message| ConfigError::InvalidValue {
            field: format!("{}.{key}", self.name),
            message,
        })
    }

    /// Build the free variable; a derivative needs both bounds to be used.
    pub fn build(&self) -> Result<FreeVariable, MotusError> {
        let mut builder = FreeVariable::builder(self.name.clone());
        for (key, lower) in &self.lower_limits {
            let d = self.parse_key(key)?;
            let upper = self
                .upper_limits
                .get(key)
                .ok_or_else(|| LimitError::LimitNotDefined {
                    variable: self.name.clone(),
                    derivative: d,
                    bound: "upper",
                })?;
            builder = builder.limits(d, *lower, *upper);
        }
        if let Some(key) = self
            .upper_limits
            .keys()
            .find(|k| !self.lower_limits.contains_key(*k))
        {
            return Err(LimitError::LimitNotDefined {
                variable: self.name.clone(),
                derivative: self.parse_key(key)?,
                bound: "lower",
            }
            .into());
        }
        for (key, w) in &self.quadratic_weights {
            builder = builder.weight(self.parse_key(key)?, *w);
        }
        for (key, f) in &self.horizon_functions {
            builder = builder.horizon_function(self.parse_key(key)?, *f);
        }
        Ok(builder.build()?)
    }
}
