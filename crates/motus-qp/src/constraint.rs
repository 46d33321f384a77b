//! Constraint records consumed by the horizon assembler.
//!
//! Task constraints (equality and inequality) act on the integral of the
//! decision velocities and share one representation, [`IntegralConstraint`].
//! [`DerivativeConstraint`]s bound a derivative of an expression directly at
//! every horizon step.

use std::fmt;
use std::sync::Arc;

use motus_core::{Derivative, GoalInitializationError};
use motus_expr::Expr;
use tracing::warn;

/// Per-step reweighting applied to a derivative constraint's normalized
/// weight: `f(weight, step) -> weight`.
pub type HorizonFunction = Arc<dyn Fn(&Expr, usize) -> Expr + Send + Sync>;

/// Resolve a requested control horizon against the prediction horizon.
///
/// `None` means the full horizon. Zero is rejected; values above the
/// prediction horizon are clamped with a warning.
pub fn resolve_control_horizon(
    name: &str,
    requested: Option<usize>,
    prediction_horizon: usize,
) -> Result<usize, GoalInitializationError> {
    match requested {
        None => Ok(prediction_horizon),
        Some(0) => Err(GoalInitializationError::InvalidControlHorizon {
            name: name.to_string(),
            value: 0,
        }),
        Some(ch) if ch > prediction_horizon => {
            warn!(
                constraint = name,
                control_horizon = ch,
                prediction_horizon,
                "control horizon exceeds prediction horizon, clamping"
            );
            Ok(prediction_horizon)
        }
        Some(ch) => Ok(ch),
    }
}

// ---------------------------------------------------------------------------
// Task constraints
// ---------------------------------------------------------------------------

/// Drive `expression` to `bound` (a derivative goal per control cycle).
#[derive(Debug, Clone)]
pub struct EqualityConstraint {
    pub name: String,
    pub expression: Expr,
    pub bound: Expr,
    /// Used for weight normalization and to clip the per-cycle error.
    pub reference_velocity: Expr,
    pub quadratic_weight: Expr,
    pub lower_slack_limit: Expr,
    pub upper_slack_limit: Expr,
    pub control_horizon: Option<usize>,
}

impl EqualityConstraint {
    pub fn new(
        name: impl Into<String>,
        expression: Expr,
        bound: impl Into<Expr>,
        reference_velocity: impl Into<Expr>,
        quadratic_weight: impl Into<Expr>,
    ) -> Self {
        Self {
            name: name.into(),
            expression,
            bound: bound.into(),
            reference_velocity: reference_velocity.into(),
            quadratic_weight: quadratic_weight.into(),
            lower_slack_limit: Expr::constant(f64::NEG_INFINITY),
            upper_slack_limit: Expr::constant(f64::INFINITY),
            control_horizon: None,
        }
    }

    #[must_use]
    pub fn with_slack_limits(mut self, lower: impl Into<Expr>, upper: impl Into<Expr>) -> Self {
        self.lower_slack_limit = lower.into();
        self.upper_slack_limit = upper.into();
        self
    }

    #[must_use]
    pub const fn with_control_horizon(mut self, control_horizon: usize) -> Self {
        self.control_horizon = Some(control_horizon);
        self
    }
}

/// Keep `expression` within `[lower_error, upper_error]` per control cycle.
#[derive(Debug, Clone)]
pub struct InequalityConstraint {
    pub name: String,
    pub expression: Expr,
    pub lower_error: Expr,
    pub upper_error: Expr,
    pub reference_velocity: Expr,
    pub quadratic_weight: Expr,
    pub lower_slack_limit: Expr,
    pub upper_slack_limit: Expr,
    pub control_horizon: Option<usize>,
}

impl InequalityConstraint {
    pub fn new(
        name: impl Into<String>,
        expression: Expr,
        lower_error: impl Into<Expr>,
        upper_error: impl Into<Expr>,
        reference_velocity: impl Into<Expr>,
        quadratic_weight: impl Into<Expr>,
    ) -> Self {
        Self {
            name: name.into(),
            expression,
            lower_error: lower_error.into(),
            upper_error: upper_error.into(),
            reference_velocity: reference_velocity.into(),
            quadratic_weight: quadratic_weight.into(),
            lower_slack_limit: Expr::constant(f64::NEG_INFINITY),
            upper_slack_limit: Expr::constant(f64::INFINITY),
            control_horizon: None,
        }
    }

    #[must_use]
    pub fn with_slack_limits(mut self, lower: impl Into<Expr>, upper: impl Into<Expr>) -> Self {
        self.lower_slack_limit = lower.into();
        self.upper_slack_limit = upper.into();
        self
    }

    #[must_use]
    pub const fn with_control_horizon(mut self, control_horizon: usize) -> Self {
        self.control_horizon = Some(control_horizon);
        self
    }
}

/// Common form of equality and inequality task constraints.
#[derive(Debug, Clone)]
pub struct IntegralConstraint {
    pub name: String,
    pub expression: Expr,
    pub lower_error: Expr,
    pub upper_error: Expr,
    pub reference_velocity: Expr,
    pub quadratic_weight: Expr,
    pub lower_slack_limit: Expr,
    pub upper_slack_limit: Expr,
    pub control_horizon: Option<usize>,
}

impl IntegralConstraint {
    /// `weight / reference_velocity²`.
    pub fn normalized_weight(&self) -> Expr {
        &self.quadratic_weight / (&self.reference_velocity * &self.reference_velocity)
    }
}

impl From<EqualityConstraint> for IntegralConstraint {
    fn from(c: EqualityConstraint) -> Self {
        Self {
            name: c.name,
            expression: c.expression,
            lower_error: c.bound.clone(),
            upper_error: c.bound,
            reference_velocity: c.reference_velocity,
            quadratic_weight: c.quadratic_weight,
            lower_slack_limit: c.lower_slack_limit,
            upper_slack_limit: c.upper_slack_limit,
            control_horizon: c.control_horizon,
        }
    }
}

impl From<InequalityConstraint> for IntegralConstraint {
    fn from(c: InequalityConstraint) -> Self {
        Self {
            name: c.name,
            expression: c.expression,
            lower_error: c.lower_error,
            upper_error: c.upper_error,
            reference_velocity: c.reference_velocity,
            quadratic_weight: c.quadratic_weight,
            lower_slack_limit: c.lower_slack_limit,
            upper_slack_limit: c.upper_slack_limit,
            control_horizon: c.control_horizon,
        }
    }
}

// ---------------------------------------------------------------------------
// Derivative constraints
// ---------------------------------------------------------------------------

/// A value given once for the whole horizon or per step.
#[derive(Debug, Clone)]
pub enum HorizonValues {
    Constant(Expr),
    /// One value per step; steps past the end reuse the last value.
    PerStep(Vec<Expr>),
}

impl HorizonValues {
    pub fn at(&self, step: usize) -> Expr {
        match self {
            Self::Constant(e) => e.clone(),
            Self::PerStep(values) => values
                .get(step)
                .or_else(|| values.last())
                .cloned()
                .unwrap_or_else(Expr::zero),
        }
    }
}

impl From<Expr> for HorizonValues {
    fn from(e: Expr) -> Self {
        Self::Constant(e)
    }
}

impl From<f64> for HorizonValues {
    fn from(v: f64) -> Self {
        Self::Constant(Expr::constant(v))
    }
}

impl From<Vec<Expr>> for HorizonValues {
    fn from(values: Vec<Expr>) -> Self {
        Self::PerStep(values)
    }
}

/// Bounds on the velocity, acceleration or jerk of an expression.
#[derive(Clone)]
pub struct DerivativeConstraint {
    pub name: String,
    pub derivative: Derivative,
    pub expression: Expr,
    pub lower_limit: HorizonValues,
    pub upper_limit: HorizonValues,
    pub quadratic_weight: Expr,
    pub normalization_factor: Expr,
    pub lower_slack_limit: HorizonValues,
    pub upper_slack_limit: HorizonValues,
    pub control_horizon: Option<usize>,
    pub horizon_function: Option<HorizonFunction>,
}

/// Default slack bound of derivative constraints.
pub const DERIVATIVE_SLACK_LIMIT: f64 = 1e4;

impl DerivativeConstraint {
    pub fn new(
        name: impl Into<String>,
        derivative: Derivative,
        expression: Expr,
        lower_limit: impl Into<HorizonValues>,
        upper_limit: impl Into<HorizonValues>,
        quadratic_weight: impl Into<Expr>,
        normalization_factor: impl Into<Expr>,
    ) -> Self {
        Self {
            name: name.into(),
            derivative,
            expression,
            lower_limit: lower_limit.into(),
            upper_limit: upper_limit.into(),
            quadratic_weight: quadratic_weight.into(),
            normalization_factor: normalization_factor.into(),
            lower_slack_limit: HorizonValues::from(-DERIVATIVE_SLACK_LIMIT),
            upper_slack_limit: HorizonValues::from(DERIVATIVE_SLACK_LIMIT),
            control_horizon: None,
            horizon_function: None,
        }
    }

    #[must_use]
    pub fn with_slack_limits(
        mut self,
        lower: impl Into<HorizonValues>,
        upper: impl Into<HorizonValues>,
    ) -> Self {
        self.lower_slack_limit = lower.into();
        self.upper_slack_limit = upper.into();
        self
    }

    #[must_use]
    pub const fn with_control_horizon(mut self, control_horizon: usize) -> Self {
        self.control_horizon = Some(control_horizon);
        self
    }

    #[must_use]
    pub fn with_horizon_function(mut self, f: HorizonFunction) -> Self {
        self.horizon_function = Some(f);
        self
    }

    /// `hf(weight / normalization_factor², step)`.
    pub fn normalized_weight(&self, step: usize) -> Expr {
        let weight = &self.quadratic_weight
            / (&self.normalization_factor * &self.normalization_factor);
        match &self.horizon_function {
            Some(f) => f(&weight, step),
            None => weight,
        }
    }

    /// Reject kinds the assembler cannot place and empty per-step lists.
    pub fn validate(&self) -> Result<(), GoalInitializationError> {
        if !matches!(
            self.derivative,
            Derivative::Velocity | Derivative::Acceleration | Derivative::Jerk
        ) {
            return Err(GoalInitializationError::Unsupported {
                name: self.name.clone(),
                message: format!("no derivative constraints on {}", self.derivative),
            });
        }
        for values in [
            &self.lower_limit,
            &self.upper_limit,
            &self.lower_slack_limit,
            &self.upper_slack_limit,
        ] {
            if matches!(values, HorizonValues::PerStep(v) if v.is_empty()) {
                return Err(GoalInitializationError::LengthMismatch {
                    name: self.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DerivativeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivativeConstraint")
            .field("name", &self.name)
            .field("derivative", &self.derivative)
            .field("expression", &self.expression)
            .field("lower_limit", &self.lower_limit)
            .field("upper_limit", &self.upper_limit)
            .field("quadratic_weight", &self.quadratic_weight)
            .field("normalization_factor", &self.normalization_factor)
            .field("control_horizon", &self.control_horizon)
            .field("horizon_function", &self.horizon_function.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use motus_expr::Symbol;

    #[test]
    fn control_horizon_defaults_to_prediction_horizon() {
        assert_eq!(resolve_control_horizon("c", None, 7).unwrap(), 7);
    }

    #[test]
    fn control_horizon_zero_is_rejected() {
        assert!(matches!(
            resolve_control_horizon("c", Some(0), 7),
            Err(GoalInitializationError::InvalidControlHorizon { value: 0, .. })
        ));
    }

    #[test]
    fn control_horizon_is_clamped() {
        assert_eq!(resolve_control_horizon("c", Some(12), 7).unwrap(), 7);
        assert_eq!(resolve_control_horizon("c", Some(3), 7).unwrap(), 3);
    }

    #[test]
    fn equality_becomes_two_sided_integral() {
        let q = Symbol::new("q");
        let c: IntegralConstraint = EqualityConstraint::new("goal", q.expr(), 0.5, 1.0, 2.0).into();
        assert_eq!(c.lower_error.as_const(), Some(0.5));
        assert_eq!(c.upper_error.as_const(), Some(0.5));
        assert_relative_eq!(c.normalized_weight().as_const().unwrap(), 2.0);
    }

    #[test]
    fn integral_weight_normalized_by_reference_velocity() {
        let q = Symbol::new("q");
        let c: IntegralConstraint =
            InequalityConstraint::new("range", q.expr(), -0.1, 0.1, 0.5, 1.0).into();
        assert_relative_eq!(c.normalized_weight().as_const().unwrap(), 4.0);
    }

    #[test]
    fn derivative_weight_uses_horizon_function() {
        let q = Symbol::new("q");
        #[allow(clippy::cast_precision_loss)]
        let c = DerivativeConstraint::new("vel", Derivative::Velocity, q.expr(), -1.0, 1.0, 1.0, 2.0)
            .with_horizon_function(Arc::new(|w: &Expr, t: usize| w * (t as f64 + 1.0)));
        assert_relative_eq!(c.normalized_weight(0).as_const().unwrap(), 0.25);
        assert_relative_eq!(c.normalized_weight(2).as_const().unwrap(), 0.75);
    }

    #[test]
    fn per_step_values_reuse_last() {
        let v = HorizonValues::from(vec![Expr::constant(1.0), Expr::constant(2.0)]);
        assert_eq!(v.at(0).as_const(), Some(1.0));
        assert_eq!(v.at(5).as_const(), Some(2.0));
    }

    #[test]
    fn position_derivative_constraint_is_unsupported() {
        let q = Symbol::new("q");
        let c = DerivativeConstraint::new("p", Derivative::Position, q.expr(), -1.0, 1.0, 1.0, 1.0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn default_derivative_slack_limits() {
        let q = Symbol::new("q");
        let c = DerivativeConstraint::new("v", Derivative::Velocity, q.expr(), -1.0, 1.0, 1.0, 1.0);
        assert_eq!(c.upper_slack_limit.at(3).as_const(), Some(DERIVATIVE_SLACK_LIMIT));
        c.validate().unwrap();
    }
}
