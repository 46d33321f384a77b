//! Free-variable and context fixtures.

use motus_core::{Derivative, QpControllerConfig};
use motus_expr::EvaluationContext;
use motus_qp::FreeVariable;
use rand::Rng;

/// Joint with position limits `[-1, 1]`, velocity limit 1 and velocity weight 1.
pub fn single_joint(name: &str) -> FreeVariable {
    FreeVariable::builder(name)
        .limits(Derivative::Position, -1.0, 1.0)
        .symmetric_limit(Derivative::Velocity, 1.0)
        .weight(Derivative::Velocity, 1.0)
        .build()
        .expect("fixture limits are complete")
}

/// Continuous joint with only a velocity limit.
pub fn velocity_joint(name: &str, velocity_limit: f64) -> FreeVariable {
    FreeVariable::builder(name)
        .symmetric_limit(Derivative::Velocity, velocity_limit)
        .build()
        .expect("fixture limits are complete")
}

/// Joint limited through jerk, with default weights.
pub fn jerk_joint(name: &str) -> FreeVariable {
    FreeVariable::builder(name)
        .limits(Derivative::Position, -2.5, 2.5)
        .symmetric_limit(Derivative::Velocity, 1.0)
        .symmetric_limit(Derivative::Acceleration, 5.0)
        .symmetric_limit(Derivative::Jerk, 30.0)
        .build()
        .expect("fixture limits are complete")
}

/// `dt = 0.1`, one-step horizon.
pub fn scenario_config() -> QpControllerConfig {
    QpControllerConfig {
        sample_period: 0.1,
        prediction_horizon: 1,
        ..QpControllerConfig::default()
    }
}

/// Context holding every derivative symbol of `variables`: positions from
/// `positions` (zero when missing), all higher derivatives zero.
pub fn context_for(variables: &[FreeVariable], positions: &[f64]) -> EvaluationContext {
    let mut ctx = EvaluationContext::new();
    for (i, v) in variables.iter().enumerate() {
        for d in Derivative::ALL {
            let value = if d == Derivative::Position {
                positions.get(i).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            if let Ok(symbol) = v.get_symbol(d) {
                ctx.insert(symbol.clone(), value);
            }
        }
    }
    ctx
}

/// `count` variables of random shape: velocity-only, jerk-limited or
/// continuous.
pub fn random_variables(rng: &mut impl Rng, count: usize) -> Vec<FreeVariable> {
    (0..count)
        .map(|i| {
            let name = format!("v{i:02}");
            match rng.gen_range(0..3) {
                0 => single_joint(&name),
                1 => jerk_joint(&name),
                _ => velocity_joint(&name, rng.gen_range(0.5..2.0)),
            }
        })
        .collect()
}
