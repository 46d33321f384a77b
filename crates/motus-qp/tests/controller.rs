//! End-to-end controller behaviour.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use motus_core::{Derivative, QpBackendKind, QpControllerConfig, QpError};
use motus_expr::{EvaluationContext, Expr};
use motus_qp::{EqualityConstraint, FreeVariable, IntegralConstraint, QpController};
use motus_test_utils::{
    CountingBackend, FixedBackend, context_for, deterministic_vec, failing_registry, jerk_joint,
    scenario_config, single_joint,
};

fn goal(v: &FreeVariable, target: f64) -> IntegralConstraint {
    let q = v.get_symbol(Derivative::Position).unwrap().expr();
    EqualityConstraint::new("goal", q.clone(), Expr::constant(target) - q, 1.0, 1.0).into()
}

#[test]
fn single_step_goal_is_reached_in_one_cycle() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let vars = vec![v];
    let ctx = context_for(&vars, &[0.0]);
    let mut c = QpController::build(scenario_config(), vars, vec![g], vec![], vec![]).unwrap();
    let commands = c.tick(&ctx).unwrap();
    let velocity = commands.velocity("joint").unwrap();
    assert_relative_eq!(velocity, 0.5, epsilon = 1e-4);
    assert!(velocity <= 1.0);
}

#[test]
fn admm_backend_agrees_with_clarabel() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let config = QpControllerConfig {
        backend: QpBackendKind::Admm,
        ..scenario_config()
    };
    let mut c = QpController::build(config, vec![v], vec![g], vec![], vec![]).unwrap();
    let commands = c.tick_with(&[0.0]).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), 0.5, epsilon = 1e-3);
}

#[test]
fn unreachable_goal_never_leaves_position_limits() {
    let v = single_joint("joint");
    let q = v.get_symbol(Derivative::Position).unwrap().clone();
    let g = goal(&v, 2.0);
    let vars = vec![v];
    let mut ctx = context_for(&vars, &[0.0]);
    let config = scenario_config();
    let dt = config.sample_period;
    let mut c = QpController::build(config, vars, vec![g], vec![], vec![]).unwrap();

    let mut position = 0.0;
    for _ in 0..40 {
        match c.tick(&ctx) {
            Ok(commands) => {
                let velocity = commands.velocity("joint").unwrap();
                assert!(velocity.abs() <= 1.0 + 1e-4);
                position += velocity * dt;
                assert!(position <= 1.0 + 1e-4, "position {position} above limit");
                ctx.set(&q, position).unwrap();
            }
            Err(QpError::HardConstraintsViolated(_)) => return,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_relative_eq!(position, 1.0, epsilon = 1e-3);
}

#[test]
fn retry_budget_is_exact() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = failing_registry(Arc::clone(&calls));
    let budget = 3;
    let config = QpControllerConfig {
        retries_with_relaxed_constraints: budget,
        ..scenario_config()
    };
    let mut c =
        QpController::build_with_registry(config, vec![v], vec![g], vec![], vec![], &registry)
            .unwrap();

    for _ in 0..budget {
        let err = c.tick_with(&[0.0]).unwrap_err();
        assert!(!err.is_fatal(), "{err}");
    }
    let err = c.tick_with(&[0.0]).unwrap_err();
    assert!(matches!(err, QpError::HardConstraintsViolated(ref m) if m.contains("Out of retries")));
    assert_eq!(c.statistics().relaxed_attempts, u64::from(budget));
    assert_eq!(c.retries_left(), 0);
    // first solve, relaxed solve and diagnosis per budgeted tick; one last solve
    assert_eq!(calls.load(Ordering::SeqCst), 3 * budget as usize + 1);
}

#[test]
fn zero_budget_fails_on_first_infeasible_tick() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let calls = Arc::new(AtomicUsize::new(0));
    let config = QpControllerConfig {
        retries_with_relaxed_constraints: 0,
        ..scenario_config()
    };
    let mut c = QpController::build_with_registry(
        config,
        vec![v],
        vec![g],
        vec![],
        vec![],
        &failing_registry(Arc::clone(&calls)),
    )
    .unwrap();
    let err = c.tick_with(&[0.0]).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(c.statistics().relaxed_attempts, 0);
}

#[test]
fn filtered_problem_drops_zero_weight_slacks() {
    let v = single_joint("joint");
    let q = v.get_symbol(Derivative::Position).unwrap().expr();
    let active: IntegralConstraint =
        EqualityConstraint::new("active", q.clone(), 0.1, 1.0, 1.0).into();
    let gated: IntegralConstraint = EqualityConstraint::new("gated", q, 0.2, 1.0, 0.0).into();

    let calls = Arc::new(AtomicUsize::new(0));
    let width = Arc::new(AtomicUsize::new(0));
    let registry = CountingBackend::registry(Arc::clone(&calls), Arc::clone(&width));
    let mut c = QpController::build_with_registry(
        scenario_config(),
        vec![v],
        vec![active, gated],
        vec![],
        vec![],
        &registry,
    )
    .unwrap();
    assert_eq!(c.dimensions().width, 3);

    let commands = c.tick_with(&[0.0]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(width.load(Ordering::SeqCst), 2);
    assert_eq!(commands.solution().len(), 3);
    assert_relative_eq!(commands.solution()[2], 0.0);
}

#[test]
fn jerk_limited_joint_moves_towards_goal() {
    let v = jerk_joint("joint");
    let symbols: Vec<_> = [Derivative::Position, Derivative::Velocity, Derivative::Acceleration]
        .into_iter()
        .map(|d| v.get_symbol(d).unwrap().clone())
        .collect();
    let g = goal(&v, 0.5);
    let vars = vec![v];
    let mut ctx = context_for(&vars, &[0.0]);
    let config = QpControllerConfig::default();
    let dt = config.sample_period;
    let mut c = QpController::build(config, vars, vec![g], vec![], vec![]).unwrap();
    assert_eq!(c.order(), Derivative::Jerk);

    let mut position = 0.0;
    for _ in 0..20 {
        let commands = c.tick(&ctx).unwrap();
        let velocity = commands.velocity("joint").unwrap();
        let acceleration = commands.get("joint", Derivative::Acceleration).unwrap();
        assert!(velocity.abs() <= 1.0 + 1e-4);
        assert!(acceleration.abs() <= 5.0 + 1e-4);
        position += velocity * dt;
        ctx.set(&symbols[0], position).unwrap();
        ctx.set(&symbols[1], velocity).unwrap();
        ctx.set(&symbols[2], acceleration).unwrap();
    }
    assert!(position > 0.01, "joint did not move: {position}");
}

#[test]
fn solution_outside_variable_bounds_is_rejected() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    // velocity limit is 1
    let registry = FixedBackend::registry(5.0);
    let mut c = QpController::build_with_registry(
        scenario_config(),
        vec![v],
        vec![g],
        vec![],
        vec![],
        &registry,
    )
    .unwrap();
    let err = c.tick_with(&[0.0]).unwrap_err();
    assert!(
        matches!(err, QpError::HardConstraintsViolated(ref m) if m.contains("joint")),
        "{err}"
    );
    assert!(err.is_fatal());
    assert_eq!(c.statistics().relaxed_attempts, 0);
}

#[test]
fn solution_within_variable_bounds_is_accepted() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let registry = FixedBackend::registry(0.0);
    let mut c = QpController::build_with_registry(
        scenario_config(),
        vec![v],
        vec![g],
        vec![],
        vec![],
        &registry,
    )
    .unwrap();
    let commands = c.tick_with(&[0.0]).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), 0.0);
}

#[test]
fn contexts_with_same_size_are_bound_separately() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let vars = vec![v];
    let first = context_for(&vars, &[0.0]);

    let mut second = EvaluationContext::new();
    for d in Derivative::ALL.iter().rev() {
        if let Ok(symbol) = vars[0].get_symbol(*d) {
            let value = if *d == Derivative::Position { 0.9 } else { 0.0 };
            second.insert(symbol.clone(), value);
        }
    }
    assert_eq!(second.len(), first.len());

    let mut c = QpController::build(scenario_config(), vars, vec![g], vec![], vec![]).unwrap();
    let commands = c.tick(&first).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), 0.5, epsilon = 1e-4);
    let commands = c.tick(&second).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), -0.4, epsilon = 1e-4);
    let commands = c.tick(&first).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), 0.5, epsilon = 1e-4);
}

#[test]
fn joint_outside_position_limits_falls_back_to_default_limits() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let mut c = QpController::build(scenario_config(), vec![v], vec![g], vec![], vec![]).unwrap();

    // 0.5 above the upper limit: returning within one cycle needs velocity -5
    let commands = c.tick_with(&[1.5]).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), -1.0, epsilon = 1e-4);
    assert_eq!(c.statistics().default_limit_swaps, 1);
    assert_eq!(c.statistics().relaxed_attempts, 1);

    let commands = c.tick_with(&[0.0]).unwrap();
    assert_relative_eq!(commands.velocity("joint").unwrap(), 0.5, epsilon = 1e-4);
    assert_eq!(c.statistics().default_limit_swaps, 1);
}

#[test]
fn failed_default_limits_solve_reports_out_of_joint_limits() {
    let v = single_joint("joint");
    let g = goal(&v, 0.5);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut c = QpController::build_with_registry(
        scenario_config(),
        vec![v],
        vec![g],
        vec![],
        vec![],
        &failing_registry(Arc::clone(&calls)),
    )
    .unwrap();

    let err = c.tick_with(&[1.5]).unwrap_err();
    assert!(matches!(err, QpError::OutOfJointLimits(_)), "{err}");
    assert!(err.is_fatal());
    assert_eq!(c.statistics().default_limit_swaps, 1);
    // first solve, relaxed solve, default-limits solve
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn reachable_goals_from_random_positions() {
    let vars = vec![single_joint("a"), single_joint("b")];
    let goals: Vec<IntegralConstraint> = vars
        .iter()
        .map(|v| {
            let q = v.get_symbol(Derivative::Position).unwrap().expr();
            let name = format!("goal_{}", v.name());
            EqualityConstraint::new(name, q.clone(), Expr::constant(0.5) - q, 1.0, 1.0).into()
        })
        .collect();
    let mut c = QpController::build(scenario_config(), vars.clone(), goals, vec![], vec![]).unwrap();

    for seed in 0..20 {
        // goal error stays below the velocity limit
        let positions = deterministic_vec(2, -0.45, 0.95, seed);
        let commands = c.tick(&context_for(&vars, &positions)).unwrap();
        for (name, q) in ["a", "b"].into_iter().zip(&positions) {
            let velocity = commands.velocity(name).unwrap();
            assert_relative_eq!(velocity, 0.5 - q, epsilon = 1e-4);
        }
    }
    assert_eq!(c.statistics().relaxed_attempts, 0);
}
