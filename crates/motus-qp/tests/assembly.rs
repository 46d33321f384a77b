//! Layout properties of the assembled horizon problem.

use motus_core::{Derivative, QpControllerConfig};
use motus_expr::Expr;
use motus_qp::{
    ColumnKind, DerivativeConstraint, EqualityConstraint, FreeVariable, HorizonAssembler,
    HorizonSettings, InequalityConstraint, IntegralConstraint, QpController, RowKind,
};
use motus_test_utils::{jerk_joint, random_variables, seeded_rng, single_joint};
use rand::Rng;

fn settings(n: usize, order: Derivative) -> HorizonSettings {
    HorizonSettings {
        sample_period: 0.05,
        prediction_horizon: n,
        order,
        zero_final_derivatives: true,
        last_state_decimals: 5,
        position_decimals: 10,
    }
}

fn position(v: &FreeVariable) -> Expr {
    v.get_symbol(Derivative::Position).unwrap().expr()
}

#[test]
fn dimension_invariant_over_random_problems() {
    let mut rng = seeded_rng(42);
    for case in 0..40 {
        let n_vars = rng.gen_range(0..=4);
        let vars = random_variables(&mut rng, n_vars);
        let n = rng.gen_range(1..=6);

        let mut constraints: Vec<IntegralConstraint> = Vec::new();
        let mut derivative_constraints = Vec::new();
        if !vars.is_empty() {
            for i in 0..rng.gen_range(0..=3) {
                let v = &vars[rng.gen_range(0..vars.len())];
                let c: IntegralConstraint = if rng.r#gen() {
                    EqualityConstraint::new(format!("eq{i}"), position(v), 0.2, 1.0, 1.0).into()
                } else {
                    InequalityConstraint::new(format!("in{i}"), position(v), -0.1, 0.1, 1.0, 1.0)
                        .with_control_horizon(rng.gen_range(1..=n + 2))
                        .into()
                };
                constraints.push(c);
            }
            for i in 0..rng.gen_range(0..=2) {
                let v = &vars[rng.gen_range(0..vars.len())];
                derivative_constraints.push(
                    DerivativeConstraint::new(
                        format!("dc{i}"),
                        Derivative::Velocity,
                        position(v) * 2.0,
                        -0.5,
                        0.5,
                        1.0,
                        0.5,
                    )
                    .with_control_horizon(rng.gen_range(1..=n)),
                );
            }
        }

        let order = vars
            .iter()
            .map(FreeVariable::order)
            .max()
            .unwrap_or(Derivative::Velocity);
        let asm =
            HorizonAssembler::new(&vars, &constraints, &derivative_constraints, settings(n, order))
                .unwrap();
        let p = asm.assemble(false).unwrap();
        let dims = p.dims;
        assert_eq!(p.weights.len(), dims.width, "case {case}");
        assert_eq!(p.lower.len(), dims.width, "case {case}");
        assert_eq!(p.upper.len(), dims.width, "case {case}");
        assert_eq!(p.lower_a.len(), dims.height, "case {case}");
        assert_eq!(p.upper_a.len(), dims.height, "case {case}");
        assert_eq!(asm.topology().columns().len(), dims.width, "case {case}");
        assert_eq!(asm.topology().rows().len(), dims.height, "case {case}");
        assert!(p.a.iter().all(|(r, c, _)| *r < dims.height && *c < dims.width));
        assert_eq!(
            dims.height,
            dims.num_position_rows + dims.num_link_rows + dims.num_slack(),
            "case {case}"
        );
    }
}

#[test]
fn velocity_only_variables_have_no_higher_columns() {
    let vars = vec![jerk_joint("arm"), single_joint("base")];
    let asm = HorizonAssembler::new(&vars, &[], &[], settings(5, Derivative::Jerk)).unwrap();
    // sorted by name: arm = 0, base = 1
    let base_blocks: Vec<Derivative> = asm
        .topology()
        .columns()
        .iter()
        .filter_map(|c| match *c {
            ColumnKind::Variable {
                variable: 1,
                derivative,
                ..
            } => Some(derivative),
            _ => None,
        })
        .collect();
    assert_eq!(base_blocks.len(), 5);
    assert!(base_blocks.iter().all(|d| *d == Derivative::Velocity));

    let p = asm.assemble(false).unwrap();
    let arm_columns = asm
        .topology()
        .columns()
        .iter()
        .filter(|c| matches!(c, ColumnKind::Variable { variable: 0, .. }))
        .count();
    assert_eq!(arm_columns, 3 * 5);
    assert_eq!(p.weights.len(), arm_columns + base_blocks.len());
}

#[test]
fn controller_order_drops_to_velocity_for_velocity_only_variables() {
    let config = QpControllerConfig {
        prediction_horizon: 6,
        ..QpControllerConfig::default()
    };
    let c = QpController::build(config, vec![single_joint("a"), single_joint("b")], vec![], vec![], vec![])
        .unwrap();
    assert_eq!(c.order(), Derivative::Velocity);
    assert!(
        c.column_labels()
            .iter()
            .all(|l| !l.ends_with("/acceleration") && !l.ends_with("/jerk"))
    );
}

#[test]
fn control_horizon_truncates_rows_and_columns() {
    let vars = vec![single_joint("a")];
    for n in [4, 7, 9] {
        let dc = DerivativeConstraint::new(
            "speed",
            Derivative::Velocity,
            position(&vars[0]),
            -0.3,
            0.3,
            1.0,
            0.3,
        )
        .with_control_horizon(3);
        let dcs = [dc];
        let asm = HorizonAssembler::new(&vars, &[], &dcs, settings(n, Derivative::Velocity)).unwrap();
        let slack_columns = asm
            .topology()
            .columns()
            .iter()
            .filter(|c| matches!(c, ColumnKind::DerivativeSlack { constraint: 0, .. }))
            .count();
        let rows = asm
            .topology()
            .rows()
            .iter()
            .filter(|r| matches!(r, RowKind::DerivativeConstraint { constraint: 0, .. }))
            .count();
        assert_eq!(slack_columns, 3, "horizon {n}");
        assert_eq!(rows, 3, "horizon {n}");
    }
}

#[test]
fn labels_are_identical_across_rebuilds() {
    let build = |vars: Vec<FreeVariable>| {
        let goal: IntegralConstraint =
            EqualityConstraint::new("reach", position(&vars[0]), 0.3, 1.0, 1.0).into();
        let limit = DerivativeConstraint::new(
            "slow",
            Derivative::Velocity,
            position(&vars[1]),
            -0.2,
            0.2,
            1.0,
            0.2,
        );
        let config = QpControllerConfig {
            prediction_horizon: 4,
            ..QpControllerConfig::default()
        };
        QpController::build(config, vars, vec![goal], vec![limit], vec![]).unwrap()
    };
    let first = build(vec![jerk_joint("elbow"), single_joint("wrist")]);
    let second = build(vec![jerk_joint("elbow"), single_joint("wrist")]);
    assert_eq!(first.column_labels(), second.column_labels());
    assert_eq!(first.row_labels(), second.row_labels());
    assert!(first.column_labels().iter().any(|l| l == "reach/error"));
}
