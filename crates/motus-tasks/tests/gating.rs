//! Monitor-gated tasks driving the controller.

use approx::assert_relative_eq;
use motus_core::Derivative;
use motus_expr::EvaluationContext;
use motus_qp::QpController;
use motus_tasks::{
    ExpressionMonitor, JointGoalConfig, JointPositionGoal, MonitorConfig, MonitorManager,
    MonitorRegistry, Task, TaskSet, monitor::time_above, time_symbol,
};
use motus_test_utils::{context_for, scenario_config, single_joint};
use serde::Deserialize;

fn reach(name: &str, target: f64) -> Task {
    let mut task = Task::new(name);
    JointPositionGoal::new(1.0, 1.0)
        .with_target("arm", target)
        .apply(&mut task, &[single_joint("arm")])
        .unwrap();
    task
}

#[test]
fn end_monitor_switches_task_off_in_the_same_tick() {
    let vars = vec![single_joint("arm")];
    let mut tasks = TaskSet::new();
    tasks.add(reach("forward", 0.5)).unwrap();
    let mut back = reach("back", -0.5);
    back.add_end_monitor("switch").unwrap();
    tasks.add(back).unwrap();

    let mut manager = MonitorManager::new();
    manager
        .add(ExpressionMonitor::new("switch", time_above(0.15)))
        .unwrap();
    manager.compile().unwrap();

    let mut ctx = context_for(&vars, &[0.0]);
    manager.init_context(&mut ctx);
    let mut controller = QpController::build(
        scenario_config(),
        vars,
        tasks.integral_constraints().unwrap(),
        tasks.derivative_constraints().unwrap(),
        vec![],
    )
    .unwrap();

    manager.tick(&mut ctx).unwrap();
    let before = controller.tick(&ctx).unwrap().velocity("arm").unwrap();
    assert_relative_eq!(before, 0.0, epsilon = 1e-4);

    ctx.insert(time_symbol(), 0.2);
    manager.tick(&mut ctx).unwrap();
    assert_eq!(manager.state("switch"), Some(true));
    let after = controller.tick(&ctx).unwrap().velocity("arm").unwrap();
    assert_relative_eq!(after, 0.5, epsilon = 1e-4);
}

#[test]
fn gated_weights_are_stable_while_states_are_unchanged() {
    let mut task = reach("reach", 0.5);
    task.add_start_monitor("go").unwrap();
    task.add_end_monitor("stop").unwrap();

    let mut manager = MonitorManager::new();
    manager.add(ExpressionMonitor::new("go", time_above(0.0))).unwrap();
    manager.add(ExpressionMonitor::new("stop", time_above(10.0))).unwrap();

    let mut ctx = EvaluationContext::new();
    ctx.insert(time_symbol(), 1.0);
    manager.tick(&mut ctx).unwrap();

    let weight = &task.equality_constraints()[0].quadratic_weight;
    let first = ctx.evaluate(weight).unwrap();
    let second = ctx.evaluate(weight).unwrap();
    assert_eq!(first, 1.0);
    assert_eq!(first, second);

    manager.tick(&mut ctx).unwrap();
    assert_eq!(ctx.evaluate(weight).unwrap(), first);
}

#[test]
fn configured_motion_runs_until_end_motion() {
    #[derive(Deserialize)]
    struct Motion {
        goals: Vec<JointGoalConfig>,
        monitors: Vec<MonitorConfig>,
    }
    let motion: Motion = toml::from_str(
        r#"
        [[goals]]
        name = "reach"
        targets = { arm = 0.5 }
        reference_velocity = 0.5

        [[monitors]]
        name = "late"
        kind = "time_above"
        params = { threshold = 0.25 }

        [[monitors]]
        name = "done"
        kind = "end_motion"
        start_monitors = ["late"]
        "#,
    )
    .unwrap();

    let vars = vec![single_joint("arm")];
    let q = vars[0].get_symbol(Derivative::Position).unwrap().clone();
    let mut tasks = TaskSet::new();
    for goal in &motion.goals {
        tasks.add(goal.build(&vars).unwrap()).unwrap();
    }
    let mut manager = MonitorRegistry::with_builtins()
        .build_manager(&motion.monitors)
        .unwrap();

    let config = scenario_config();
    let dt = config.sample_period;
    let mut ctx = context_for(&vars, &[0.0]);
    manager.init_context(&mut ctx);
    let mut controller = QpController::build(
        config,
        vars,
        tasks.integral_constraints().unwrap(),
        tasks.derivative_constraints().unwrap(),
        vec![],
    )
    .unwrap();

    let mut position = 0.0;
    let mut ticks: i32 = 0;
    while !manager.motion_finished() {
        assert!(ticks < 10, "motion did not finish");
        ctx.insert(time_symbol(), f64::from(ticks) * dt);
        manager.tick(&mut ctx).unwrap();
        let velocity = controller.tick(&ctx).unwrap().velocity("arm").unwrap();
        assert!(velocity.abs() <= 1.0 + 1e-4);
        position += velocity * dt;
        ctx.insert(q.clone(), position);
        ticks += 1;
    }
    assert_eq!(ticks, 5);
    assert!(position > 0.1);
}
