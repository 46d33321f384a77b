//! Closed-loop motion execution against an ideal integrator.
//!
//! Each tick sets the motion time, advances the monitors, solves the
//! controller and integrates the commanded velocity into the next position.

use std::collections::BTreeMap;

use motus_core::{Derivative, GoalInitializationError, MotusError};
use motus_expr::{EvaluationContext, Symbol};
use motus_qp::{FreeVariable, QpController};
use motus_tasks::{MonitorManager, MonitorRegistry, TaskSet, time_symbol};
use tracing::{debug, info};

use crate::config::MotionConfig;

/// Joint state after one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub time: f64,
    pub positions: BTreeMap<String, f64>,
    pub velocities: BTreeMap<String, f64>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: usize,
    pub finished: bool,
    pub final_positions: BTreeMap<String, f64>,
}

/// A configured motion ready to tick.
#[derive(Debug)]
pub struct MotionRunner {
    variables: Vec<FreeVariable>,
    symbols: Vec<BTreeMap<Derivative, Symbol>>,
    controller: QpController,
    monitors: MonitorManager,
    ctx: EvaluationContext,
    sample_period: f64,
    ticks: usize,
}

impl MotionRunner {
    pub fn new(config: MotionConfig) -> Result<Self, MotusError> {
        Self::with_registry(config, &MonitorRegistry::with_builtins())
    }

    pub fn with_registry(config: MotionConfig, registry: &MonitorRegistry) -> Result<Self, MotusError> {
        let variables = config
            .free_variables
            .iter()
            .map(motus_qp::FreeVariableConfig::build)
            .collect::<Result<Vec<_>, _>>()?;

        let mut tasks = TaskSet::new();
        for goal in &config.goals {
            tasks.add(goal.build(&variables)?)?;
        }
        let monitors = registry.build_manager(&config.monitors)?;
        if let Some(missing) = tasks.monitor_names().into_iter().find(|m| !monitors.contains(m)) {
            return Err(GoalInitializationError::UnknownMonitor(missing.to_string()).into());
        }

        let mut ctx = EvaluationContext::new();
        let mut symbols = Vec::with_capacity(variables.len());
        for v in &variables {
            let mut per_derivative = BTreeMap::new();
            for d in Derivative::ALL {
                let Ok(symbol) = v.get_symbol(d) else {
                    continue;
                };
                let value = if d == Derivative::Position {
                    config.initial_positions.get(v.name()).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                ctx.insert(symbol.clone(), value);
                per_derivative.insert(d, symbol.clone());
            }
            symbols.push(per_derivative);
        }
        monitors.init_context(&mut ctx);

        let sample_period = config.controller.sample_period;
        let controller = QpController::build(
            config.controller,
            variables.clone(),
            tasks.integral_constraints()?,
            tasks.derivative_constraints()?,
            Vec::new(),
        )?;
        info!(
            variables = variables.len(),
            tasks = tasks.tasks().len(),
            monitors = monitors.len(),
            "motion ready"
        );

        Ok(Self {
            variables,
            symbols,
            controller,
            monitors,
            ctx,
            sample_period,
            ticks: 0,
        })
    }

    pub const fn controller(&self) -> &QpController {
        &self.controller
    }

    pub fn motion_finished(&self) -> bool {
        self.monitors.motion_finished()
    }

    /// Run one control cycle.
    #[allow(clippy::cast_precision_loss)]
    pub fn step(&mut self) -> Result<StepReport, MotusError> {
        let time = self.ticks as f64 * self.sample_period;
        self.ctx.insert(time_symbol(), time);
        self.monitors.tick(&mut self.ctx)?;
        let commands = self.controller.tick(&self.ctx)?;

        let mut positions = BTreeMap::new();
        let mut velocities = BTreeMap::new();
        for (v, symbols) in self.variables.iter().zip(&self.symbols) {
            let velocity = commands.velocity(v.name()).unwrap_or(0.0);
            for (&d, symbol) in symbols {
                if d == Derivative::Position {
                    continue;
                }
                let value = commands.get(v.name(), d).unwrap_or(0.0);
                self.ctx.insert(symbol.clone(), value);
            }
            if let Some(q) = symbols.get(&Derivative::Position) {
                let position = self.ctx.get(q).unwrap_or(0.0) + velocity * self.sample_period;
                self.ctx.insert(q.clone(), position);
                positions.insert(v.name().to_string(), position);
            }
            velocities.insert(v.name().to_string(), velocity);
        }
        self.ticks += 1;
        debug!(time, ?velocities, "tick");
        Ok(StepReport {
            time,
            positions,
            velocities,
        })
    }

    /// Tick until an end-motion monitor fires or `max_ticks` is reached,
    /// handing every report to `on_step`.
    pub fn run(
        &mut self,
        max_ticks: usize,
        mut on_step: impl FnMut(&StepReport),
    ) -> Result<RunSummary, MotusError> {
        let mut final_positions = BTreeMap::new();
        while self.ticks < max_ticks && !self.motion_finished() {
            let report = self.step()?;
            on_step(&report);
            final_positions = report.positions;
        }
        let finished = self.motion_finished();
        if finished {
            info!(ticks = self.ticks, "motion finished");
        } else {
            info!(ticks = self.ticks, "tick limit reached");
        }
        Ok(RunSummary {
            ticks: self.ticks,
            finished,
            final_positions,
        })
    }
}
