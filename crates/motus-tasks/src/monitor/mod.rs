//! Monitors: boolean life-cycle predicates that gate tasks.
//!
//! # Architecture
//!
//! Every monitor owns a state symbol `monitor/{name}/state` in the caller's
//! [`EvaluationContext`]. Task gating multiplies constraint weights with these
//! symbols, so [`MonitorManager::tick`] only has to write the new states before
//! the controller ticks for the change to take effect in the same cycle.
//!
//! Expression monitors are compiled into one function. Payload monitors run a
//! [`Payload`] inline or on a worker thread; worker completion is polled
//! without blocking. Errors raised during one tick (cancellation included) are
//! returned at the start of the next.

pub mod expression;
pub mod payload;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use motus_core::{GoalInitializationError, MonitorError, MotusError};
use motus_expr::{Binding, CompiledFunction, EvaluationContext, Expr, Symbol, free_symbols};
use tracing::{debug, info};

pub use expression::{ExpressionMonitor, alternator, local_minimum_reached, time_above};
pub use payload::{
    Alternator, CancelMotion, EndMotion, Payload, PayloadContext, Print, SetMaxTrajectoryLength,
    Sleep, WorldAction, WorldLock, WorldUpdate,
};

/// Name of the motion time symbol, in seconds.
pub const TIME_SYMBOL: &str = "time";

pub fn time_symbol() -> Symbol {
    Symbol::new(TIME_SYMBOL)
}

/// The context symbol holding the 0/1 state of monitor `name`.
pub fn state_symbol(name: &str) -> Symbol {
    Symbol::new(format!("monitor/{name}/state"))
}

/// Life cycle of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifeCycle {
    /// Waiting for its start monitors.
    #[default]
    NotStarted,
    Running,
    /// Latched true.
    Ended,
}

// ---------------------------------------------------------------------------
// PayloadMonitor
// ---------------------------------------------------------------------------

/// State set by a side-effecting [`Payload`].
pub struct PayloadMonitor {
    pub name: String,
    pub payload: Box<dyn Payload>,
    pub run_in_worker: bool,
    pub stay_true: bool,
    pub start_monitors: Vec<String>,
}

impl PayloadMonitor {
    /// An inline monitor using the payload's latching default.
    pub fn new(name: impl Into<String>, payload: impl Payload + 'static) -> Self {
        let stay_true = payload.stay_true();
        Self {
            name: name.into(),
            payload: Box::new(payload),
            run_in_worker: false,
            stay_true,
            start_monitors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn in_worker(mut self) -> Self {
        self.run_in_worker = true;
        self
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

impl fmt::Debug for PayloadMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadMonitor")
            .field("name", &self.name)
            .field("payload", &self.payload.kind())
            .field("run_in_worker", &self.run_in_worker)
            .field("stay_true", &self.stay_true)
            .field("start_monitors", &self.start_monitors)
            .finish()
    }
}

/// Either monitor kind.
#[derive(Debug)]
pub enum Monitor {
    Expression(ExpressionMonitor),
    Payload(PayloadMonitor),
}

impl Monitor {
    pub fn name(&self) -> &str {
        match self {
            Self::Expression(m) => &m.name,
            Self::Payload(m) => &m.name,
        }
    }
}

impl From<ExpressionMonitor> for Monitor {
    fn from(m: ExpressionMonitor) -> Self {
        Self::Expression(m)
    }
}

impl From<PayloadMonitor> for Monitor {
    fn from(m: PayloadMonitor) -> Self {
        Self::Payload(m)
    }
}

// ---------------------------------------------------------------------------
// MonitorManager
// ---------------------------------------------------------------------------

type WorkerResult = (Box<dyn Payload>, Result<bool, MonitorError>);

struct Worker {
    done: Arc<AtomicBool>,
    handle: JoinHandle<WorkerResult>,
}

enum Kind {
    Expression {
        expression: Expr,
    },
    Payload {
        /// `None` while the payload is out on a worker.
        payload: Option<Box<dyn Payload>>,
        run_in_worker: bool,
        ends_motion: bool,
        worker: Option<Worker>,
    },
}

struct Entry {
    name: String,
    symbol: Symbol,
    start_names: Vec<String>,
    start: Vec<usize>,
    stay_true: bool,
    life_cycle: LifeCycle,
    state: bool,
    kind: Kind,
}

impl Entry {
    fn apply(&mut self, state: bool) {
        self.state = state;
        if self.stay_true && state {
            self.life_cycle = LifeCycle::Ended;
        }
    }
}

/// Compiled expression monitors.
struct CompiledExpressions {
    function: CompiledFunction,
    /// Entry index of each output.
    entries: Vec<usize>,
    binding: Option<Binding>,
    args: Vec<f64>,
    scratch: Vec<f64>,
    out: Vec<f64>,
}

/// Owns every monitor of a motion and updates their states once per tick.
#[derive(Default)]
pub struct MonitorManager {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    compiled: Option<CompiledExpressions>,
    dirty: bool,
    pending: Option<MonitorError>,
}

impl fmt::Debug for MonitorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.name, (e.life_cycle, e.state))))
            .finish()
    }
}

impl MonitorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor. Names are unique.
    pub fn add(&mut self, monitor: impl Into<Monitor>) -> Result<(), GoalInitializationError> {
        let monitor = monitor.into();
        let name = monitor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(GoalInitializationError::DuplicateName {
                kind: "monitor",
                name,
            });
        }
        let (start_names, stay_true, kind) = match monitor {
            Monitor::Expression(m) => (
                m.start_monitors,
                m.stay_true,
                Kind::Expression {
                    expression: m.expression,
                },
            ),
            Monitor::Payload(m) => {
                let ends_motion = m.payload.ends_motion();
                (
                    m.start_monitors,
                    m.stay_true,
                    Kind::Payload {
                        payload: Some(m.payload),
                        run_in_worker: m.run_in_worker,
                        ends_motion,
                        worker: None,
                    },
                )
            }
        };
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            symbol: state_symbol(&name),
            name,
            start_names,
            start: Vec::new(),
            stay_true,
            life_cycle: LifeCycle::NotStarted,
            state: false,
            kind,
        });
        self.dirty = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<bool> {
        self.index.get(name).map(|&i| self.entries[i].state)
    }

    pub fn life_cycle(&self, name: &str) -> Option<LifeCycle> {
        self.index.get(name).map(|&i| self.entries[i].life_cycle)
    }

    /// `(name, state)` in registration order.
    pub fn states(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|e| (e.name.as_str(), e.state))
    }

    /// True once an end-motion payload has fired.
    pub fn motion_finished(&self) -> bool {
        self.entries.iter().any(|e| {
            e.state && matches!(e.kind, Kind::Payload { ends_motion: true, .. })
        })
    }

    /// Insert every state symbol (false) and the time symbol (0) unless
    /// present, so a controller can bind before the first tick.
    pub fn init_context(&self, ctx: &mut EvaluationContext) {
        let time = time_symbol();
        if !ctx.contains(&time) {
            ctx.insert(time, 0.0);
        }
        for e in &self.entries {
            if !ctx.contains(&e.symbol) {
                ctx.insert(e.symbol.clone(), 0.0);
            }
        }
    }

    /// Resolve start monitors and compile the expression monitors.
    pub fn compile(&mut self) -> Result<(), MotusError> {
        for i in 0..self.entries.len() {
            let start = self.entries[i]
                .start_names
                .iter()
                .map(|n| {
                    self.index
                        .get(n)
                        .copied()
                        .ok_or_else(|| GoalInitializationError::UnknownMonitor(n.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.entries[i].start = start;
        }

        let (entries, exprs): (Vec<usize>, Vec<Expr>) = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match &e.kind {
                Kind::Expression { expression } => Some((i, expression.clone())),
                Kind::Payload { .. } => None,
            })
            .unzip();
        self.compiled = if exprs.is_empty() {
            None
        } else {
            let params = free_symbols(&exprs);
            let function = CompiledFunction::compile_dense(&exprs, &params)?;
            debug!(
                monitors = exprs.len(),
                instructions = function.instruction_count(),
                "compiled expression monitors"
            );
            Some(CompiledExpressions {
                out: vec![0.0; exprs.len()],
                function,
                entries,
                binding: None,
                args: Vec::new(),
                scratch: Vec::new(),
            })
        };
        self.dirty = false;
        Ok(())
    }

    /// Advance every monitor one tick and write the states into `ctx`.
    ///
    /// Returns the error raised during the previous tick, if any.
    pub fn tick(&mut self, ctx: &mut EvaluationContext) -> Result<(), MotusError> {
        if let Some(e) = self.pending.take() {
            return Err(e.into());
        }
        if self.dirty {
            self.compile()?;
        }
        self.init_context(ctx);
        let time = ctx.get(&time_symbol()).unwrap_or(0.0);

        self.poll_workers();
        self.start_monitors();
        self.evaluate_expressions(ctx)?;
        self.run_payloads(time);

        for e in &self.entries {
            ctx.insert(e.symbol.clone(), if e.state { 1.0 } else { 0.0 });
        }
        Ok(())
    }

    fn start_monitors(&mut self) {
        let states: Vec<bool> = self.entries.iter().map(|e| e.state).collect();
        for e in &mut self.entries {
            if e.life_cycle == LifeCycle::NotStarted && e.start.iter().all(|&i| states[i]) {
                debug!(monitor = %e.name, "monitor started");
                e.life_cycle = LifeCycle::Running;
            }
        }
    }

    fn evaluate_expressions(&mut self, ctx: &EvaluationContext) -> Result<(), MotusError> {
        let Some(c) = self.compiled.as_mut() else {
            return Ok(());
        };
        let binding = ctx.rebind(c.binding.take(), c.function.params())?;
        ctx.gather(&binding, &mut c.args);
        c.binding = Some(binding);
        c.function.call(&c.args, &mut c.scratch, &mut c.out)?;

        for (k, &i) in c.entries.iter().enumerate() {
            let e = &mut self.entries[i];
            if e.life_cycle == LifeCycle::Running {
                e.apply(c.out[k] > 0.5);
            }
        }
        Ok(())
    }

    fn run_payloads(&mut self, time: f64) {
        for e in &mut self.entries {
            if e.life_cycle != LifeCycle::Running {
                continue;
            }
            let Kind::Payload {
                payload,
                run_in_worker,
                worker,
                ..
            } = &mut e.kind
            else {
                continue;
            };
            let Some(mut p) = payload.take() else {
                continue;
            };
            let ctx = PayloadContext {
                monitor: e.name.clone(),
                time,
            };
            if *run_in_worker {
                let done = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&done);
                let handle = std::thread::spawn(move || {
                    let result = p.run(&ctx);
                    flag.store(true, Ordering::Release);
                    (p, result)
                });
                debug!(monitor = %e.name, "payload started on worker");
                *worker = Some(Worker { done, handle });
            } else {
                let result = p.run(&ctx);
                *payload = Some(p);
                match result {
                    Ok(state) => e.apply(state),
                    Err(err) => {
                        info!(monitor = %e.name, "{err}");
                        self.pending.get_or_insert(err);
                    }
                }
            }
        }
    }

    fn poll_workers(&mut self) {
        for e in &mut self.entries {
            let Kind::Payload {
                payload, worker, ..
            } = &mut e.kind
            else {
                continue;
            };
            let finished = worker
                .as_ref()
                .is_some_and(|w| w.done.load(Ordering::Acquire));
            if !finished {
                continue;
            }
            let Some(w) = worker.take() else {
                continue;
            };
            match w.handle.join() {
                Ok((p, result)) => {
                    *payload = Some(p);
                    match result {
                        Ok(state) => e.apply(state),
                        Err(err) => {
                            info!(monitor = %e.name, "{err}");
                            self.pending.get_or_insert(err);
                        }
                    }
                }
                Err(_) => {
                    self.pending.get_or_insert(MonitorError::PayloadFailed {
                        monitor: e.name.clone(),
                        message: "worker panicked".into(),
                    });
                }
            }
        }
    }

    /// True while any payload is out on a worker.
    pub fn workers_running(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.kind, Kind::Payload { worker: Some(_), .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn context(time: f64) -> EvaluationContext {
        let mut ctx = EvaluationContext::new();
        ctx.insert(time_symbol(), time);
        ctx
    }

    #[test]
    fn duplicate_monitor_is_rejected() {
        let mut m = MonitorManager::new();
        m.add(PayloadMonitor::new("a", EndMotion)).unwrap();
        assert!(m.add(ExpressionMonitor::new("a", time_above(1.0))).is_err());
    }

    #[test]
    fn unknown_start_monitor_fails_compile() {
        let mut m = MonitorManager::new();
        m.add(ExpressionMonitor::new("a", time_above(1.0)).with_start_monitors(["missing"]))
            .unwrap();
        assert!(matches!(
            m.compile(),
            Err(MotusError::Goal(GoalInitializationError::UnknownMonitor(_)))
        ));
    }

    #[test]
    fn expression_monitor_latches() {
        let mut m = MonitorManager::new();
        m.add(ExpressionMonitor::new("late", time_above(1.0))).unwrap();
        let mut ctx = context(0.5);
        m.tick(&mut ctx).unwrap();
        assert_eq!(m.state("late"), Some(false));
        assert_eq!(m.life_cycle("late"), Some(LifeCycle::Running));

        ctx.set(&time_symbol(), 1.5).unwrap();
        m.tick(&mut ctx).unwrap();
        assert_eq!(m.state("late"), Some(true));
        assert_eq!(m.life_cycle("late"), Some(LifeCycle::Ended));
        assert_eq!(ctx.get(&state_symbol("late")), Some(1.0));

        ctx.set(&time_symbol(), 0.0).unwrap();
        m.tick(&mut ctx).unwrap();
        assert_eq!(m.state("late"), Some(true));
    }

    #[test]
    fn non_latching_monitor_flips_back() {
        let mut m = MonitorManager::new();
        m.add(ExpressionMonitor::new("alt", alternator(2.0)).with_stay_true(false))
            .unwrap();
        let mut ctx = context(0.5);
        m.tick(&mut ctx).unwrap();
        assert_eq!(m.state("alt"), Some(true));
        ctx.set(&time_symbol(), 1.5).unwrap();
        m.tick(&mut ctx).unwrap();
        assert_eq!(m.state("alt"), Some(false));
    }

    #[test]
    fn switching_context_rebinds_expressions() {
        let mut m = MonitorManager::new();
        m.add(ExpressionMonitor::new("late", time_above(1.0)).with_stay_true(false))
            .unwrap();
        let mut first = context(0.5);
        m.tick(&mut first).unwrap();
        assert_eq!(m.state("late"), Some(false));

        // same size, time in a different slot
        let mut second = EvaluationContext::new();
        second.insert(state_symbol("late"), 0.0);
        second.insert(time_symbol(), 1.5);
        assert_eq!(second.len(), first.len());
        m.tick(&mut second).unwrap();
        assert_eq!(m.state("late"), Some(true));
    }

    #[test]
    fn start_monitors_delay_running() {
        let mut m = MonitorManager::new();
        m.add(ExpressionMonitor::new("first", time_above(1.0))).unwrap();
        m.add(PayloadMonitor::new("done", EndMotion).with_start_monitors(["first"]))
            .unwrap();
        let mut ctx = context(0.0);
        m.tick(&mut ctx).unwrap();
        assert_eq!(m.life_cycle("done"), Some(LifeCycle::NotStarted));
        assert!(!m.motion_finished());

        ctx.set(&time_symbol(), 2.0).unwrap();
        m.tick(&mut ctx).unwrap();
        // started on the tick after its start monitor turned true
        assert_eq!(m.life_cycle("done"), Some(LifeCycle::NotStarted));
        m.tick(&mut ctx).unwrap();
        assert!(m.motion_finished());
    }

    #[test]
    fn cancellation_surfaces_on_next_tick() {
        let mut m = MonitorManager::new();
        m.add(PayloadMonitor::new("abort", CancelMotion::new("user abort")))
            .unwrap();
        let mut ctx = context(0.0);
        m.tick(&mut ctx).unwrap();
        let err = m.tick(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            MotusError::Monitor(MonitorError::Cancelled { ref monitor, .. }) if monitor == "abort"
        ));
    }

    #[test]
    fn worker_payload_completes_without_blocking() {
        let mut m = MonitorManager::new();
        m.add(
            PayloadMonitor::new(
                "wait",
                Sleep {
                    duration: Duration::from_millis(200),
                },
            )
            .in_worker(),
        )
        .unwrap();
        let mut ctx = context(0.0);
        let start = Instant::now();
        m.tick(&mut ctx).unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(m.workers_running());
        assert_eq!(m.state("wait"), Some(false));

        let deadline = Instant::now() + Duration::from_secs(5);
        while m.state("wait") != Some(true) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            m.tick(&mut ctx).unwrap();
        }
        assert_eq!(m.state("wait"), Some(true));
        assert!(!m.workers_running());
    }
}
