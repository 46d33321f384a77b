//! Side-effecting monitor actions.
//!
//! A [`Payload`] runs once per tick while its monitor is running (or once on a
//! worker thread when the monitor asks for it) and reports the new monitor
//! state. Errors are surfaced to the scheduler through the
//! [`MonitorManager`](super::MonitorManager).

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use motus_core::MonitorError;
use tracing::info;

/// Serializes world-mutating payloads against readers of the world state.
pub type WorldLock = Arc<Mutex<()>>;

/// What a payload sees when it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadContext {
    pub monitor: String,
    /// Motion time in seconds.
    pub time: f64,
}

/// A monitor action.
pub trait Payload: Send {
    fn kind(&self) -> &'static str;

    /// Run the action and return the new monitor state.
    fn run(&mut self, ctx: &PayloadContext) -> Result<bool, MonitorError>;

    /// True when a true state finishes the motion.
    fn ends_motion(&self) -> bool {
        false
    }

    /// Whether the state latches once true.
    fn stay_true(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Motion control
// ---------------------------------------------------------------------------

/// Finishes the motion once started.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndMotion;

impl Payload for EndMotion {
    fn kind(&self) -> &'static str {
        "end_motion"
    }

    fn run(&mut self, _ctx: &PayloadContext) -> Result<bool, MonitorError> {
        Ok(true)
    }

    fn ends_motion(&self) -> bool {
        true
    }
}

/// Cancels the motion with a message once started.
#[derive(Debug, Clone)]
pub struct CancelMotion {
    pub message: String,
}

impl CancelMotion {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Payload for CancelMotion {
    fn kind(&self) -> &'static str {
        "cancel_motion"
    }

    fn run(&mut self, ctx: &PayloadContext) -> Result<bool, MonitorError> {
        Err(MonitorError::Cancelled {
            monitor: ctx.monitor.clone(),
            message: self.message.clone(),
        })
    }
}

/// Cancels the motion when it runs longer than `length` seconds.
#[derive(Debug, Clone, Copy)]
pub struct SetMaxTrajectoryLength {
    pub length: f64,
}

impl Payload for SetMaxTrajectoryLength {
    fn kind(&self) -> &'static str {
        "set_max_trajectory_length"
    }

    fn run(&mut self, ctx: &PayloadContext) -> Result<bool, MonitorError> {
        if ctx.time > self.length {
            return Err(MonitorError::Cancelled {
                monitor: ctx.monitor.clone(),
                message: format!("Trajectory longer than {}s", self.length),
            });
        }
        Ok(false)
    }

    fn stay_true(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Utility payloads
// ---------------------------------------------------------------------------

/// Logs a message.
#[derive(Debug, Clone)]
pub struct Print {
    pub message: String,
}

impl Print {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Payload for Print {
    fn kind(&self) -> &'static str {
        "print"
    }

    fn run(&mut self, ctx: &PayloadContext) -> Result<bool, MonitorError> {
        info!(monitor = %ctx.monitor, "{}", self.message);
        Ok(true)
    }
}

/// Blocks for a fixed duration. Meant for worker execution.
#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    pub duration: Duration,
}

impl Payload for Sleep {
    fn kind(&self) -> &'static str {
        "sleep"
    }

    fn run(&mut self, _ctx: &PayloadContext) -> Result<bool, MonitorError> {
        std::thread::sleep(self.duration);
        Ok(true)
    }
}

/// True when `floor(time) % modulus == 0`. Never latches.
#[derive(Debug, Clone, Copy)]
pub struct Alternator {
    pub modulus: u32,
}

impl Payload for Alternator {
    fn kind(&self) -> &'static str {
        "alternator"
    }

    #[allow(clippy::cast_possible_truncation)]
    fn run(&mut self, ctx: &PayloadContext) -> Result<bool, MonitorError> {
        if self.modulus == 0 {
            return Err(MonitorError::InvalidConfig {
                monitor: ctx.monitor.clone(),
                message: "alternator modulus must be > 0".into(),
            });
        }
        let second = ctx.time.floor() as i64;
        Ok(second.rem_euclid(i64::from(self.modulus)) == 0)
    }

    fn stay_true(&self) -> bool {
        false
    }
}

/// Action mutating the world, run while holding the world lock.
pub type WorldAction = Box<dyn FnMut() -> Result<(), String> + Send>;

/// Runs a world mutation under the shared [`WorldLock`].
pub struct WorldUpdate {
    lock: WorldLock,
    action: WorldAction,
}

impl WorldUpdate {
    pub fn new(lock: WorldLock, action: impl FnMut() -> Result<(), String> + Send + 'static) -> Self {
        Self {
            lock,
            action: Box::new(action),
        }
    }
}

impl fmt::Debug for WorldUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldUpdate").finish_non_exhaustive()
    }
}

impl Payload for WorldUpdate {
    fn kind(&self) -> &'static str {
        "world_update"
    }

    fn run(&mut self, ctx: &PayloadContext) -> Result<bool, MonitorError> {
        let failed = |message: String| MonitorError::PayloadFailed {
            monitor: ctx.monitor.clone(),
            message,
        };
        let _guard = self
            .lock
            .lock()
            .map_err(|_| failed("world lock poisoned".into()))?;
        (self.action)().map_err(failed)?;
        Ok(true)
    }
}
