//! Periodic tasks and their mailboxes
//!
//! A task runs on its own thread. Each period it first drains the commands
//! queued in its mailbox, then runs its own logic. All mutation of a task's
//! state from other threads goes through that mailbox.

mod mailbox;
pub(crate) mod runner;

pub use mailbox::{Mailbox, QueuedInvocation};

use crate::config::ManagerConfig;
use crate::error::{MtsError, MtsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state shared by tasks and passive components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Constructed,
    Initializing,
    Active,
    Finished,
    Faulted(String),
}

impl TaskState {
    /// Finished and Faulted are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Faulted(_))
    }

    /// Equality that ignores the fault message
    pub fn same_phase(&self, other: &TaskState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Constructed => write!(f, "Constructed"),
            TaskState::Initializing => write!(f, "Initializing"),
            TaskState::Active => write!(f, "Active"),
            TaskState::Finished => write!(f, "Finished"),
            TaskState::Faulted(msg) => write!(f, "Faulted: {}", msg),
        }
    }
}

/// How much of the mailbox a task executes per period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Everything queued when the period starts
    #[default]
    AllQueued,
    /// At most one record per period
    OnePerPeriod,
}

/// User logic of a periodic component
///
/// `configure` runs on the caller's thread before the task is created.
/// `startup`, `run` and `cleanup` run on the task's own thread. An error
/// or panic from `startup` or `run` faults the task.
pub trait Task: Send {
    fn configure(&mut self, _source: &str) -> MtsResult<()> {
        Ok(())
    }

    fn startup(&mut self) -> MtsResult<()> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut TaskContext) -> MtsResult<()>;

    fn cleanup(&mut self) {}
}

impl<F> Task for F
where
    F: FnMut(&mut TaskContext) -> MtsResult<()> + Send,
{
    fn run(&mut self, ctx: &mut TaskContext) -> MtsResult<()> {
        self(ctx)
    }
}

/// Per-period view handed to [`Task::run`]
#[derive(Debug)]
pub struct TaskContext {
    name: String,
    period: Duration,
    period_count: u64,
    started: Instant,
    commands_drained: usize,
    stop_requested: bool,
}

impl TaskContext {
    pub(crate) fn new(name: &str, period: Duration) -> Self {
        Self {
            name: name.to_string(),
            period,
            period_count: 0,
            started: Instant::now(),
            commands_drained: 0,
            stop_requested: false,
        }
    }

    pub(crate) fn begin_period(&mut self, drained: usize) {
        self.period_count += 1;
        self.commands_drained = drained;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of the current period, starting at 1
    pub fn period_count(&self) -> u64 {
        self.period_count
    }

    /// Time since the task became active
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Commands executed from the mailbox at the start of this period
    pub fn commands_drained(&self) -> usize {
        self.commands_drained
    }

    /// Finish the task at the end of this period
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

/// Counters kept for each task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub periods: u64,
    /// Periods whose run time exceeded the period
    pub overruns: u64,
    pub commands_executed: u64,
    /// Commands still queued when the task stopped
    pub commands_dropped: u64,
    pub last_run_duration_ms: f64,
    pub max_run_duration_ms: f64,
    pub avg_run_duration_ms: f64,
}

impl TaskMetrics {
    pub(crate) fn record_period(&mut self, executed: usize, duration: Duration, period: Duration) {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        self.periods += 1;
        self.commands_executed += executed as u64;
        self.last_run_duration_ms = duration_ms;
        if duration_ms > self.max_run_duration_ms {
            self.max_run_duration_ms = duration_ms;
        }
        let total = self.avg_run_duration_ms * (self.periods - 1) as f64;
        self.avg_run_duration_ms = (total + duration_ms) / self.periods as f64;
        if duration > period {
            self.overruns += 1;
        }
    }
}

/// Runtime options applied to a task when it is registered
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub mailbox_capacity: usize,
    pub drain_policy: DrainPolicy,
    /// Upper bound a caller waits on a queued VoidReturn command
    pub void_return_timeout: Duration,
}

impl TaskOptions {
    pub fn validate(&self) -> MtsResult<()> {
        if self.mailbox_capacity == 0 {
            return Err(MtsError::config("mailbox_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self::from(&ManagerConfig::default())
    }
}

impl From<&ManagerConfig> for TaskOptions {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            drain_policy: config.drain_policy,
            void_return_timeout: config.void_return_timeout(),
        }
    }
}
