//! Task execution thread
//!
//! Internal to the crate: the manager owns one [`TaskRunner`] per periodic
//! component and drives it through create, start and kill.

use super::{DrainPolicy, Mailbox, Task, TaskContext, TaskMetrics, TaskState};
use crate::error::{MtsError, MtsResult};
use crate::manager::{EventBus, ManagerEvent};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

/// Lifecycle state with change notification
pub(crate) struct StateCell {
    process: String,
    component: String,
    state: Mutex<TaskState>,
    changed: Condvar,
    events: EventBus,
}

impl StateCell {
    pub(crate) fn new(process: &str, component: &str, events: EventBus) -> Self {
        Self {
            process: process.to_string(),
            component: component.to_string(),
            state: Mutex::new(TaskState::Constructed),
            changed: Condvar::new(),
            events,
        }
    }

    pub(crate) fn get(&self) -> TaskState {
        self.state.lock().clone()
    }

    /// Move to `next` unless the current state is terminal
    pub(crate) fn transition(&self, next: TaskState) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next.clone();
            // Published under the lock so observers see changes in order
            self.events.publish(ManagerEvent::ComponentStateChanged {
                process: self.process.clone(),
                component: self.component.clone(),
                state: next.clone(),
            });
        }
        self.changed.notify_all();

        match &next {
            TaskState::Faulted(reason) => {
                log::error!("Component '{}' faulted: {}", self.component, reason)
            }
            other => log::info!("Component '{}' is now {}", self.component, other),
        }
        true
    }

    /// Block until `accept` holds or `timeout` elapses
    pub(crate) fn wait_until<F>(&self, accept: F, timeout: Duration) -> bool
    where
        F: Fn(&TaskState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !accept(&state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return accept(&state);
            }
        }
        true
    }
}

struct TaskShared {
    name: String,
    state: Arc<StateCell>,
    stop_requested: AtomicBool,
    mailbox: Arc<Mailbox>,
    metrics: Mutex<TaskMetrics>,
    thread: Mutex<Option<Thread>>,
}

impl TaskShared {
    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn fault(&self, reason: String) {
        let dropped = self.mailbox.close();
        self.metrics.lock().commands_dropped += dropped as u64;
        self.state.transition(TaskState::Faulted(reason));
    }

    fn finish(&self, task: &mut Box<dyn Task>) {
        let dropped = self.mailbox.close();
        self.metrics.lock().commands_dropped += dropped as u64;
        if dropped > 0 {
            log::info!(
                "Task '{}' stopped with {} queued commands dropped",
                self.name,
                dropped
            );
        }
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| task.cleanup())) {
            log::warn!(
                "Task '{}' cleanup panicked: {}",
                self.name,
                panic_message(panic.as_ref())
            );
        }
        self.state.transition(TaskState::Finished);
    }
}

pub(crate) struct TaskRunner {
    shared: Arc<TaskShared>,
    period: Duration,
    drain_policy: DrainPolicy,
    task: Mutex<Option<Box<dyn Task>>>,
    start_tx: Mutex<Option<Sender<()>>>,
    started_rx: Mutex<Option<Receiver<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskRunner {
    pub(crate) fn new(
        task: Box<dyn Task>,
        period: Duration,
        drain_policy: DrainPolicy,
        mailbox: Arc<Mailbox>,
        state: Arc<StateCell>,
    ) -> Self {
        let name = state.component.clone();
        Self {
            shared: Arc::new(TaskShared {
                name,
                state,
                stop_requested: AtomicBool::new(false),
                mailbox,
                metrics: Mutex::new(TaskMetrics::default()),
                thread: Mutex::new(None),
            }),
            period,
            drain_policy,
            task: Mutex::new(Some(task)),
            start_tx: Mutex::new(None),
            started_rx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn metrics(&self) -> TaskMetrics {
        self.shared.metrics.lock().clone()
    }

    /// Constructed → Initializing: spawn the thread and run `startup` on it
    pub(crate) fn create(&self) -> MtsResult<()> {
        let Some(mut task) = self.task.lock().take() else {
            return Err(MtsError::InvalidState(format!(
                "task '{}' was already created",
                self.shared.name
            )));
        };
        if self.shared.stopping() {
            return Err(MtsError::InvalidState(format!(
                "task '{}' was killed",
                self.shared.name
            )));
        }

        let (start_tx, start_rx) = channel::bounded::<()>(1);
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        *self.start_tx.lock() = Some(start_tx);
        *self.started_rx.lock() = Some(started_rx);
        self.shared.state.transition(TaskState::Initializing);

        let shared = self.shared.clone();
        let period = self.period;
        let policy = self.drain_policy;
        let handle = thread::Builder::new()
            .name(format!("mts-task-{}", self.shared.name))
            .spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(|| task.startup())) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return shared.fault(format!("startup failed: {}", e)),
                    Err(panic) => return shared.fault(panic_message(panic.as_ref())),
                }
                if start_rx.recv().is_err() || shared.stopping() {
                    // Killed before it was started
                    return shared.finish(&mut task);
                }
                shared.state.transition(TaskState::Active);
                let _ = started_tx.send(());
                run_loop(&shared, &mut task, period, policy);
            })?;

        *self.shared.thread.lock() = Some(handle.thread().clone());
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Initializing → Active; returns once the loop has begun
    pub(crate) fn start(&self) -> MtsResult<()> {
        let state = self.shared.state.get();
        if state != TaskState::Initializing {
            return Err(MtsError::InvalidState(format!(
                "task '{}' cannot start from {}",
                self.shared.name, state
            )));
        }
        let sent = match self.start_tx.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        };
        let started = sent
            && match self.started_rx.lock().take() {
                Some(rx) => rx.recv().is_ok(),
                None => false,
            };
        if !started {
            return Err(MtsError::InvalidState(format!(
                "task '{}' did not start: {}",
                self.shared.name,
                self.shared.state.get()
            )));
        }
        Ok(())
    }

    /// Request a cooperative stop, observed at the next period boundary
    pub(crate) fn kill(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.start_tx.lock().take();

        if let Some(mut task) = self.task.lock().take() {
            // Never created: no thread to observe the flag
            self.shared.finish(&mut task);
            return;
        }
        if let Some(thread) = self.shared.thread.lock().as_ref() {
            thread.unpark();
        }
    }

    /// Wait for the task thread to exit; false if it is still running
    pub(crate) fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut handle = self.handle.lock();
        let Some(h) = handle.as_ref() else {
            return true;
        };
        while !h.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("Task '{}' did not exit within {:?}", self.shared.name, timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if let Some(h) = handle.take() {
            let _ = h.join();
        }
        true
    }
}

fn run_loop(shared: &TaskShared, task: &mut Box<dyn Task>, period: Duration, policy: DrainPolicy) {
    let mut ctx = TaskContext::new(&shared.name, period);

    loop {
        if shared.stopping() {
            return shared.finish(task);
        }

        let period_start = Instant::now();
        let drained = match panic::catch_unwind(AssertUnwindSafe(|| shared.mailbox.drain(policy))) {
            Ok(drained) => drained,
            Err(panic) => {
                return shared.fault(format!(
                    "queued command {}",
                    panic_message(panic.as_ref())
                ))
            }
        };
        ctx.begin_period(drained);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(&mut ctx)));
        shared
            .metrics
            .lock()
            .record_period(drained, period_start.elapsed(), period);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return shared.fault(e.to_string()),
            Err(panic) => return shared.fault(panic_message(panic.as_ref())),
        }
        if ctx.stop_requested() {
            return shared.finish(task);
        }

        if period.is_zero() {
            thread::yield_now();
            continue;
        }
        let next = period_start + period;
        loop {
            let now = Instant::now();
            if now >= next || shared.stopping() {
                break;
            }
            thread::park_timeout(next - now);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panic: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panic: {}", msg)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::QueuedInvocation;
    use crate::command::ExecutionResult;
    use std::sync::atomic::AtomicUsize;

    fn runner_with<T: Task + 'static>(task: T, period_ms: u64) -> (TaskRunner, Arc<StateCell>, Arc<Mailbox>) {
        let mailbox = Arc::new(Mailbox::new("unit", 8));
        let state = Arc::new(StateCell::new("proc", "unit", EventBus::new()));
        let runner = TaskRunner::new(
            Box::new(task),
            Duration::from_millis(period_ms),
            DrainPolicy::AllQueued,
            mailbox.clone(),
            state.clone(),
        );
        (runner, state, mailbox)
    }

    #[test]
    fn test_lifecycle_to_finished() {
        let periods = Arc::new(AtomicUsize::new(0));
        let counter = periods.clone();
        let (runner, state, _) = runner_with(
            move |_: &mut TaskContext| -> MtsResult<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            1,
        );
        assert_eq!(state.get(), TaskState::Constructed);
        runner.create().unwrap();
        assert!(state.wait_until(|s| *s == TaskState::Initializing, Duration::from_secs(1)));
        runner.start().unwrap();
        assert_eq!(state.get(), TaskState::Active);
        let deadline = Instant::now() + Duration::from_secs(2);
        while periods.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        runner.kill();
        assert!(state.wait_until(|s| *s == TaskState::Finished, Duration::from_secs(2)));
        assert!(runner.join(Duration::from_secs(1)));
        assert!(runner.metrics().periods >= 3);
    }

    #[test]
    fn test_run_error_faults_task() {
        let (runner, state, mailbox) = runner_with(
            |ctx: &mut TaskContext| {
                if ctx.period_count() == 2 {
                    Err(MtsError::Internal("sensor lost".into()))
                } else {
                    Ok(())
                }
            },
            1,
        );
        runner.create().unwrap();
        runner.start().unwrap();
        assert!(state.wait_until(|s| s.is_terminal(), Duration::from_secs(2)));
        assert_eq!(
            state.get(),
            TaskState::Faulted("Internal error: sensor lost".into())
        );
        assert!(mailbox.is_closed());
    }

    #[test]
    fn test_panic_faults_task() {
        let (runner, state, _) = runner_with(
            |_: &mut TaskContext| -> MtsResult<()> { panic!("assertion failed") },
            1,
        );
        runner.create().unwrap();
        runner.start().unwrap();
        assert!(state.wait_until(|s| s.is_terminal(), Duration::from_secs(2)));
        assert_eq!(state.get(), TaskState::Faulted("panic: assertion failed".into()));
    }

    #[test]
    fn test_kill_before_start_drops_queue() {
        let (runner, state, mailbox) = runner_with(|_: &mut TaskContext| -> MtsResult<()> { Ok(()) }, 1);
        runner.create().unwrap();
        mailbox.write(QueuedInvocation::new("noop", || ExecutionResult::Ok));
        runner.kill();
        assert!(state.wait_until(|s| *s == TaskState::Finished, Duration::from_secs(2)));
        assert_eq!(runner.metrics().commands_dropped, 1);
        assert!(runner.start().is_err());
    }

    #[test]
    fn test_panicking_queued_command_faults_task() {
        let (runner, state, mailbox) = runner_with(|_: &mut TaskContext| -> MtsResult<()> { Ok(()) }, 1);
        runner.create().unwrap();
        runner.start().unwrap();

        assert!(mailbox.write(QueuedInvocation::new("boom", || -> ExecutionResult {
            panic!("target assert")
        })));
        assert!(state.wait_until(|s| s.is_terminal(), Duration::from_secs(2)));
        assert_eq!(
            state.get(),
            TaskState::Faulted("queued command panic: target assert".into())
        );
        assert!(mailbox.is_closed());
        assert!(!mailbox.write(QueuedInvocation::new("late", || ExecutionResult::Ok)));
        assert!(runner.join(Duration::from_secs(1)));
    }
}
