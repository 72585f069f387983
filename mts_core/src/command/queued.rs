use super::{Command, CommandKind, ExecutionResult, Invocation, Prototype};
use crate::task::{Mailbox, QueuedInvocation};
use crossbeam::channel::{self, RecvTimeoutError};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Routes Void, Write and VoidReturn invocations through a task mailbox
///
/// The wrapped command then always runs on the task's own thread. Void and
/// Write return as soon as the record is queued; VoidReturn waits for the
/// task to run it, bounded by `return_timeout`. Read and QualifiedRead are
/// passed straight through to the wrapped command.
pub struct QueuedCommand {
    inner: Arc<dyn Command>,
    mailbox: Arc<Mailbox>,
    return_timeout: Duration,
}

type Returned = (ExecutionResult, Box<dyn Any + Send>);

impl QueuedCommand {
    pub fn new(inner: Arc<dyn Command>, mailbox: Arc<Mailbox>, return_timeout: Duration) -> Self {
        Self {
            inner,
            mailbox,
            return_timeout,
        }
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    fn enqueue(&self, record: QueuedInvocation) -> ExecutionResult {
        if self.mailbox.write(record) {
            ExecutionResult::Queued
        } else if self.mailbox.is_closed() {
            ExecutionResult::TaskNotRunning
        } else {
            ExecutionResult::MailboxFull
        }
    }

    fn enqueue_write(&self, arg: &dyn Any) -> ExecutionResult {
        let Some(proto) = self.inner.argument_prototype() else {
            return ExecutionResult::BadInput;
        };
        let Some(value) = proto.clone_value(arg) else {
            log::debug!(
                "Queued command '{}' rejected argument: expected {}",
                self.inner.name(),
                proto.type_name()
            );
            return ExecutionResult::BadInput;
        };
        let inner = self.inner.clone();
        self.enqueue(QueuedInvocation::new(self.inner.name(), move || {
            let arg: &dyn Any = &*value;
            inner.execute(Invocation::Write(arg))
        }))
    }

    fn enqueue_void_return(&self, out: &mut dyn Any) -> ExecutionResult {
        let Some(proto) = self.inner.result_prototype() else {
            return ExecutionResult::BadInput;
        };
        if !proto.matches(out) {
            log::debug!(
                "Queued command '{}' rejected output: expected {}",
                self.inner.name(),
                proto.type_name()
            );
            return ExecutionResult::BadInput;
        }

        let (tx, rx) = channel::bounded::<Returned>(1);
        let inner = self.inner.clone();
        let record = QueuedInvocation::new(self.inner.name(), move || {
            let mut value = proto.create();
            let result = inner.execute(Invocation::VoidReturn(&mut *value));
            let _ = tx.send((result, value));
            result
        });
        let queued = self.enqueue(record);
        if queued != ExecutionResult::Queued {
            return queued;
        }

        match rx.recv_timeout(self.return_timeout) {
            Ok((result, value)) => {
                if result.is_ok() && !proto.assign(value, out) {
                    return ExecutionResult::BadInput;
                }
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Queued command '{}' did not complete within {:?}",
                    self.inner.name(),
                    self.return_timeout
                );
                ExecutionResult::Timeout
            }
            // Record dropped unexecuted: the task stopped
            Err(RecvTimeoutError::Disconnected) => ExecutionResult::TaskNotRunning,
        }
    }
}

impl Command for QueuedCommand {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> CommandKind {
        self.inner.kind()
    }

    fn argument_prototype(&self) -> Option<Prototype> {
        self.inner.argument_prototype()
    }

    fn result_prototype(&self) -> Option<Prototype> {
        self.inner.result_prototype()
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        if invocation.kind() != self.inner.kind() {
            log::debug!(
                "Queued command '{}' is {} but was invoked as {}",
                self.inner.name(),
                self.inner.kind(),
                invocation.kind()
            );
            return ExecutionResult::BadInput;
        }
        match invocation {
            Invocation::Read(_) | Invocation::QualifiedRead(_, _) => self.inner.execute(invocation),
            _ if self.mailbox.is_closed() => ExecutionResult::TaskNotRunning,
            Invocation::Void => {
                let inner = self.inner.clone();
                self.enqueue(QueuedInvocation::new(self.inner.name(), move || {
                    inner.execute(Invocation::Void)
                }))
            }
            Invocation::Write(arg) => self.enqueue_write(arg),
            Invocation::VoidReturn(out) => self.enqueue_void_return(out),
        }
    }

    fn describe(&self) -> String {
        format!("{} [queued on '{}']", self.inner.describe(), self.mailbox.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandRead, CommandVoidReturn, CommandWrite};
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_write_is_deferred_until_drain() {
        let mailbox = Arc::new(Mailbox::new("motor", 4));
        let value = Arc::new(Mutex::new(0.0f64));
        let sink = value.clone();
        let inner: Arc<dyn Command> = Arc::new(CommandWrite::new("SetSpeed", "motor", move |v: &f64| {
            *sink.lock() = *v;
        }));
        let queued = QueuedCommand::new(inner, mailbox.clone(), Duration::from_millis(100));

        assert_eq!(queued.execute(Invocation::Write(&2.5f64)), ExecutionResult::Queued);
        assert_eq!(*value.lock(), 0.0);
        assert!(mailbox.execute_next());
        assert_eq!(*value.lock(), 2.5);

        assert_eq!(queued.execute(Invocation::Write(&1u8)), ExecutionResult::BadInput);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_full_and_closed_mailbox() {
        let mailbox = Arc::new(Mailbox::new("motor", 1));
        let inner: Arc<dyn Command> = Arc::new(CommandWrite::new("SetSpeed", "motor", |_: &f64| {}));
        let queued = QueuedCommand::new(inner, mailbox.clone(), Duration::from_millis(100));

        assert_eq!(queued.execute(Invocation::Write(&1.0f64)), ExecutionResult::Queued);
        assert_eq!(queued.execute(Invocation::Write(&2.0f64)), ExecutionResult::MailboxFull);
        mailbox.close();
        assert_eq!(
            queued.execute(Invocation::Write(&3.0f64)),
            ExecutionResult::TaskNotRunning
        );
    }

    #[test]
    fn test_read_bypasses_mailbox() {
        let mailbox = Arc::new(Mailbox::new("sensor", 1));
        let inner: Arc<dyn Command> = Arc::new(CommandRead::new("GetX", "sensor", || 42i32));
        let queued = QueuedCommand::new(inner, mailbox.clone(), Duration::from_millis(100));
        let mut x = 0i32;
        assert_eq!(queued.execute(Invocation::Read(&mut x)), ExecutionResult::Ok);
        assert_eq!(x, 42);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_void_return_waits_for_task_thread() {
        let mailbox = Arc::new(Mailbox::new("counter", 4));
        let inner: Arc<dyn Command> = Arc::new(CommandVoidReturn::new("Next", "counter", || {
            thread::current().name().unwrap_or("").to_string()
        }));
        let queued = QueuedCommand::new(inner, mailbox.clone(), Duration::from_secs(5));

        let worker_box = mailbox.clone();
        let worker = thread::Builder::new()
            .name("task-thread".to_string())
            .spawn(move || {
                while !worker_box.execute_next() {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        let mut ran_on = String::new();
        assert_eq!(
            queued.execute(Invocation::VoidReturn(&mut ran_on)),
            ExecutionResult::Ok
        );
        assert_eq!(ran_on, "task-thread");
        worker.join().unwrap();
    }

    #[test]
    fn test_void_return_dropped_record_reports_not_running() {
        let mailbox = Arc::new(Mailbox::new("counter", 4));
        let inner: Arc<dyn Command> = Arc::new(CommandVoidReturn::new("Next", "counter", || 1u32));
        let queued = QueuedCommand::new(inner, mailbox.clone(), Duration::from_secs(5));

        let closer = mailbox.clone();
        let handle = thread::spawn(move || {
            while closer.is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
            closer.close();
        });
        let mut out = 0u32;
        assert_eq!(
            queued.execute(Invocation::VoidReturn(&mut out)),
            ExecutionResult::TaskNotRunning
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_void_return_times_out() {
        let mailbox = Arc::new(Mailbox::new("counter", 4));
        let inner: Arc<dyn Command> = Arc::new(CommandVoidReturn::new("Next", "counter", || 1u32));
        let queued = QueuedCommand::new(inner, mailbox, Duration::from_millis(20));
        let mut out = 0u32;
        assert_eq!(
            queued.execute(Invocation::VoidReturn(&mut out)),
            ExecutionResult::Timeout
        );
    }
}
