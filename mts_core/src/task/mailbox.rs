use super::DrainPolicy;
use crate::command::ExecutionResult;
use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A pending invocation addressed to a task
///
/// The closure owns everything the invocation needs (the target command and
/// a private copy of the argument), so it can be moved to the task thread
/// and run there without touching the caller again.
pub struct QueuedInvocation {
    command: String,
    run: Box<dyn FnOnce() -> ExecutionResult + Send>,
}

impl QueuedInvocation {
    pub fn new<F>(command: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> ExecutionResult + Send + 'static,
    {
        Self {
            command: command.into(),
            run: Box::new(run),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn execute(self) -> ExecutionResult {
        (self.run)()
    }
}

impl fmt::Debug for QueuedInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedInvocation")
            .field("command", &self.command)
            .finish()
    }
}

/// Bounded multi-producer queue of invocations for one task
///
/// `write` never blocks: it either stores the record or reports failure.
/// Records execute in the order they were written. Once closed the mailbox
/// rejects every write and the records still queued are dropped unexecuted.
pub struct Mailbox {
    name: String,
    queue: ArrayQueue<QueuedInvocation>,
    closed: AtomicBool,
    rejected: AtomicU64,
}

impl Mailbox {
    /// Mailbox holding up to `capacity` records
    ///
    /// A capacity of 0 is raised to 1; task components reject it earlier
    /// through [`TaskOptions::validate`](super::TaskOptions::validate).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            queue: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a record; false when the mailbox is full or closed
    pub fn write(&self, record: QueuedInvocation) -> bool {
        if self.is_closed() {
            return false;
        }
        if let Err(record) = self.queue.push(record) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Mailbox '{}' full ({}), rejected '{}'",
                self.name,
                self.queue.capacity(),
                record.command()
            );
            return false;
        }
        // A close racing with this push must not leave the record behind
        if self.is_closed() {
            self.clear();
            return false;
        }
        true
    }

    /// Run the oldest record on the calling thread; false when empty
    pub fn execute_next(&self) -> bool {
        match self.queue.pop() {
            Some(record) => {
                let command = record.command.clone();
                let result = record.execute();
                if !result.is_ok() {
                    log::debug!(
                        "Mailbox '{}': queued '{}' returned {}",
                        self.name,
                        command,
                        result
                    );
                }
                true
            }
            None => false,
        }
    }

    /// Execute queued records according to `policy`, returning how many ran
    ///
    /// With [`DrainPolicy::AllQueued`] only the records present when the
    /// drain starts are executed, so writers cannot keep a period busy.
    pub fn drain(&self, policy: DrainPolicy) -> usize {
        let budget = match policy {
            DrainPolicy::AllQueued => self.queue.len(),
            DrainPolicy::OnePerPeriod => 1,
        };
        let mut executed = 0;
        while executed < budget && self.execute_next() {
            executed += 1;
        }
        executed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of writes rejected because the queue was full
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Drop every queued record without running it
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Stop accepting writes and drop what is still queued
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = self.clear();
        if dropped > 0 {
            log::debug!("Mailbox '{}' closed, dropped {} queued", self.name, dropped);
        }
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;

    fn recording(log: &Arc<Mutex<Vec<usize>>>, i: usize) -> QueuedInvocation {
        let log = log.clone();
        QueuedInvocation::new(format!("cmd{}", i), move || {
            log.lock().push(i);
            ExecutionResult::Ok
        })
    }

    #[test]
    fn test_fifo_order() {
        let mailbox = Mailbox::new("arm", 8);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            assert!(mailbox.write(recording(&log, i)));
        }
        for _ in 0..5 {
            assert!(mailbox.execute_next());
        }
        assert!(!mailbox.execute_next());
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_mailbox_rejects_and_keeps_queue() {
        let mailbox = Mailbox::new("arm", 2);
        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(mailbox.write(recording(&log, 0)));
        assert!(mailbox.write(recording(&log, 1)));
        assert!(!mailbox.write(recording(&log, 2)));
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.rejected(), 1);

        assert_eq!(mailbox.drain(DrainPolicy::AllQueued), 2);
        assert_eq!(*log.lock(), vec![0, 1]);
    }

    #[test]
    fn test_drain_policies() {
        let mailbox = Mailbox::new("arm", 4);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            mailbox.write(recording(&log, i));
        }
        assert_eq!(mailbox.drain(DrainPolicy::OnePerPeriod), 1);
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.drain(DrainPolicy::AllQueued), 2);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_drain_ignores_records_written_during_drain() {
        let mailbox = Arc::new(Mailbox::new("arm", 4));
        let inner = mailbox.clone();
        mailbox.write(QueuedInvocation::new("requeue", move || {
            inner.write(QueuedInvocation::new("later", || ExecutionResult::Ok));
            ExecutionResult::Ok
        }));
        assert_eq!(mailbox.drain(DrainPolicy::AllQueued), 1);
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn test_close_drops_queued() {
        let mailbox = Mailbox::new("arm", 4);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            mailbox.write(recording(&log, i));
        }
        assert_eq!(mailbox.close(), 3);
        assert!(!mailbox.write(recording(&log, 9)));
        assert!(!mailbox.execute_next());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_concurrent_writers_never_exceed_capacity() {
        let mailbox = Arc::new(Mailbox::new("arm", 16));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mailbox = mailbox.clone();
                thread::spawn(move || {
                    let mut accepted = 0;
                    for _ in 0..100 {
                        if mailbox.write(QueuedInvocation::new("tick", || ExecutionResult::Ok)) {
                            accepted += 1;
                        }
                        assert!(mailbox.len() <= mailbox.capacity());
                    }
                    accepted
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 16);
        assert_eq!(mailbox.len(), 16);
        assert_eq!(mailbox.rejected(), 800 - 16);
    }
}
