use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single command invocation
///
/// Every invocation path (local, queued, proxied) reports through this code.
/// A caller that ignores it simply does not get the effect; success and
/// failure are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// The target ran
    Ok,
    /// Accepted into the owning task's mailbox, will run on its thread
    Queued,
    /// Runtime argument type does not match the prototype, nothing ran
    BadInput,
    /// Mailbox at capacity, invocation rejected
    MailboxFull,
    /// Function slot has no target bound to it
    NotBound,
    /// The owning task is not accepting commands any more
    TaskNotRunning,
    /// Queued command did not complete in time
    Timeout,
    /// The target itself reported a failure
    MethodFailed,
    /// The servant does not know the command id
    InvalidCommandId,
    /// Disconnect or timeout on the proxy transport
    TransportFailure,
    /// Encoded payload could not be decoded
    SerializationFailure,
}

impl ExecutionResult {
    /// True when the invocation was carried out or accepted for execution
    pub fn is_ok(self) -> bool {
        matches!(self, ExecutionResult::Ok | ExecutionResult::Queued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Queued => "QUEUED",
            Self::BadInput => "BAD_INPUT",
            Self::MailboxFull => "MAILBOX_FULL",
            Self::NotBound => "NOT_BOUND",
            Self::TaskNotRunning => "TASK_NOT_RUNNING",
            Self::Timeout => "TIMEOUT",
            Self::MethodFailed => "METHOD_FAILED",
            Self::InvalidCommandId => "INVALID_COMMAND_ID",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::SerializationFailure => "SERIALIZATION_FAILURE",
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion for values returned by command targets
///
/// Lets a target be written as a plain closure (`()`), report a code
/// directly, or return a `Result` whose error becomes `MethodFailed`.
pub trait IntoExecutionResult {
    fn into_execution_result(self) -> ExecutionResult;
}

impl IntoExecutionResult for () {
    fn into_execution_result(self) -> ExecutionResult {
        ExecutionResult::Ok
    }
}

impl IntoExecutionResult for ExecutionResult {
    fn into_execution_result(self) -> ExecutionResult {
        self
    }
}

impl<E: fmt::Display> IntoExecutionResult for Result<(), E> {
    fn into_execution_result(self) -> ExecutionResult {
        match self {
            Ok(()) => ExecutionResult::Ok,
            Err(e) => {
                log::debug!("Command target failed: {}", e);
                ExecutionResult::MethodFailed
            }
        }
    }
}
