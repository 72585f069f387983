//! Typed command objects
//!
//! A command binds a name and argument prototypes to a target operation.
//! Invocations arrive as [`Invocation`] values carrying type-erased
//! arguments; every concrete command checks the runtime type against its
//! prototype before dispatch and answers [`ExecutionResult::BadInput`]
//! instead of touching the target when they disagree.

mod callable;
mod event;
mod prototype;
mod queued;
mod result;

pub use callable::{CommandQualifiedRead, CommandRead, CommandVoid, CommandVoidReturn, CommandWrite};
pub use event::{EventGenerator, EventVoid, EventWrite};
pub use prototype::{Argument, Prototype};
pub use queued::QueuedCommand;
pub use result::{ExecutionResult, IntoExecutionResult};

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// The five command shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// No argument, no result
    Void,
    /// One input argument
    Write,
    /// One output argument
    Read,
    /// One input argument, one output argument
    QualifiedRead,
    /// Output argument produced by a mutating operation (queued on tasks)
    VoidReturn,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "Void",
            Self::Write => "Write",
            Self::Read => "Read",
            Self::QualifiedRead => "QualifiedRead",
            Self::VoidReturn => "VoidReturn",
        }
    }

    /// Whether invocations of this kind are routed through a task mailbox
    pub fn is_queueable(&self) -> bool {
        matches!(self, Self::Void | Self::Write | Self::VoidReturn)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a single invocation
pub enum Invocation<'a> {
    Void,
    Write(&'a dyn Any),
    Read(&'a mut dyn Any),
    QualifiedRead(&'a dyn Any, &'a mut dyn Any),
    VoidReturn(&'a mut dyn Any),
}

impl Invocation<'_> {
    pub fn kind(&self) -> CommandKind {
        match self {
            Invocation::Void => CommandKind::Void,
            Invocation::Write(_) => CommandKind::Write,
            Invocation::Read(_) => CommandKind::Read,
            Invocation::QualifiedRead(_, _) => CommandKind::QualifiedRead,
            Invocation::VoidReturn(_) => CommandKind::VoidReturn,
        }
    }
}

/// A named, typed, executable operation
///
/// `execute` never panics on misuse and never returns an error type: every
/// failure is a result code. `execute_serialized` is the servant-side entry
/// point used by the proxy layer; its default implementation decodes the
/// input with the argument prototype, creates an output placeholder from the
/// result prototype and encodes the output after a successful run.
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> CommandKind;

    /// Expected type of the input argument (Write, QualifiedRead)
    fn argument_prototype(&self) -> Option<Prototype> {
        None
    }

    /// Expected type of the output argument (Read, QualifiedRead, VoidReturn)
    fn result_prototype(&self) -> Option<Prototype> {
        None
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult;

    fn execute_serialized(&self, payload: &[u8]) -> (ExecutionResult, Option<Vec<u8>>) {
        execute_serialized_with(self, payload)
    }

    /// Human-readable description for diagnostics
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

fn execute_serialized_with<C: Command + ?Sized>(
    command: &C,
    payload: &[u8],
) -> (ExecutionResult, Option<Vec<u8>>) {
    let input = match command.kind() {
        CommandKind::Write | CommandKind::QualifiedRead => {
            let Some(proto) = command.argument_prototype() else {
                return (ExecutionResult::BadInput, None);
            };
            match proto.decode(payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!("Command '{}': cannot decode argument: {}", command.name(), e);
                    return (ExecutionResult::SerializationFailure, None);
                }
            }
        }
        _ => None,
    };

    let mut output = match command.kind() {
        CommandKind::Read | CommandKind::QualifiedRead | CommandKind::VoidReturn => {
            match command.result_prototype() {
                Some(proto) => Some((proto, proto.create())),
                None => return (ExecutionResult::BadInput, None),
            }
        }
        _ => None,
    };

    let result = match (command.kind(), input.as_deref(), output.as_mut()) {
        (CommandKind::Void, _, _) => command.execute(Invocation::Void),
        (CommandKind::Write, Some(arg), _) => command.execute(Invocation::Write(arg)),
        (CommandKind::Read, _, Some((_, out))) => command.execute(Invocation::Read(&mut **out)),
        (CommandKind::QualifiedRead, Some(arg), Some((_, out))) => {
            command.execute(Invocation::QualifiedRead(arg, &mut **out))
        }
        (CommandKind::VoidReturn, _, Some((_, out))) => {
            command.execute(Invocation::VoidReturn(&mut **out))
        }
        _ => ExecutionResult::BadInput,
    };

    match output {
        Some((proto, out)) if result.is_ok() => match proto.encode(&*out) {
            Ok(bytes) => (result, Some(bytes)),
            Err(e) => {
                log::debug!("Command '{}': cannot encode result: {}", command.name(), e);
                (ExecutionResult::SerializationFailure, None)
            }
        },
        _ => (result, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::codec;

    #[test]
    fn test_serialized_write_and_read() {
        let store = std::sync::Arc::new(parking_lot::Mutex::new(0i64));
        let sink = store.clone();
        let write = CommandWrite::new("SetGoal", "planner", move |v: &i64| {
            *sink.lock() = *v;
        });
        let (result, out) = write.execute_serialized(&codec::encode(&17i64).unwrap());
        assert_eq!(result, ExecutionResult::Ok);
        assert!(out.is_none());
        assert_eq!(*store.lock(), 17);

        let source = store.clone();
        let read = CommandRead::new("GetGoal", "planner", move || *source.lock());
        let (result, out) = read.execute_serialized(&[]);
        assert_eq!(result, ExecutionResult::Ok);
        assert_eq!(codec::decode::<i64>(&out.unwrap()).unwrap(), 17);
    }

    #[test]
    fn test_serialized_wrong_payload_type() {
        let write = CommandWrite::new("SetGoal", "planner", |_: &i64| {});
        let (result, _) = write.execute_serialized(&codec::encode(&"x".to_string()).unwrap());
        assert_eq!(result, ExecutionResult::SerializationFailure);
    }

    #[test]
    fn test_qualified_read_serialized() {
        let scale = CommandQualifiedRead::new("Scale", "math", |v: &f64| v * 2.0);
        let (result, out) = scale.execute_serialized(&codec::encode(&1.5f64).unwrap());
        assert_eq!(result, ExecutionResult::Ok);
        assert_eq!(codec::decode::<f64>(&out.unwrap()).unwrap(), 3.0);
    }
}
