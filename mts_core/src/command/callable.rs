use super::{Argument, Command, CommandKind, ExecutionResult, IntoExecutionResult, Invocation, Prototype};

type VoidAction = Box<dyn Fn() -> ExecutionResult + Send + Sync>;

fn kind_mismatch(name: &str, expected: CommandKind, got: CommandKind) -> ExecutionResult {
    log::debug!(
        "Command '{}' is {} but was invoked as {}",
        name,
        expected,
        got
    );
    ExecutionResult::BadInput
}

fn type_mismatch(name: &str, expected: &'static str) -> ExecutionResult {
    log::debug!(
        "Command '{}' rejected argument: expected {}",
        name,
        expected
    );
    ExecutionResult::BadInput
}

/// Command with no arguments
pub struct CommandVoid {
    name: String,
    owner: String,
    action: VoidAction,
}

impl CommandVoid {
    pub fn new<F, R>(name: impl Into<String>, owner: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoExecutionResult,
    {
        Self {
            name: name.into(),
            owner: owner.into(),
            action: Box::new(move || action().into_execution_result()),
        }
    }
}

impl Command for CommandVoid {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Void
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        match invocation {
            Invocation::Void => (self.action)(),
            other => kind_mismatch(&self.name, CommandKind::Void, other.kind()),
        }
    }

    fn describe(&self) -> String {
        format!("Void: {}() using \"{}\"", self.name, self.owner)
    }
}

/// Command taking one input argument
pub struct CommandWrite<T: Argument> {
    name: String,
    owner: String,
    action: Box<dyn Fn(&T) -> ExecutionResult + Send + Sync>,
}

impl<T: Argument> CommandWrite<T> {
    pub fn new<F, R>(name: impl Into<String>, owner: impl Into<String>, action: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoExecutionResult,
    {
        Self {
            name: name.into(),
            owner: owner.into(),
            action: Box::new(move |value: &T| action(value).into_execution_result()),
        }
    }
}

impl<T: Argument> Command for CommandWrite<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Write
    }

    fn argument_prototype(&self) -> Option<Prototype> {
        Some(Prototype::of::<T>())
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        match invocation {
            Invocation::Write(arg) => match arg.downcast_ref::<T>() {
                Some(value) => (self.action)(value),
                None => type_mismatch(&self.name, std::any::type_name::<T>()),
            },
            other => kind_mismatch(&self.name, CommandKind::Write, other.kind()),
        }
    }

    fn describe(&self) -> String {
        format!(
            "Write: {}({}) using \"{}\"",
            self.name,
            std::any::type_name::<T>(),
            self.owner
        )
    }
}

/// Command filling one output argument without side effects
pub struct CommandRead<T: Argument> {
    name: String,
    owner: String,
    action: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Argument> CommandRead<T> {
    pub fn new<F>(name: impl Into<String>, owner: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            owner: owner.into(),
            action: Box::new(action),
        }
    }
}

impl<T: Argument> Command for CommandRead<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Read
    }

    fn result_prototype(&self) -> Option<Prototype> {
        Some(Prototype::of::<T>())
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        match invocation {
            Invocation::Read(out) => match out.downcast_mut::<T>() {
                Some(slot) => {
                    *slot = (self.action)();
                    ExecutionResult::Ok
                }
                None => type_mismatch(&self.name, std::any::type_name::<T>()),
            },
            other => kind_mismatch(&self.name, CommandKind::Read, other.kind()),
        }
    }

    fn describe(&self) -> String {
        format!(
            "Read: {}() -> {} using \"{}\"",
            self.name,
            std::any::type_name::<T>(),
            self.owner
        )
    }
}

/// Command computing an output argument from an input argument
pub struct CommandQualifiedRead<A: Argument, R: Argument> {
    name: String,
    owner: String,
    action: Box<dyn Fn(&A) -> R + Send + Sync>,
}

impl<A: Argument, R: Argument> CommandQualifiedRead<A, R> {
    pub fn new<F>(name: impl Into<String>, owner: impl Into<String>, action: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            owner: owner.into(),
            action: Box::new(action),
        }
    }
}

impl<A: Argument, R: Argument> Command for CommandQualifiedRead<A, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        CommandKind::QualifiedRead
    }

    fn argument_prototype(&self) -> Option<Prototype> {
        Some(Prototype::of::<A>())
    }

    fn result_prototype(&self) -> Option<Prototype> {
        Some(Prototype::of::<R>())
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        match invocation {
            Invocation::QualifiedRead(arg, out) => {
                let Some(input) = arg.downcast_ref::<A>() else {
                    return type_mismatch(&self.name, std::any::type_name::<A>());
                };
                let Some(slot) = out.downcast_mut::<R>() else {
                    return type_mismatch(&self.name, std::any::type_name::<R>());
                };
                *slot = (self.action)(input);
                ExecutionResult::Ok
            }
            other => kind_mismatch(&self.name, CommandKind::QualifiedRead, other.kind()),
        }
    }

    fn describe(&self) -> String {
        format!(
            "QualifiedRead: {}({}) -> {} using \"{}\"",
            self.name,
            std::any::type_name::<A>(),
            std::any::type_name::<R>(),
            self.owner
        )
    }
}

/// Mutating command that hands a value back to the caller
pub struct CommandVoidReturn<R: Argument> {
    name: String,
    owner: String,
    action: Box<dyn Fn() -> R + Send + Sync>,
}

impl<R: Argument> CommandVoidReturn<R> {
    pub fn new<F>(name: impl Into<String>, owner: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            owner: owner.into(),
            action: Box::new(action),
        }
    }
}

impl<R: Argument> Command for CommandVoidReturn<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        CommandKind::VoidReturn
    }

    fn result_prototype(&self) -> Option<Prototype> {
        Some(Prototype::of::<R>())
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        match invocation {
            Invocation::VoidReturn(out) => match out.downcast_mut::<R>() {
                Some(slot) => {
                    *slot = (self.action)();
                    ExecutionResult::Ok
                }
                None => type_mismatch(&self.name, std::any::type_name::<R>()),
            },
            other => kind_mismatch(&self.name, CommandKind::VoidReturn, other.kind()),
        }
    }

    fn describe(&self) -> String {
        format!(
            "VoidReturn: {}() -> {} using \"{}\"",
            self.name,
            std::any::type_name::<R>(),
            self.owner
        )
    }
}
