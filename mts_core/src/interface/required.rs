use super::CommandDescription;
use crate::command::{
    Argument, Command, CommandKind, CommandVoid, CommandWrite, ExecutionResult,
    IntoExecutionResult, Invocation, Prototype, QueuedCommand,
};
use crate::error::{MtsError, MtsResult};
use crate::task::Mailbox;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A function a component needs, bound to a command at connect time
///
/// Until bound every invocation returns [`ExecutionResult::NotBound`].
pub struct FunctionSlot {
    name: String,
    kind: CommandKind,
    argument: Option<Prototype>,
    result: Option<Prototype>,
    optional: AtomicBool,
    target: RwLock<Option<Arc<dyn Command>>>,
}

impl FunctionSlot {
    fn new(
        name: &str,
        kind: CommandKind,
        argument: Option<Prototype>,
        result: Option<Prototype>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            argument,
            result,
            optional: AtomicBool::new(false),
            target: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn argument_prototype(&self) -> Option<Prototype> {
        self.argument
    }

    pub fn result_prototype(&self) -> Option<Prototype> {
        self.result
    }

    /// Optional slots may stay unbound when the provider lacks the command
    pub fn is_optional(&self) -> bool {
        self.optional.load(Ordering::Relaxed)
    }

    pub fn is_bound(&self) -> bool {
        self.target.read().is_some()
    }

    pub fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        // Clone out so a concurrent rebind never waits on a running call
        let target = self.target.read().clone();
        match target {
            Some(command) => command.execute(invocation),
            None => ExecutionResult::NotBound,
        }
    }

    pub fn describe(&self) -> CommandDescription {
        CommandDescription {
            name: self.name.clone(),
            kind: self.kind,
            argument_type: self.argument.map(|p| p.type_name().to_string()),
            result_type: self.result.map(|p| p.type_name().to_string()),
        }
    }

    /// Whether `command` has this slot's shape and argument types
    pub fn check_compatible(&self, command: &dyn Command) -> MtsResult<()> {
        self.check_description(&CommandDescription::of(command))
    }

    /// Same check against a remote catalogue entry
    pub fn check_description(&self, desc: &CommandDescription) -> MtsResult<()> {
        let mine = self.describe();
        if desc.kind != mine.kind {
            return Err(MtsError::TypeMismatch(format!(
                "function '{}' is {} but the provided command is {}",
                self.name, mine.kind, desc.kind
            )));
        }
        if desc.argument_type != mine.argument_type || desc.result_type != mine.result_type {
            return Err(MtsError::TypeMismatch(format!(
                "function '{}' expects ({:?} -> {:?}) but the provided command has ({:?} -> {:?})",
                self.name, mine.argument_type, mine.result_type, desc.argument_type, desc.result_type
            )));
        }
        Ok(())
    }

    pub(crate) fn bind(&self, command: Arc<dyn Command>) {
        *self.target.write() = Some(command);
    }

    pub(crate) fn unbind(&self) {
        self.target.write().take();
    }
}

impl std::fmt::Debug for FunctionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSlot")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Typed handle to a void function slot
#[derive(Clone)]
pub struct FunctionVoid {
    slot: Arc<FunctionSlot>,
}

impl FunctionVoid {
    pub fn execute(&self) -> ExecutionResult {
        self.slot.execute(Invocation::Void)
    }

    pub fn optional(self) -> Self {
        self.slot.optional.store(true, Ordering::Relaxed);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }
}

/// Typed handle to a write function slot
pub struct FunctionWrite<T: Argument> {
    slot: Arc<FunctionSlot>,
    _arg: PhantomData<fn(&T)>,
}

impl<T: Argument> FunctionWrite<T> {
    pub fn execute(&self, value: &T) -> ExecutionResult {
        self.slot.execute(Invocation::Write(value))
    }

    pub fn optional(self) -> Self {
        self.slot.optional.store(true, Ordering::Relaxed);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }
}

/// Typed handle to a read function slot
pub struct FunctionRead<T: Argument> {
    slot: Arc<FunctionSlot>,
    _arg: PhantomData<fn() -> T>,
}

impl<T: Argument> FunctionRead<T> {
    /// Fill `out`; left untouched unless the result is Ok
    pub fn execute(&self, out: &mut T) -> ExecutionResult {
        self.slot.execute(Invocation::Read(out))
    }

    pub fn call(&self) -> (ExecutionResult, T) {
        let mut out = T::default();
        let result = self.execute(&mut out);
        (result, out)
    }

    pub fn optional(self) -> Self {
        self.slot.optional.store(true, Ordering::Relaxed);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }
}

/// Typed handle to a qualified read function slot
pub struct FunctionQualifiedRead<A: Argument, R: Argument> {
    slot: Arc<FunctionSlot>,
    _args: PhantomData<fn(&A) -> R>,
}

impl<A: Argument, R: Argument> FunctionQualifiedRead<A, R> {
    pub fn execute(&self, input: &A, out: &mut R) -> ExecutionResult {
        self.slot.execute(Invocation::QualifiedRead(input, out))
    }

    pub fn call(&self, input: &A) -> (ExecutionResult, R) {
        let mut out = R::default();
        let result = self.execute(input, &mut out);
        (result, out)
    }

    pub fn optional(self) -> Self {
        self.slot.optional.store(true, Ordering::Relaxed);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }
}

/// Typed handle to a void-return function slot
pub struct FunctionVoidReturn<R: Argument> {
    slot: Arc<FunctionSlot>,
    _arg: PhantomData<fn() -> R>,
}

impl<R: Argument> FunctionVoidReturn<R> {
    pub fn execute(&self, out: &mut R) -> ExecutionResult {
        self.slot.execute(Invocation::VoidReturn(out))
    }

    pub fn call(&self) -> (ExecutionResult, R) {
        let mut out = R::default();
        let result = self.execute(&mut out);
        (result, out)
    }

    pub fn optional(self) -> Self {
        self.slot.optional.store(true, Ordering::Relaxed);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }
}

macro_rules! impl_clone_handle {
    ($handle:ident < $($param:ident),+ >, $marker:ident) => {
        impl<$($param: Argument),+> Clone for $handle<$($param),+> {
            fn clone(&self) -> Self {
                Self {
                    slot: self.slot.clone(),
                    $marker: PhantomData,
                }
            }
        }
    };
}

impl_clone_handle!(FunctionWrite<T>, _arg);
impl_clone_handle!(FunctionRead<T>, _arg);
impl_clone_handle!(FunctionQualifiedRead<A, R>, _args);
impl_clone_handle!(FunctionVoidReturn<R>, _arg);

/// Functions and event handlers a component needs from one provider
pub struct RequiredInterface {
    name: String,
    owner: String,
    mailbox: Option<Arc<Mailbox>>,
    return_timeout: Duration,
    slots: BTreeMap<String, Arc<FunctionSlot>>,
    handlers: BTreeMap<String, Arc<dyn Command>>,
    connected: Arc<AtomicBool>,
}

impl RequiredInterface {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            mailbox: None,
            return_timeout: Duration::ZERO,
            slots: BTreeMap::new(),
            handlers: BTreeMap::new(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Interface whose event handlers are queued on a task mailbox
    pub(crate) fn queued(
        name: impl Into<String>,
        owner: impl Into<String>,
        mailbox: Arc<Mailbox>,
        return_timeout: Duration,
    ) -> Self {
        Self {
            mailbox: Some(mailbox),
            return_timeout,
            ..Self::new(name, owner)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn add_slot(
        &mut self,
        name: &str,
        kind: CommandKind,
        argument: Option<Prototype>,
        result: Option<Prototype>,
    ) -> MtsResult<Arc<FunctionSlot>> {
        if self.slots.contains_key(name) {
            return Err(MtsError::DuplicateName(format!(
                "function '{}' in interface '{}.{}'",
                name, self.owner, self.name
            )));
        }
        if self.is_connected() {
            return Err(MtsError::InvalidState(format!(
                "interface '{}.{}' is already connected",
                self.owner, self.name
            )));
        }
        let slot = Arc::new(FunctionSlot::new(name, kind, argument, result));
        self.slots.insert(name.to_string(), slot.clone());
        Ok(slot)
    }

    pub fn add_function_void(&mut self, name: &str) -> MtsResult<FunctionVoid> {
        let slot = self.add_slot(name, CommandKind::Void, None, None)?;
        Ok(FunctionVoid { slot })
    }

    pub fn add_function_write<T: Argument>(&mut self, name: &str) -> MtsResult<FunctionWrite<T>> {
        let slot = self.add_slot(name, CommandKind::Write, Some(Prototype::of::<T>()), None)?;
        Ok(FunctionWrite {
            slot,
            _arg: PhantomData,
        })
    }

    pub fn add_function_read<T: Argument>(&mut self, name: &str) -> MtsResult<FunctionRead<T>> {
        let slot = self.add_slot(name, CommandKind::Read, None, Some(Prototype::of::<T>()))?;
        Ok(FunctionRead {
            slot,
            _arg: PhantomData,
        })
    }

    pub fn add_function_qualified_read<A: Argument, R: Argument>(
        &mut self,
        name: &str,
    ) -> MtsResult<FunctionQualifiedRead<A, R>> {
        let slot = self.add_slot(
            name,
            CommandKind::QualifiedRead,
            Some(Prototype::of::<A>()),
            Some(Prototype::of::<R>()),
        )?;
        Ok(FunctionQualifiedRead {
            slot,
            _args: PhantomData,
        })
    }

    pub fn add_function_void_return<R: Argument>(
        &mut self,
        name: &str,
    ) -> MtsResult<FunctionVoidReturn<R>> {
        let slot = self.add_slot(name, CommandKind::VoidReturn, None, Some(Prototype::of::<R>()))?;
        Ok(FunctionVoidReturn {
            slot,
            _arg: PhantomData,
        })
    }

    fn add_handler(&mut self, handler: Arc<dyn Command>) -> MtsResult<&mut Self> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(MtsError::DuplicateName(format!(
                "event handler '{}' in interface '{}.{}'",
                name, self.owner, self.name
            )));
        }
        let handler: Arc<dyn Command> = match &self.mailbox {
            Some(mailbox) => Arc::new(QueuedCommand::new(
                handler,
                mailbox.clone(),
                self.return_timeout,
            )),
            None => handler,
        };
        self.handlers.insert(name, handler);
        Ok(self)
    }

    /// Handle the provider's void event `name`
    pub fn add_event_handler_void<F, R>(&mut self, name: &str, handler: F) -> MtsResult<&mut Self>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoExecutionResult,
    {
        let command = CommandVoid::new(name, self.owner.as_str(), handler);
        self.add_handler(Arc::new(command))
    }

    pub fn add_event_handler_write<T, F, R>(
        &mut self,
        name: &str,
        handler: F,
    ) -> MtsResult<&mut Self>
    where
        T: Argument,
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoExecutionResult,
    {
        let command = CommandWrite::new(name, self.owner.as_str(), handler);
        self.add_handler(Arc::new(command))
    }

    pub fn slots(&self) -> Vec<Arc<FunctionSlot>> {
        self.slots.values().cloned().collect()
    }

    pub fn slot(&self, name: &str) -> Option<Arc<FunctionSlot>> {
        self.slots.get(name).cloned()
    }

    pub fn handlers(&self) -> Vec<Arc<dyn Command>> {
        self.handlers.values().cloned().collect()
    }

    pub fn has_event_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }
}

impl std::fmt::Debug for RequiredInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequiredInterface")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("connected", &self.is_connected())
            .finish()
    }
}
