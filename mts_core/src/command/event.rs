use super::{Argument, Command, CommandKind, Invocation, Prototype};
use crate::error::{MtsError, MtsResult};
use parking_lot::RwLock;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event source declared on a provided interface
///
/// Handlers are commands of the matching shape (Void or Write). Emitting an
/// event executes every attached handler; handlers owned by a task are
/// queued commands, so they run later on that task's thread.
pub struct EventGenerator {
    name: String,
    kind: CommandKind,
    prototype: Option<Prototype>,
    handlers: RwLock<Vec<(u64, Arc<dyn Command>)>>,
    next_token: AtomicU64,
}

impl EventGenerator {
    pub fn void(name: impl Into<String>) -> Self {
        Self::with_kind(name.into(), CommandKind::Void, None)
    }

    pub fn write<T: Argument>(name: impl Into<String>) -> Self {
        Self::with_kind(name.into(), CommandKind::Write, Some(Prototype::of::<T>()))
    }

    fn with_kind(name: String, kind: CommandKind, prototype: Option<Prototype>) -> Self {
        Self {
            name,
            kind,
            prototype,
            handlers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn prototype(&self) -> Option<Prototype> {
        self.prototype
    }

    /// Check that `handler` can receive this event
    pub fn accepts(&self, handler: &dyn Command) -> MtsResult<()> {
        if handler.kind() != self.kind {
            return Err(MtsError::TypeMismatch(format!(
                "event '{}' is {} but handler '{}' is {}",
                self.name,
                self.kind,
                handler.name(),
                handler.kind()
            )));
        }
        if handler.argument_prototype() != self.prototype {
            return Err(MtsError::TypeMismatch(format!(
                "event '{}' carries {:?} but handler '{}' expects {:?}",
                self.name,
                self.prototype,
                handler.name(),
                handler.argument_prototype()
            )));
        }
        Ok(())
    }

    /// Attach a handler, returning the token used to detach it
    pub fn attach(&self, handler: Arc<dyn Command>) -> MtsResult<u64> {
        self.accepts(handler.as_ref())?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((token, handler));
        Ok(token)
    }

    pub fn detach(&self, token: u64) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Command>> {
        self.handlers.read().iter().map(|(_, h)| h.clone()).collect()
    }

    /// Deliver a void event; returns how many handlers accepted it
    pub fn emit_void(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|h| h.execute(Invocation::Void).is_ok())
            .count()
    }

    /// Deliver a write event; returns how many handlers accepted it
    pub fn emit_write(&self, payload: &dyn Any) -> usize {
        match self.prototype {
            Some(proto) if proto.matches(payload) => {}
            _ => {
                log::debug!("Event '{}' emitted with a payload of the wrong type", self.name);
                return 0;
            }
        }
        self.snapshot()
            .iter()
            .filter(|h| h.execute(Invocation::Write(payload)).is_ok())
            .count()
    }
}

/// Typed handle for emitting a void event
#[derive(Clone)]
pub struct EventVoid {
    generator: Arc<EventGenerator>,
}

impl EventVoid {
    pub(crate) fn new(generator: Arc<EventGenerator>) -> Self {
        Self { generator }
    }

    pub fn emit(&self) -> usize {
        self.generator.emit_void()
    }
}

/// Typed handle for emitting an event with a payload
pub struct EventWrite<T: Argument> {
    generator: Arc<EventGenerator>,
    _payload: std::marker::PhantomData<fn(&T)>,
}

impl<T: Argument> EventWrite<T> {
    pub(crate) fn new(generator: Arc<EventGenerator>) -> Self {
        Self {
            generator,
            _payload: std::marker::PhantomData,
        }
    }

    pub fn emit(&self, payload: &T) -> usize {
        self.generator.emit_write(payload)
    }
}

impl<T: Argument> Clone for EventWrite<T> {
    fn clone(&self) -> Self {
        Self::new(self.generator.clone())
    }
}
