use super::{FunctionSlot, ProvidedInterface, RequiredInterface};
use crate::command::{Command, EventGenerator};
use crate::error::{MtsError, MtsResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fully validated set of slot targets and event attachments
///
/// Nothing is bound until [`commit`](BindingPlan::commit), and a failed
/// commit leaves every slot and generator as it was.
pub struct BindingPlan {
    label: String,
    connected: Arc<AtomicBool>,
    slots: Vec<(Arc<FunctionSlot>, Arc<dyn Command>)>,
    handlers: Vec<(Arc<EventGenerator>, Arc<dyn Command>)>,
}

impl BindingPlan {
    pub(crate) fn new(required: &RequiredInterface) -> MtsResult<Self> {
        let label = format!("{}.{}", required.owner(), required.name());
        if required.is_connected() {
            return Err(MtsError::AlreadyConnected(format!(
                "required interface '{}' is already connected",
                label
            )));
        }
        Ok(Self {
            label,
            connected: required.connected_flag(),
            slots: Vec::new(),
            handlers: Vec::new(),
        })
    }

    pub(crate) fn bind_slot(&mut self, slot: Arc<FunctionSlot>, target: Arc<dyn Command>) {
        self.slots.push((slot, target));
    }

    pub(crate) fn attach_handler(&mut self, event: Arc<EventGenerator>, handler: Arc<dyn Command>) {
        self.handlers.push((event, handler));
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Bind everything or nothing
    pub fn commit(self) -> MtsResult<Binding> {
        if self
            .connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MtsError::AlreadyConnected(format!(
                "required interface '{}' is already connected",
                self.label
            )));
        }

        let mut attachments = Vec::with_capacity(self.handlers.len());
        for (event, handler) in &self.handlers {
            match event.attach(handler.clone()) {
                Ok(token) => attachments.push((event.clone(), token)),
                Err(e) => {
                    for (event, token) in attachments {
                        event.detach(token);
                    }
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        for (slot, target) in &self.slots {
            slot.bind(target.clone());
        }

        log::debug!(
            "Bound '{}': {} functions, {} event handlers",
            self.label,
            self.slots.len(),
            attachments.len()
        );
        Ok(Binding {
            label: self.label,
            connected: self.connected,
            slots: self.slots.into_iter().map(|(slot, _)| slot).collect(),
            attachments,
            released: AtomicBool::new(false),
        })
    }
}

/// Live binding of a required interface; released on drop
pub struct Binding {
    label: String,
    connected: Arc<AtomicBool>,
    slots: Vec<Arc<FunctionSlot>>,
    attachments: Vec<(Arc<EventGenerator>, u64)>,
    released: AtomicBool,
}

impl Binding {
    /// Unbind every slot and detach every handler
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.slots {
            slot.unbind();
        }
        for (event, token) in &self.attachments {
            event.detach(*token);
        }
        self.connected.store(false, Ordering::SeqCst);
        log::debug!("Released binding of '{}'", self.label);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.release();
    }
}

/// Validate a local connection from `required` to `provided`
///
/// Every non-optional slot must find a command of the same name, kind and
/// argument types, and every event handler a matching generator; the first
/// mismatch aborts the whole plan.
pub fn plan_binding(
    required: &RequiredInterface,
    provided: &ProvidedInterface,
) -> MtsResult<BindingPlan> {
    let mut plan = BindingPlan::new(required)?;
    let target = format!("{}.{}", provided.owner(), provided.name());

    for slot in required.slots() {
        match provided.command(slot.name()) {
            Some(command) => {
                slot.check_compatible(command.as_ref())?;
                plan.bind_slot(slot, command);
            }
            None if slot.is_optional() => {
                log::debug!("Optional function '{}' not provided by '{}'", slot.name(), target);
            }
            None => {
                return Err(MtsError::not_found(format!(
                    "command '{}' required by '{}' is not provided by '{}'",
                    slot.name(),
                    plan.label,
                    target
                )))
            }
        }
    }

    for handler in required.handlers() {
        let Some(event) = provided.event(handler.name()) else {
            return Err(MtsError::not_found(format!(
                "event '{}' handled by '{}' is not provided by '{}'",
                handler.name(),
                plan.label,
                target
            )));
        };
        event.accepts(handler.as_ref())?;
        plan.attach_handler(event, handler);
    }

    Ok(plan)
}
