use crate::component::{Component, Execution};
use crate::error::{MtsError, MtsResult};
use crate::interface::{ProvidedInterface, RequiredInterface};
use crate::manager::EventBus;
use crate::task::runner::{StateCell, TaskRunner};
use crate::task::{Mailbox, TaskMetrics, TaskState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A registered component with its interfaces frozen
pub(crate) struct ComponentEntry {
    pub name: String,
    pub provided: BTreeMap<String, Arc<ProvidedInterface>>,
    pub required: BTreeMap<String, Arc<RequiredInterface>>,
    pub state: Arc<StateCell>,
    pub mailbox: Option<Arc<Mailbox>>,
    runner: Option<TaskRunner>,
}

impl ComponentEntry {
    pub fn new(process: &str, component: Component, events: EventBus) -> Self {
        let (name, execution, provided, required) = component.into_parts();
        let state = Arc::new(StateCell::new(process, &name, events));
        let (runner, mailbox) = match execution {
            Execution::Passive => (None, None),
            Execution::Periodic {
                period,
                task,
                options,
                mailbox,
            } => (
                Some(TaskRunner::new(
                    task,
                    period,
                    options.drain_policy,
                    mailbox.clone(),
                    state.clone(),
                )),
                Some(mailbox),
            ),
        };
        Self {
            name,
            provided: provided
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            required: required
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            state,
            mailbox,
            runner,
        }
    }

    pub fn is_task(&self) -> bool {
        self.runner.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.runner.as_ref().map(|r| r.period())
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn metrics(&self) -> Option<TaskMetrics> {
        self.runner.as_ref().map(|r| r.metrics())
    }

    pub fn create(&self) -> MtsResult<()> {
        match &self.runner {
            Some(runner) => runner.create(),
            None => self.passive_step(TaskState::Constructed, TaskState::Initializing),
        }
    }

    pub fn start(&self) -> MtsResult<()> {
        match &self.runner {
            Some(runner) => runner.start(),
            None => self.passive_step(TaskState::Initializing, TaskState::Active),
        }
    }

    pub fn kill(&self) {
        match &self.runner {
            Some(runner) => runner.kill(),
            None => {
                self.state.transition(TaskState::Finished);
            }
        }
    }

    pub fn join(&self, timeout: Duration) -> bool {
        self.runner.as_ref().map_or(true, |r| r.join(timeout))
    }

    fn passive_step(&self, from: TaskState, to: TaskState) -> MtsResult<()> {
        let current = self.state.get();
        if current != from {
            return Err(MtsError::InvalidState(format!(
                "component '{}' cannot move from {} to {}",
                self.name, current, to
            )));
        }
        self.state.transition(to);
        Ok(())
    }
}

/// Components of one process, keyed by name
#[derive(Default)]
pub(crate) struct ComponentRegistry {
    components: RwLock<BTreeMap<String, Arc<ComponentEntry>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ComponentEntry) -> MtsResult<Arc<ComponentEntry>> {
        let mut components = self.components.write();
        if components.contains_key(&entry.name) {
            return Err(MtsError::DuplicateName(format!("component '{}'", entry.name)));
        }
        let entry = Arc::new(entry);
        components.insert(entry.name.clone(), entry.clone());
        Ok(entry)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ComponentEntry>> {
        self.components.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ComponentEntry>> {
        self.components.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.components.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<ComponentEntry>> {
        self.components.read().values().cloned().collect()
    }

    pub fn provided_interface(
        &self,
        component: &str,
        interface: &str,
    ) -> MtsResult<Arc<ProvidedInterface>> {
        let entry = self
            .get(component)
            .ok_or_else(|| MtsError::not_found(format!("component '{}'", component)))?;
        entry.provided.get(interface).cloned().ok_or_else(|| {
            MtsError::not_found(format!(
                "provided interface '{}' on component '{}'",
                interface, component
            ))
        })
    }

    pub fn required_interface(
        &self,
        component: &str,
        interface: &str,
    ) -> MtsResult<Arc<RequiredInterface>> {
        let entry = self
            .get(component)
            .ok_or_else(|| MtsError::not_found(format!("component '{}'", component)))?;
        entry.required.get(interface).cloned().ok_or_else(|| {
            MtsError::not_found(format!(
                "required interface '{}' on component '{}'",
                interface, component
            ))
        })
    }
}
