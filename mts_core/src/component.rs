//! Components: named units owning interfaces and, for tasks, a thread
use crate::error::{MtsError, MtsResult};
use crate::interface::{ProvidedInterface, RequiredInterface};
use crate::task::{Mailbox, Task, TaskOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) enum Execution {
    /// Commands run in the caller's thread
    Passive,
    Periodic {
        period: Duration,
        task: Box<dyn Task>,
        options: TaskOptions,
        mailbox: Arc<Mailbox>,
    },
}

/// A component before it is handed to a [`LocalManager`](crate::manager::LocalManager)
///
/// Interfaces are declared here; once the component is added to a manager
/// its interface set is fixed.
pub struct Component {
    name: String,
    execution: Execution,
    provided: BTreeMap<String, ProvidedInterface>,
    required: BTreeMap<String, RequiredInterface>,
}

impl Component {
    /// Component without a thread of its own
    pub fn passive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution: Execution::Passive,
            provided: BTreeMap::new(),
            required: BTreeMap::new(),
        }
    }

    /// Task running `task` every `period` on a dedicated thread
    pub fn periodic<T: Task + 'static>(name: impl Into<String>, period: Duration, task: T) -> Self {
        Self::periodic_with_options(name, period, task, TaskOptions::default())
    }

    pub fn periodic_with_options<T: Task + 'static>(
        name: impl Into<String>,
        period: Duration,
        task: T,
        options: TaskOptions,
    ) -> Self {
        let name = name.into();
        let mailbox = Arc::new(Mailbox::new(name.clone(), options.mailbox_capacity));
        Self {
            name,
            execution: Execution::Periodic {
                period,
                task: Box::new(task),
                options,
                mailbox,
            },
            provided: BTreeMap::new(),
            required: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_task(&self) -> bool {
        matches!(self.execution, Execution::Periodic { .. })
    }

    pub fn period(&self) -> Option<Duration> {
        match &self.execution {
            Execution::Periodic { period, .. } => Some(*period),
            Execution::Passive => None,
        }
    }

    pub fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        match &self.execution {
            Execution::Periodic { mailbox, .. } => Some(mailbox),
            Execution::Passive => None,
        }
    }

    /// Check the task options this component was built with
    pub(crate) fn validate(&self) -> MtsResult<()> {
        match &self.execution {
            Execution::Periodic { options, .. } => options.validate(),
            Execution::Passive => Ok(()),
        }
    }

    /// Hand a configuration source to the task's `configure` hook
    pub fn configure(&mut self, source: &str) -> MtsResult<()> {
        match &mut self.execution {
            Execution::Periodic { task, .. } => task.configure(source),
            Execution::Passive => Ok(()),
        }
    }

    pub fn add_provided_interface(&mut self, name: &str) -> MtsResult<&mut ProvidedInterface> {
        if self.provided.contains_key(name) {
            return Err(MtsError::DuplicateName(format!(
                "provided interface '{}' on component '{}'",
                name, self.name
            )));
        }
        let iface = match &self.execution {
            Execution::Periodic {
                mailbox, options, ..
            } => ProvidedInterface::queued(
                name,
                self.name.as_str(),
                mailbox.clone(),
                options.void_return_timeout,
            ),
            Execution::Passive => ProvidedInterface::new(name, self.name.as_str()),
        };
        Ok(self.provided.entry(name.to_string()).or_insert(iface))
    }

    pub fn add_required_interface(&mut self, name: &str) -> MtsResult<&mut RequiredInterface> {
        if self.required.contains_key(name) {
            return Err(MtsError::DuplicateName(format!(
                "required interface '{}' on component '{}'",
                name, self.name
            )));
        }
        let iface = match &self.execution {
            Execution::Periodic {
                mailbox, options, ..
            } => RequiredInterface::queued(
                name,
                self.name.as_str(),
                mailbox.clone(),
                options.void_return_timeout,
            ),
            Execution::Passive => RequiredInterface::new(name, self.name.as_str()),
        };
        Ok(self.required.entry(name.to_string()).or_insert(iface))
    }

    pub fn provided_interface_mut(&mut self, name: &str) -> Option<&mut ProvidedInterface> {
        self.provided.get_mut(name)
    }

    pub fn required_interface_mut(&mut self, name: &str) -> Option<&mut RequiredInterface> {
        self.required.get_mut(name)
    }

    pub fn provided_interface_names(&self) -> Vec<String> {
        self.provided.keys().cloned().collect()
    }

    pub fn required_interface_names(&self) -> Vec<String> {
        self.required.keys().cloned().collect()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        Execution,
        BTreeMap<String, ProvidedInterface>,
        BTreeMap<String, RequiredInterface>,
    ) {
        (self.name, self.execution, self.provided, self.required)
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("period", &self.period())
            .field("provided", &self.provided_interface_names())
            .field("required", &self.required_interface_names())
            .finish()
    }
}
