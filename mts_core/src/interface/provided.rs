use super::{CommandDescription, EventDescription, InterfaceDescription};
use crate::command::{
    Argument, Command, CommandQualifiedRead, CommandRead, CommandVoid, CommandVoidReturn,
    CommandWrite, EventGenerator, EventVoid, EventWrite, IntoExecutionResult, QueuedCommand,
};
use crate::error::{MtsError, MtsResult};
use crate::task::Mailbox;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Named set of commands and events exposed by a component
///
/// On a task, Void, Write and VoidReturn commands are registered behind a
/// [`QueuedCommand`] so that they always execute on the task's thread.
pub struct ProvidedInterface {
    name: String,
    owner: String,
    mailbox: Option<Arc<Mailbox>>,
    return_timeout: Duration,
    commands: BTreeMap<String, Arc<dyn Command>>,
    events: BTreeMap<String, Arc<EventGenerator>>,
}

impl ProvidedInterface {
    /// Interface whose commands run directly in the caller's thread
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            mailbox: None,
            return_timeout: Duration::ZERO,
            commands: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

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

    /// Name of the owning component
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Register a command; names are unique within the interface
    pub fn add_command(&mut self, command: Arc<dyn Command>) -> MtsResult<&mut Self> {
        let name = command.name().to_string();
        if self.commands.contains_key(&name) {
            return Err(MtsError::DuplicateName(format!(
                "command '{}' in interface '{}.{}'",
                name, self.owner, self.name
            )));
        }
        let command: Arc<dyn Command> = match &self.mailbox {
            Some(mailbox) if command.kind().is_queueable() => Arc::new(QueuedCommand::new(
                command,
                mailbox.clone(),
                self.return_timeout,
            )),
            _ => command,
        };
        log::debug!("{}.{}: added {}", self.owner, self.name, command.describe());
        self.commands.insert(name, command);
        Ok(self)
    }

    pub fn add_command_void<F, R>(&mut self, name: &str, action: F) -> MtsResult<&mut Self>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoExecutionResult,
    {
        let command = CommandVoid::new(name, self.owner.as_str(), action);
        self.add_command(Arc::new(command))
    }

    pub fn add_command_write<T, F, R>(&mut self, name: &str, action: F) -> MtsResult<&mut Self>
    where
        T: Argument,
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoExecutionResult,
    {
        let command = CommandWrite::new(name, self.owner.as_str(), action);
        self.add_command(Arc::new(command))
    }

    pub fn add_command_read<T, F>(&mut self, name: &str, action: F) -> MtsResult<&mut Self>
    where
        T: Argument,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let command = CommandRead::new(name, self.owner.as_str(), action);
        self.add_command(Arc::new(command))
    }

    pub fn add_command_qualified_read<A, R, F>(
        &mut self,
        name: &str,
        action: F,
    ) -> MtsResult<&mut Self>
    where
        A: Argument,
        R: Argument,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let command = CommandQualifiedRead::new(name, self.owner.as_str(), action);
        self.add_command(Arc::new(command))
    }

    pub fn add_command_void_return<R, F>(&mut self, name: &str, action: F) -> MtsResult<&mut Self>
    where
        R: Argument,
        F: Fn() -> R + Send + Sync + 'static,
    {
        let command = CommandVoidReturn::new(name, self.owner.as_str(), action);
        self.add_command(Arc::new(command))
    }

    fn add_event(&mut self, generator: EventGenerator) -> MtsResult<Arc<EventGenerator>> {
        let name = generator.name().to_string();
        if self.events.contains_key(&name) {
            return Err(MtsError::DuplicateName(format!(
                "event '{}' in interface '{}.{}'",
                name, self.owner, self.name
            )));
        }
        let generator = Arc::new(generator);
        self.events.insert(name, generator.clone());
        Ok(generator)
    }

    /// Declare a void event and return the handle used to emit it
    pub fn add_event_void(&mut self, name: &str) -> MtsResult<EventVoid> {
        self.add_event(EventGenerator::void(name)).map(EventVoid::new)
    }

    pub fn add_event_write<T: Argument>(&mut self, name: &str) -> MtsResult<EventWrite<T>> {
        self.add_event(EventGenerator::write::<T>(name))
            .map(EventWrite::new)
    }

    pub fn command(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn event(&self, name: &str) -> Option<Arc<EventGenerator>> {
        self.events.get(name).cloned()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }

    pub fn describe(&self) -> InterfaceDescription {
        InterfaceDescription {
            component: self.owner.clone(),
            name: self.name.clone(),
            commands: self
                .commands
                .values()
                .map(|c| CommandDescription::of(c.as_ref()))
                .collect(),
            events: self
                .events
                .values()
                .map(|e| EventDescription::of(e))
                .collect(),
        }
    }
}

impl std::fmt::Debug for ProvidedInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidedInterface")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, ExecutionResult, Invocation};

    #[test]
    fn test_duplicate_command_rejected() {
        let mut iface = ProvidedInterface::new("Robot", "arm");
        iface.add_command_void("Home", || {}).unwrap();
        let err = iface.add_command_void("Home", || {}).err().unwrap();
        assert!(matches!(err, MtsError::DuplicateName(_)));
        assert_eq!(iface.command_names(), vec!["Home".to_string()]);
    }

    #[test]
    fn test_describe_catalogue() {
        let mut iface = ProvidedInterface::new("Robot", "arm");
        iface
            .add_command_read("GetPosition", || vec![0.0f64; 6])
            .unwrap()
            .add_command_write("SetSpeed", |_: &f64| {})
            .unwrap();
        iface.add_event_void("MotionDone").unwrap();

        let desc = iface.describe();
        assert_eq!(desc.component, "arm");
        assert_eq!(desc.commands.len(), 2);
        let get = desc.command("GetPosition").unwrap();
        assert_eq!(get.kind, CommandKind::Read);
        assert_eq!(get.result_type.as_deref(), Some(std::any::type_name::<Vec<f64>>()));
        assert!(get.argument_type.is_none());
        assert_eq!(desc.events[0].name, "MotionDone");
    }

    #[test]
    fn test_task_interface_queues_writes() {
        let mailbox = Arc::new(Mailbox::new("arm", 4));
        let mut iface =
            ProvidedInterface::queued("Robot", "arm", mailbox.clone(), Duration::from_millis(10));
        iface
            .add_command_write("SetSpeed", |_: &f64| {})
            .unwrap()
            .add_command_read("GetSpeed", || 1.0f64)
            .unwrap();

        let set = iface.command("SetSpeed").unwrap();
        assert_eq!(set.execute(Invocation::Write(&1.0f64)), ExecutionResult::Queued);
        assert_eq!(mailbox.len(), 1);

        let get = iface.command("GetSpeed").unwrap();
        let mut speed = 0.0f64;
        assert_eq!(get.execute(Invocation::Read(&mut speed)), ExecutionResult::Ok);
        assert_eq!(mailbox.len(), 1);
    }
}
