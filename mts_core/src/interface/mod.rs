//! Provided and required interfaces
//!
//! A provided interface is a named set of commands and event generators
//! owned by one component. A required interface declares the function slots
//! and event handlers a component needs; connecting binds every slot to the
//! command of the same name in a provided interface.

mod binding;
mod provided;
mod required;

pub use binding::{plan_binding, Binding, BindingPlan};
pub use provided::ProvidedInterface;
pub use required::{
    FunctionQualifiedRead, FunctionRead, FunctionSlot, FunctionVoid, FunctionVoidReturn,
    FunctionWrite, RequiredInterface,
};

use crate::command::{Command, CommandKind, EventGenerator};
use serde::{Deserialize, Serialize};

/// Catalogue entry for one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescription {
    pub name: String,
    pub kind: CommandKind,
    /// Type tag of the input argument
    pub argument_type: Option<String>,
    /// Type tag of the output argument
    pub result_type: Option<String>,
}

impl CommandDescription {
    pub fn of(command: &dyn Command) -> Self {
        Self {
            name: command.name().to_string(),
            kind: command.kind(),
            argument_type: command.argument_prototype().map(|p| p.type_name().to_string()),
            result_type: command.result_prototype().map(|p| p.type_name().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescription {
    pub name: String,
    pub kind: CommandKind,
    pub argument_type: Option<String>,
}

impl EventDescription {
    pub fn of(event: &EventGenerator) -> Self {
        Self {
            name: event.name().to_string(),
            kind: event.kind(),
            argument_type: event.prototype().map(|p| p.type_name().to_string()),
        }
    }
}

/// Everything a provided interface exposes, as sent during the proxy handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub component: String,
    pub name: String,
    pub commands: Vec<CommandDescription>,
    pub events: Vec<EventDescription>,
}

impl InterfaceDescription {
    pub fn command(&self, name: &str) -> Option<&CommandDescription> {
        self.commands.iter().find(|c| c.name == name)
    }
}
