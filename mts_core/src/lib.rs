//! # MTS Core
//!
//! Component middleware for multi-threaded, multi-process robot software.
//!
//! - **Commands**: named, typed operations invoked through type-erased
//!   arguments, reporting an [`ExecutionResult`] instead of failing
//! - **Interfaces**: provided interfaces expose commands and events,
//!   required interfaces declare the function slots a component needs
//! - **Tasks**: periodic components that drain a bounded mailbox of queued
//!   invocations before running their own logic each period
//! - **Managers**: a [`LocalManager`] per process and one shared
//!   [`GlobalRegistry`] broker connections inside and across processes
//! - **Proxies**: cross-process invocation over loopback or TCP
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mts_core::{Component, ExecutionResult, GlobalManager, GlobalRegistry, LocalManager};
//! use mts_core::{LoopbackNetwork, ManagerConfig};
//! use std::sync::Arc;
//!
//! let global: Arc<dyn GlobalRegistry> = Arc::new(GlobalManager::new());
//! let network = LoopbackNetwork::new();
//! let manager =
//!     LocalManager::with_loopback(ManagerConfig::new("robot"), global, &network).unwrap();
//!
//! let mut sensor = Component::passive("sensor");
//! sensor
//!     .add_provided_interface("Range")
//!     .unwrap()
//!     .add_command_read("Distance", || 1.25f64)
//!     .unwrap();
//!
//! let mut planner = Component::passive("planner");
//! let distance = planner
//!     .add_required_interface("Range")
//!     .unwrap()
//!     .add_function_read::<f64>("Distance")
//!     .unwrap();
//!
//! manager.add_component(sensor).unwrap();
//! manager.add_component(planner).unwrap();
//! manager.connect_local("planner", "Range", "sensor", "Range").unwrap();
//! assert_eq!(distance.call(), (ExecutionResult::Ok, 1.25));
//! ```

pub mod command;
pub mod component;
pub mod config;
pub mod error;
pub mod interface;
pub mod manager;
pub mod proxy;
pub mod task;

// Re-export commonly used types for easy access
pub use command::{Argument, Command, CommandKind, ExecutionResult, Invocation, Prototype};
pub use component::Component;
pub use config::ManagerConfig;
pub use error::{MtsError, MtsResult};
pub use interface::{
    FunctionQualifiedRead, FunctionRead, FunctionVoid, FunctionVoidReturn, FunctionWrite,
    ProvidedInterface, RequiredInterface,
};
pub use manager::{
    ConnectionId, ConnectionState, GlobalManager, GlobalRegistry, LocalManager, ManagerEvent,
    RemoteGlobalManager,
};
pub use proxy::{LoopbackNetwork, TcpConnector};
pub use task::{DrainPolicy, Mailbox, Task, TaskContext, TaskMetrics, TaskOptions, TaskState};
