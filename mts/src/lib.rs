//! # MTS - component middleware
//!
//! Components expose typed commands and events through provided
//! interfaces and consume them through required interfaces. Periodic
//! components run on their own threads and execute queued commands at the
//! start of each period. Managers wire interfaces together, within one
//! process or across processes through proxies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mts::prelude::*;
//!
//! let global: Arc<dyn GlobalRegistry> = Arc::new(GlobalManager::new());
//! let network = LoopbackNetwork::new();
//! let manager = LocalManager::with_loopback(ManagerConfig::new("robot"), global, &network)?;
//!
//! fn idle(_: &mut TaskContext) -> MtsResult<()> {
//!     Ok(())
//! }
//!
//! let mut counter = Component::periodic("counter", Duration::from_millis(10), idle);
//! counter.add_provided_interface("Counter")?.add_command_write("Add", |v: &u64| {
//!     println!("add {}", v);
//! })?;
//!
//! let mut client = Component::passive("client");
//! let add = client.add_required_interface("Counter")?.add_function_write::<u64>("Add")?;
//!
//! manager.add_component(counter)?;
//! manager.add_component(client)?;
//! manager.connect_local("client", "Counter", "counter", "Counter")?;
//! manager.create_all()?;
//! manager.start_all()?;
//! assert_eq!(add.execute(&1), ExecutionResult::Queued);
//! # Ok::<(), MtsError>(())
//! ```

// Re-export core components
pub use mts_core::{self, *};

/// The MTS prelude - everything you need to get started
pub mod prelude {
    // Components and tasks
    pub use mts_core::component::Component;
    pub use mts_core::task::{DrainPolicy, Task, TaskContext, TaskOptions, TaskState};

    // Commands and interfaces
    pub use mts_core::command::{Argument, ExecutionResult};
    pub use mts_core::interface::{
        FunctionQualifiedRead, FunctionRead, FunctionVoid, FunctionVoidReturn, FunctionWrite,
    };

    // Managers
    pub use mts_core::config::ManagerConfig;
    pub use mts_core::manager::{
        ConnectionId, ConnectionState, GlobalManager, GlobalRegistry, LocalManager, ManagerEvent,
        RemoteGlobalManager,
    };
    pub use mts_core::proxy::LoopbackNetwork;

    // Error types
    pub use mts_core::error::{MtsError, MtsResult};
    pub type Result<T> = MtsResult<T>;

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::{Duration, Instant};

    // Common traits
    pub use serde::{Deserialize, Serialize};

    // Re-export anyhow for error handling
    pub use anyhow::{anyhow, bail, ensure, Context, Result as AnyResult};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get MTS version
pub fn version() -> &'static str {
    VERSION
}
