//! Local and global component managers
//!
//! Every process runs one [`LocalManager`]. All of them share one
//! [`GlobalRegistry`]: a [`GlobalManager`] in the same process, or a
//! [`RemoteGlobalManager`] talking to the `mts_gcm` daemon.

mod connection;
mod events;
mod global;
mod local;
pub(crate) mod registry;
pub mod remote;

pub use connection::{ConnectionEndpoints, ConnectionId, ConnectionInfo, ConnectionState};
pub use events::{EventBus, ManagerEvent};
pub use global::{ComponentRecord, GlobalManager, GlobalRegistry, InterfaceLocation, RegistryEvent};
pub use local::{ComponentInfo, LocalManager, ManagerSnapshot};
pub use remote::{dispatch, GlobalRequest, GlobalResponse, RemoteGlobalManager, DEFAULT_GCM_PORT};
