//! Cross-process invocation
//!
//! A [`ProxySession`] on the client side stands in for a remote provided
//! interface: each bound slot gets a [`ProxyCommand`] that encodes its
//! argument, sends it under a negotiated command id through a
//! [`Transport`] and decodes the reply. The [`ProxyServer`] on the other
//! side dispatches those ids to the real commands.

pub mod codec;
mod client;
mod endpoint;
mod loopback;
pub mod protocol;
mod server;
mod tcp;
mod transport;

pub(crate) use client::SlotTargets;
pub use client::{ProxyCommand, ProxySession, SessionFailure};
pub use endpoint::{parse_endpoint, Endpoint};
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use server::ProxyServer;
pub use tcp::{TcpConnector, TcpProxyListener, TcpTransport};
pub use transport::{Connector, Transport};
