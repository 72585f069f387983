//! Global manager protocol and its blocking TCP client
//!
//! `mts_gcm` hosts a [`GlobalManager`](super::GlobalManager) and answers
//! [`GlobalRequest`] frames with [`dispatch`]. A process registers through
//! one long-lived stream; when that stream drops, the daemon deregisters
//! every process registered over it.

use super::global::{ComponentRecord, GlobalRegistry, InterfaceLocation, RegistryEvent};
use crate::error::{MtsError, MtsResult};
use crate::proxy::parse_endpoint;
use crate::proxy::protocol::{read_frame, write_frame, WireError, WireErrorKind};
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

/// Default port of the `mts_gcm` daemon
pub const DEFAULT_GCM_PORT: u16 = 7400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalRequest {
    AddProcess {
        process: String,
        endpoint: String,
    },
    RemoveProcess {
        process: String,
    },
    AddComponent {
        process: String,
        component: String,
        interfaces: Vec<String>,
    },
    RemoveComponent {
        process: String,
        component: String,
    },
    FindProvidedInterface {
        process: String,
        component: String,
        interface: String,
    },
    Processes,
    Components {
        process: String,
    },
    /// Turn this stream into a one-way feed of registry events
    Watch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalResponse {
    Ack,
    Location(InterfaceLocation),
    Processes(Vec<String>),
    Components(Vec<ComponentRecord>),
    /// Confirms a `Watch`; events follow on the same stream
    Watching,
    Event(RegistryEvent),
    Error(WireError),
}

impl GlobalResponse {
    fn error(err: MtsError) -> Self {
        GlobalResponse::Error(WireError::from(&err))
    }
}

/// Answer one request against `registry`
///
/// `Watch` needs a stream of its own and is refused here; the daemon
/// handles it before dispatching.
pub fn dispatch(registry: &dyn GlobalRegistry, request: GlobalRequest) -> GlobalResponse {
    let acked = |result: MtsResult<()>| match result {
        Ok(()) => GlobalResponse::Ack,
        Err(e) => GlobalResponse::error(e),
    };
    match request {
        GlobalRequest::AddProcess { process, endpoint } => {
            acked(registry.add_process(&process, &endpoint))
        }
        GlobalRequest::RemoveProcess { process } => acked(registry.remove_process(&process)),
        GlobalRequest::AddComponent {
            process,
            component,
            interfaces,
        } => acked(registry.add_component(&process, &component, &interfaces)),
        GlobalRequest::RemoveComponent { process, component } => {
            acked(registry.remove_component(&process, &component))
        }
        GlobalRequest::FindProvidedInterface {
            process,
            component,
            interface,
        } => match registry.find_provided_interface(&process, &component, &interface) {
            Ok(location) => GlobalResponse::Location(location),
            Err(e) => GlobalResponse::error(e),
        },
        GlobalRequest::Processes => match registry.processes() {
            Ok(list) => GlobalResponse::Processes(list),
            Err(e) => GlobalResponse::error(e),
        },
        GlobalRequest::Components { process } => match registry.components(&process) {
            Ok(list) => GlobalResponse::Components(list),
            Err(e) => GlobalResponse::error(e),
        },
        GlobalRequest::Watch => GlobalResponse::Error(WireError {
            kind: WireErrorKind::Unsupported,
            message: "watch requires a dedicated stream".to_string(),
        }),
    }
}

/// [`GlobalRegistry`] backed by a remote `mts_gcm` daemon
pub struct RemoteGlobalManager {
    addr: SocketAddr,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl RemoteGlobalManager {
    /// Connect to the daemon at `address` ("host:port" or "tcp://host:port")
    pub fn connect(address: &str, timeout: Duration) -> MtsResult<Self> {
        let addr = parse_endpoint(address)?.socket_addr().ok_or_else(|| {
            MtsError::config(format!("global manager address '{}' is not TCP", address))
        })?;
        let stream = Self::open_stream(addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        log::info!("Connected to global manager at {}", addr);
        Ok(Self {
            addr,
            timeout,
            stream: Mutex::new(Some(stream)),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    fn open_stream(addr: SocketAddr, timeout: Duration) -> MtsResult<TcpStream> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            MtsError::transport(format!("global manager at {} unreachable: {}", addr, e))
        })?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(stream)
    }

    fn call(&self, request: GlobalRequest) -> MtsResult<GlobalResponse> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or_else(|| {
            MtsError::transport(format!("session with global manager {} is closed", self.addr))
        })?;
        let exchange: MtsResult<GlobalResponse> =
            write_frame(stream, &request).and_then(|_| read_frame(stream));
        match exchange {
            Ok(GlobalResponse::Error(err)) => Err(err.into()),
            Ok(response) => Ok(response),
            Err(e) => {
                log::warn!("Lost session with global manager {}: {}", self.addr, e);
                if let Some(stream) = guard.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                Err(MtsError::transport(format!("global manager {}: {}", self.addr, e)))
            }
        }
    }

    fn ack(&self, request: GlobalRequest) -> MtsResult<()> {
        match self.call(request)? {
            GlobalResponse::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

impl Drop for RemoteGlobalManager {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn unexpected(response: GlobalResponse) -> MtsError {
    MtsError::transport(format!("unexpected global manager response: {:?}", response))
}

impl GlobalRegistry for RemoteGlobalManager {
    fn add_process(&self, process: &str, endpoint: &str) -> MtsResult<()> {
        self.ack(GlobalRequest::AddProcess {
            process: process.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    fn remove_process(&self, process: &str) -> MtsResult<()> {
        self.ack(GlobalRequest::RemoveProcess {
            process: process.to_string(),
        })
    }

    fn add_component(&self, process: &str, component: &str, interfaces: &[String]) -> MtsResult<()> {
        self.ack(GlobalRequest::AddComponent {
            process: process.to_string(),
            component: component.to_string(),
            interfaces: interfaces.to_vec(),
        })
    }

    fn remove_component(&self, process: &str, component: &str) -> MtsResult<()> {
        self.ack(GlobalRequest::RemoveComponent {
            process: process.to_string(),
            component: component.to_string(),
        })
    }

    fn find_provided_interface(
        &self,
        process: &str,
        component: &str,
        interface: &str,
    ) -> MtsResult<InterfaceLocation> {
        match self.call(GlobalRequest::FindProvidedInterface {
            process: process.to_string(),
            component: component.to_string(),
            interface: interface.to_string(),
        })? {
            GlobalResponse::Location(location) => Ok(location),
            other => Err(unexpected(other)),
        }
    }

    fn processes(&self) -> MtsResult<Vec<String>> {
        match self.call(GlobalRequest::Processes)? {
            GlobalResponse::Processes(list) => Ok(list),
            other => Err(unexpected(other)),
        }
    }

    fn components(&self, process: &str) -> MtsResult<Vec<ComponentRecord>> {
        match self.call(GlobalRequest::Components {
            process: process.to_string(),
        })? {
            GlobalResponse::Components(list) => Ok(list),
            other => Err(unexpected(other)),
        }
    }

    fn watch(&self) -> MtsResult<Receiver<RegistryEvent>> {
        let mut stream = Self::open_stream(self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        write_frame(&mut stream, &GlobalRequest::Watch)?;
        match read_frame(&mut stream)? {
            GlobalResponse::Watching => {}
            GlobalResponse::Error(err) => return Err(err.into()),
            other => return Err(unexpected(other)),
        }
        // Events arrive whenever the registry changes
        stream.set_read_timeout(None)?;

        let (tx, rx) = channel::unbounded();
        let addr = self.addr;
        thread::Builder::new()
            .name("mts-gcm-watch".to_string())
            .spawn(move || loop {
                match read_frame::<_, GlobalResponse>(&mut stream) {
                    Ok(GlobalResponse::Event(event)) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(other) => log::debug!("Ignoring watch frame {:?}", other),
                    Err(e) => {
                        log::debug!("Watch stream from {} ended: {}", addr, e);
                        break;
                    }
                }
            })?;
        Ok(rx)
    }
}
