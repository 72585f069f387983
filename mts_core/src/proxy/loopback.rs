use super::protocol::{decode_frame, encode_frame, ProxyRequest, ProxyResponse};
use super::server::ProxyServer;
use super::transport::{Connector, Transport};
use super::{parse_endpoint, Endpoint};
use crate::error::{MtsError, MtsResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// In-process transport to a simulated remote process
///
/// Every request and response is encoded to a frame and decoded again, so
/// the same bytes cross this link as would cross a socket.
pub struct LoopbackTransport {
    endpoint: String,
    server: Weak<ProxyServer>,
    up: Arc<AtomicBool>,
    closed: AtomicBool,
    /// Client identities registered over this link
    owned: Mutex<Vec<String>>,
}

impl LoopbackTransport {
    fn new(endpoint: String, server: &Arc<ProxyServer>, up: Arc<AtomicBool>) -> Self {
        Self {
            endpoint,
            server: Arc::downgrade(server),
            up,
            closed: AtomicBool::new(false),
            owned: Mutex::new(Vec::new()),
        }
    }

    fn server(&self) -> MtsResult<Arc<ProxyServer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MtsError::transport(format!("link to {} is closed", self.endpoint)));
        }
        if !self.up.load(Ordering::SeqCst) {
            return Err(MtsError::transport(format!("link to {} is down", self.endpoint)));
        }
        self.server
            .upgrade()
            .ok_or_else(|| MtsError::transport(format!("{} has shut down", self.endpoint)))
    }

    fn deliver(&self, request: &ProxyRequest) -> MtsResult<Option<ProxyResponse>> {
        let server = self.server()?;
        let frame = encode_frame(request)?;
        let request: ProxyRequest = decode_frame(&frame[4..])?;
        let Some(response) = server.handle_tracked(request, &mut self.owned.lock()) else {
            return Ok(None);
        };
        // Link may have dropped while the servant ran
        if !self.up.load(Ordering::SeqCst) {
            return Err(MtsError::transport(format!("link to {} is down", self.endpoint)));
        }
        let frame = encode_frame(&response)?;
        Ok(Some(decode_frame(&frame[4..])?))
    }
}

impl Transport for LoopbackTransport {
    fn round_trip(&self, request: &ProxyRequest) -> MtsResult<ProxyResponse> {
        self.deliver(request)?
            .ok_or_else(|| MtsError::transport("no response to a one-way request"))
    }

    fn send_oneway(&self, request: &ProxyRequest) -> MtsResult<()> {
        self.deliver(request).map(|_| ())
    }

    /// The servant forgets this link's clients, as it would on a socket close
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(server) = self.server.upgrade() {
            server.release_clients(&mut self.owned.lock());
        }
    }

    fn peer(&self) -> String {
        self.endpoint.clone()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct LoopbackRoute {
    server: Arc<ProxyServer>,
    up: Arc<AtomicBool>,
}

/// Address book of simulated processes sharing one OS process
///
/// Used for deterministic multi-process tests: every local manager
/// registers its proxy server under `loopback://<process>`, and
/// [`disconnect`](LoopbackNetwork::disconnect) cuts every link to one of
/// them the way a crashed peer would.
#[derive(Default)]
pub struct LoopbackNetwork {
    routes: Mutex<HashMap<String, LoopbackRoute>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `server` reachable at `endpoint`
    pub fn register(&self, endpoint: &str, server: Arc<ProxyServer>) -> MtsResult<()> {
        let key = Self::key(endpoint)?;
        let mut routes = self.routes.lock();
        if let Some(route) = routes.get(&key) {
            if route.up.load(Ordering::SeqCst) {
                return Err(MtsError::DuplicateName(format!("loopback endpoint '{}'", endpoint)));
            }
        }
        routes.insert(
            key,
            LoopbackRoute {
                server,
                up: Arc::new(AtomicBool::new(true)),
            },
        );
        Ok(())
    }

    /// Remove `endpoint` and fail every transport already opened to it
    pub fn disconnect(&self, endpoint: &str) -> bool {
        let Ok(key) = Self::key(endpoint) else {
            return false;
        };
        match self.routes.lock().remove(&key) {
            Some(route) => {
                route.up.store(false, Ordering::SeqCst);
                log::info!("Loopback link to {} cut", endpoint);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, endpoint: &str) -> bool {
        Self::key(endpoint)
            .map(|key| self.routes.lock().contains_key(&key))
            .unwrap_or(false)
    }

    fn key(endpoint: &str) -> MtsResult<String> {
        match parse_endpoint(endpoint)? {
            Endpoint::Loopback { name } => Ok(name),
            other => Err(MtsError::config(format!("'{}' is not a loopback endpoint", other))),
        }
    }
}

impl Connector for LoopbackNetwork {
    fn open(&self, endpoint: &str) -> MtsResult<Arc<dyn Transport>> {
        let key = Self::key(endpoint)?;
        let routes = self.routes.lock();
        let route = routes
            .get(&key)
            .ok_or_else(|| MtsError::transport(format!("nothing listens at {}", endpoint)))?;
        Ok(Arc::new(LoopbackTransport::new(
            endpoint.to_string(),
            &route.server,
            route.up.clone(),
        )))
    }
}
