use super::protocol::{read_frame, write_frame, ProxyRequest, ProxyResponse};
use super::server::ProxyServer;
use super::transport::{Connector, Transport};
use super::parse_endpoint;
use crate::error::{MtsError, MtsResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Blocking request/response channel over one TCP stream
///
/// Requests are serialized on the stream. The first I/O error breaks the
/// transport for good; the owning session reports it and a reconnect opens
/// a fresh one.
pub struct TcpTransport {
    peer: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> MtsResult<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| MtsError::transport(format!("connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        log::debug!("Proxy transport connected to {}", addr);
        Ok(Self {
            peer: addr,
            stream: Mutex::new(Some(stream)),
        })
    }

    fn with_stream<T>(&self, f: impl FnOnce(&mut TcpStream) -> MtsResult<T>) -> MtsResult<T> {
        let mut guard = self.stream.lock();
        let stream = guard
            .as_mut()
            .ok_or_else(|| MtsError::transport(format!("transport to {} is closed", self.peer)))?;
        match f(stream) {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Some(stream) = guard.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                Err(match e {
                    MtsError::Io(io) => MtsError::transport(format!("{}: {}", self.peer, io)),
                    other => other,
                })
            }
        }
    }
}

impl Transport for TcpTransport {
    fn round_trip(&self, request: &ProxyRequest) -> MtsResult<ProxyResponse> {
        self.with_stream(|stream| {
            write_frame(stream, request)?;
            read_frame(stream)
        })
    }

    fn send_oneway(&self, request: &ProxyRequest) -> MtsResult<()> {
        self.with_stream(|stream| write_frame(stream, request))
    }

    fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn peer(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

/// Opens [`TcpTransport`]s with a fixed timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for TcpConnector {
    fn open(&self, endpoint: &str) -> MtsResult<Arc<dyn Transport>> {
        let addr = parse_endpoint(endpoint)?
            .socket_addr()
            .ok_or_else(|| MtsError::config(format!("'{}' is not a TCP endpoint", endpoint)))?;
        Ok(Arc::new(TcpTransport::connect(addr, self.timeout)?))
    }
}

/// Serves a [`ProxyServer`] on a TCP socket
///
/// One thread accepts, one thread per client connection reads frames,
/// dispatches them and writes the response.
pub struct TcpProxyListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    streams: Arc<Mutex<HashMap<SocketAddr, TcpStream>>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TcpProxyListener {
    pub fn bind<A: ToSocketAddrs>(addr: A, server: Arc<ProxyServer>) -> MtsResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let streams = Arc::new(Mutex::new(HashMap::new()));

        let accept_running = running.clone();
        let accept_streams = streams.clone();
        let process = server.process().to_string();
        let accept_thread = thread::Builder::new()
            .name(format!("mts-proxy-{}", process))
            .spawn(move || accept_loop(listener, server, accept_running, accept_streams))?;

        log::info!("[{}] proxy server listening on {}", process, local_addr);
        Ok(Self {
            local_addr,
            running,
            streams,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint string to publish in the global registry
    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.local_addr)
    }

    /// Stop accepting and drop every client connection
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for (_, stream) in self.streams.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }
        log::debug!("Proxy listener on {} stopped", self.local_addr);
    }
}

impl Drop for TcpProxyListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    server: Arc<ProxyServer>,
    running: Arc<AtomicBool>,
    streams: Arc<Mutex<HashMap<SocketAddr, TcpStream>>>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = serve_connection(stream, addr, &server, &streams) {
                    log::warn!("Failed to serve proxy client {}: {}", addr, e);
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                log::error!("Proxy accept error: {}", e);
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server: &Arc<ProxyServer>,
    streams: &Arc<Mutex<HashMap<SocketAddr, TcpStream>>>,
) -> MtsResult<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    streams.lock().insert(addr, stream.try_clone()?);

    let server = server.clone();
    let thread_streams = streams.clone();
    let spawned = thread::Builder::new()
        .name(format!("mts-proxy-client-{}", addr))
        .spawn(move || {
            log::debug!("Proxy client {} connected", addr);
            let mut stream = stream;
            let mut owned = Vec::new();
            loop {
                let request: ProxyRequest = match read_frame(&mut stream) {
                    Ok(request) => request,
                    Err(MtsError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        log::debug!("Proxy client {} dropped: {}", addr, e);
                        break;
                    }
                };
                if let Some(response) = server.handle_tracked(request, &mut owned) {
                    if let Err(e) = write_frame(&mut stream, &response) {
                        log::debug!("Proxy client {} unreachable: {}", addr, e);
                        break;
                    }
                }
            }
            server.release_clients(&mut owned);
            thread_streams.lock().remove(&addr);
            log::debug!("Proxy client {} disconnected", addr);
        });
    if let Err(e) = spawned {
        streams.lock().remove(&addr);
        return Err(e.into());
    }
    Ok(())
}
