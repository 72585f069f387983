/// MTS Global Component Manager
///
/// Registry of processes, components and their provided interfaces shared
/// by every local manager of a deployment. Local managers connect over TCP,
/// register themselves and look up interfaces of other processes. A process
/// registered over a stream is deregistered when that stream drops.

use clap::Parser;
use mts_core::manager::{dispatch, GlobalRequest, GlobalResponse, DEFAULT_GCM_PORT};
use mts_core::proxy::protocol::{decode_frame, encode_frame, MAX_FRAME_SIZE};
use mts_core::{GlobalManager, GlobalRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often an idle event bridge checks whether its watcher left
const WATCH_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "mts_gcm")]
#[command(about = "MTS global component manager", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_GCM_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Read one length-prefixed frame body; `None` once the peer hangs up
async fn read_body<R>(reader: &mut R) -> anyhow::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        anyhow::bail!("frame too large: {} bytes", len);
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_response<W>(writer: &mut W, response: &GlobalResponse) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(response)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Processes registered over one client stream
#[derive(Default)]
struct Session {
    processes: Vec<String>,
}

impl Session {
    /// Keep track of what this stream registered
    fn record(&mut self, request: &GlobalRequest, response: &GlobalResponse) {
        if *response != GlobalResponse::Ack {
            return;
        }
        match request {
            GlobalRequest::AddProcess { process, .. } => self.processes.push(process.clone()),
            GlobalRequest::RemoveProcess { process } => self.processes.retain(|p| p != process),
            _ => {}
        }
    }
}

/// Handle a single client stream until it closes
async fn handle_client<S>(stream: S, addr: SocketAddr, registry: Arc<GlobalManager>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("Client connected: {}", addr);
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let mut session = Session::default();

    loop {
        let body = match read_body(&mut read_half).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read request from {}: {}", addr, e);
                break;
            }
        };
        let request: GlobalRequest = match decode_frame(&body) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to decode request from {}: {}", addr, e);
                break;
            }
        };

        if request == GlobalRequest::Watch {
            if write_response(&mut write_half, &GlobalResponse::Watching)
                .await
                .is_ok()
            {
                forward_events(&mut write_half, addr, &registry).await;
            }
            break;
        }

        debug!("{} -> {:?}", addr, request);
        let response = dispatch(registry.as_ref(), request.clone());
        session.record(&request, &response);
        if let Err(e) = write_response(&mut write_half, &response).await {
            warn!("Failed to answer {}: {}", addr, e);
            break;
        }
    }

    // Cleanup on disconnect
    for process in session.processes {
        match registry.remove_process(&process) {
            Ok(()) => info!("Process '{}' dropped with its stream from {}", process, addr),
            Err(e) => debug!("Process '{}' already gone: {}", process, e),
        }
    }
    debug!("Client disconnected: {}", addr);
}

/// Push registry events to a watcher until it goes away
async fn forward_events<W>(writer: &mut W, addr: SocketAddr, registry: &GlobalManager)
where
    W: AsyncWrite + Unpin,
{
    let events = match registry.watch() {
        Ok(events) => events,
        Err(e) => {
            error!("Cannot watch registry for {}: {}", addr, e);
            return;
        }
    };
    let (tx, mut rx) = mpsc::unbounded_channel();

    // The registry feed is a blocking channel; bridge it onto the runtime
    let bridge = thread::Builder::new()
        .name(format!("mts-gcm-bridge-{}", addr))
        .spawn(move || loop {
            match events.recv_timeout(WATCH_POLL) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        });
    if let Err(e) = bridge {
        error!("Failed to start event bridge for {}: {}", addr, e);
        return;
    }

    info!("Watcher {} subscribed to registry events", addr);
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_response(writer, &GlobalResponse::Event(event)).await {
            debug!("Watcher {} went away: {}", addr, e);
            break;
        }
    }
}

/// Accept clients until the listener fails
async fn serve(listener: TcpListener, registry: Arc<GlobalManager>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                let registry = registry.clone();
                tokio::spawn(async move {
                    handle_tcp_client(stream, addr, registry).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_tcp_client(stream: TcpStream, addr: SocketAddr, registry: Arc<GlobalManager>) {
    handle_client(stream, addr, registry).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        "mts_gcm=debug,info"
    } else {
        "mts_gcm=info"
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Arc::new(GlobalManager::new());

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("MTS global component manager listening on {}", bind_addr);

    tokio::select! {
        _ = serve(listener, registry.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down with {} registered processes", registry.process_count());
        }
    }
    Ok(())
}
