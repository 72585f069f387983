use super::connection::{
    Connection, ConnectionEndpoints, ConnectionId, ConnectionInfo, ConnectionState,
};
use super::events::{EventBus, ManagerEvent};
use super::global::{GlobalRegistry, RegistryEvent};
use super::remote::{RemoteGlobalManager, DEFAULT_GCM_PORT};
use super::registry::{ComponentEntry, ComponentRegistry};
use crate::component::Component;
use crate::config::ManagerConfig;
use crate::error::{MtsError, MtsResult};
use crate::interface::{plan_binding, Binding, BindingPlan, InterfaceDescription};
use crate::proxy::{
    Connector, LoopbackNetwork, ProxyServer, ProxySession, SessionFailure, TcpConnector,
    TcpProxyListener,
};
use crate::task::{TaskMetrics, TaskOptions, TaskState};
use crossbeam::channel::{self, Receiver, Select, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long `remove_component` and `shutdown` wait for a task thread
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of one registered component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub name: String,
    pub state: TaskState,
    pub period: Option<Duration>,
    pub provided: Vec<InterfaceDescription>,
    pub required: Vec<String>,
}

/// Point-in-time view of a manager, written as JSON for external viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub process: String,
    pub endpoint: String,
    pub components: Vec<ComponentInfo>,
    pub connections: Vec<ConnectionInfo>,
}

impl ManagerSnapshot {
    pub fn to_json(&self) -> MtsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> MtsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> MtsResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> MtsResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// How the process's proxy server is exposed
enum Exposure {
    Tcp(TcpProxyListener),
    Loopback(Arc<LoopbackNetwork>),
}

/// State shared with the watcher thread
struct Shared {
    process: String,
    registry: Arc<ComponentRegistry>,
    events: EventBus,
    connections: Mutex<BTreeMap<ConnectionId, Connection>>,
    failures: Receiver<SessionFailure>,
    registry_events: Receiver<RegistryEvent>,
    registry_feed_open: AtomicBool,
    /// Held while notifications are applied, so a query never overtakes one
    pump_lock: Mutex<()>,
}

impl Shared {
    /// Apply every pending session failure and registry change
    fn pump(&self) {
        let _guard = self.pump_lock.lock();
        while let Ok(failure) = self.failures.try_recv() {
            self.on_session_failure(failure);
        }
        loop {
            match self.registry_events.try_recv() {
                Ok(event) => self.on_registry_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.registry_feed_open.swap(false, Ordering::SeqCst) {
                        log::warn!("[{}] lost the global registry event feed", self.process);
                    }
                    break;
                }
            }
        }
    }

    fn on_session_failure(&self, failure: SessionFailure) {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get_mut(&failure.connection) {
            self.fail(conn, failure.reason);
        }
    }

    fn on_registry_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::ComponentRemoved { process, component } if process != self.process => {
                let reason = format!("component '{}:{}' deregistered", process, component);
                self.fail_where(
                    |e| e.server_process == process && e.server_component == component,
                    &reason,
                );
            }
            RegistryEvent::ProcessRemoved { process } if process != self.process => {
                let reason = format!("process '{}' deregistered", process);
                self.fail_where(|e| e.server_process == process, &reason);
                self.events.publish(ManagerEvent::ProcessRemoved { process });
            }
            _ => {}
        }
    }

    fn fail_where<P>(&self, matches: P, reason: &str)
    where
        P: Fn(&ConnectionEndpoints) -> bool,
    {
        let mut connections = self.connections.lock();
        for conn in connections.values_mut().filter(|c| matches(&c.endpoints)) {
            self.fail(conn, reason.to_string());
        }
    }

    /// Move a live connection to FAILED
    ///
    /// A proxied binding stays in place so its slots keep answering
    /// `TransportFailure` until the caller reconnects.
    fn fail(&self, conn: &mut Connection, reason: String) {
        if conn.state == ConnectionState::Failed {
            return;
        }
        if conn.advance(ConnectionState::Failed).is_err() {
            return;
        }
        if let Some(session) = &conn.session {
            session.degrade(&reason);
        }
        log::warn!("Connection {} ({}) failed: {}", conn.id, conn.endpoints, reason);
        conn.failure = Some(reason.clone());
        self.events.publish(ManagerEvent::ConnectionStateChanged {
            id: conn.id,
            state: ConnectionState::Failed,
            reason: Some(reason),
        });
    }

    fn advance(&self, conn: &mut Connection, next: ConnectionState) -> MtsResult<()> {
        conn.advance(next)?;
        self.events.publish(ManagerEvent::ConnectionStateChanged {
            id: conn.id,
            state: next,
            reason: None,
        });
        Ok(())
    }
}

/// Per-process component manager
///
/// Owns the process's components, drives their lifecycle, brokers
/// connections between required and provided interfaces (locally or
/// through the proxy layer) and hosts the process's proxy server.
pub struct LocalManager {
    config: ManagerConfig,
    endpoint: String,
    shared: Arc<Shared>,
    server: Arc<ProxyServer>,
    global: Arc<dyn GlobalRegistry>,
    connector: Arc<dyn Connector>,
    failures_tx: Sender<SessionFailure>,
    next_connection: AtomicU64,
    exposure: Exposure,
    watcher_stop: Mutex<Option<Sender<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl LocalManager {
    /// Manager whose proxy server listens on TCP
    ///
    /// Binds `config.listen_address` (default `127.0.0.1:0`) and registers
    /// the bound address with `global`.
    pub fn new(config: ManagerConfig, global: Arc<dyn GlobalRegistry>) -> MtsResult<Self> {
        config.validate()?;
        let registry = Arc::new(ComponentRegistry::new());
        let server = Arc::new(ProxyServer::new(&config.process_name, registry.clone()));
        let bind = config
            .listen_address
            .clone()
            .unwrap_or_else(|| "127.0.0.1:0".to_string());
        let listener = TcpProxyListener::bind(bind.as_str(), server.clone())?;
        let endpoint = listener.endpoint();
        let connector = Arc::new(TcpConnector::new(config.rpc_timeout()));
        Self::assemble(
            config,
            endpoint,
            registry,
            server,
            global,
            connector,
            Exposure::Tcp(listener),
        )
    }

    /// TCP manager registered with the `mts_gcm` daemon named in `config`
    ///
    /// Falls back to `127.0.0.1:DEFAULT_GCM_PORT` when no
    /// `global_manager_address` is configured.
    pub fn from_config(config: ManagerConfig) -> MtsResult<Self> {
        let address = config
            .global_manager_address
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_GCM_PORT));
        let global = RemoteGlobalManager::connect(&address, config.rpc_timeout())?;
        Self::new(config, Arc::new(global))
    }

    /// Manager reachable as `loopback://<process>` on `network`
    pub fn with_loopback(
        config: ManagerConfig,
        global: Arc<dyn GlobalRegistry>,
        network: &Arc<LoopbackNetwork>,
    ) -> MtsResult<Self> {
        config.validate()?;
        let registry = Arc::new(ComponentRegistry::new());
        let server = Arc::new(ProxyServer::new(&config.process_name, registry.clone()));
        let endpoint = format!("loopback://{}", config.process_name);
        network.register(&endpoint, server.clone())?;
        let connector: Arc<dyn Connector> = network.clone();
        let exposure = Exposure::Loopback(network.clone());
        match Self::assemble(config, endpoint.clone(), registry, server, global, connector, exposure)
        {
            Ok(manager) => Ok(manager),
            Err(e) => {
                network.disconnect(&endpoint);
                Err(e)
            }
        }
    }

    fn assemble(
        config: ManagerConfig,
        endpoint: String,
        registry: Arc<ComponentRegistry>,
        server: Arc<ProxyServer>,
        global: Arc<dyn GlobalRegistry>,
        connector: Arc<dyn Connector>,
        exposure: Exposure,
    ) -> MtsResult<Self> {
        let registry_events = global.watch()?;
        global.add_process(&config.process_name, &endpoint)?;

        let (failures_tx, failures_rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            process: config.process_name.clone(),
            registry,
            events: EventBus::new(),
            connections: Mutex::new(BTreeMap::new()),
            failures: failures_rx,
            registry_events,
            registry_feed_open: AtomicBool::new(true),
            pump_lock: Mutex::new(()),
        });
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let watcher = spawn_watcher(&shared, stop_rx)?;

        log::info!("Local manager '{}' up at {}", config.process_name, endpoint);
        Ok(Self {
            config,
            endpoint,
            shared,
            server,
            global,
            connector,
            failures_tx,
            next_connection: AtomicU64::new(1),
            exposure,
            watcher_stop: Mutex::new(Some(stop_tx)),
            watcher: Mutex::new(Some(watcher)),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn process_name(&self) -> &str {
        &self.config.process_name
    }

    /// Endpoint registered with the global manager
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn proxy_server(&self) -> &Arc<ProxyServer> {
        &self.server
    }

    /// Task options derived from this manager's configuration
    pub fn task_options(&self) -> TaskOptions {
        TaskOptions::from(&self.config)
    }

    pub fn subscribe(&self) -> Receiver<ManagerEvent> {
        self.shared.events.subscribe()
    }

    // ---- Components ----

    /// Register a component and export its provided interfaces
    pub fn add_component(&self, component: Component) -> MtsResult<()> {
        self.ensure_running()?;
        component.validate()?;
        let entry = ComponentEntry::new(&self.config.process_name, component, self.shared.events.clone());
        let name = entry.name.clone();
        let interfaces: Vec<String> = entry.provided.keys().cloned().collect();
        self.shared.registry.insert(entry)?;

        if let Err(e) = self
            .global
            .add_component(&self.config.process_name, &name, &interfaces)
        {
            self.shared.registry.remove(&name);
            return Err(e);
        }
        log::info!(
            "[{}] added component '{}' ({} provided interfaces)",
            self.config.process_name,
            name,
            interfaces.len()
        );
        self.shared.events.publish(ManagerEvent::ComponentAdded {
            process: self.config.process_name.clone(),
            component: name,
        });
        Ok(())
    }

    /// Stop, disconnect and deregister a component
    pub fn remove_component(&self, name: &str) -> MtsResult<()> {
        let entry = self.entry(name)?;
        entry.kill();
        if !entry.join(JOIN_TIMEOUT) {
            log::warn!("[{}] task '{}' did not stop in time", self.config.process_name, name);
        }

        {
            let mut connections = self.shared.connections.lock();
            let reason = format!("component '{}' removed", name);
            for conn in connections.values_mut() {
                let e = &conn.endpoints;
                let as_client = e.client_component == name;
                let as_server = e.is_local() && e.server_component == name;
                if as_client || as_server {
                    self.shared.fail(conn, reason.clone());
                    conn.release();
                }
            }
            connections.retain(|_, c| c.endpoints.client_component != name);
        }

        self.shared.registry.remove(name);
        self.server.invalidate_component(name);
        if let Err(e) = self.global.remove_component(&self.config.process_name, name) {
            log::warn!("[{}] deregistering '{}' failed: {}", self.config.process_name, name, e);
        }
        self.shared.events.publish(ManagerEvent::ComponentRemoved {
            process: self.config.process_name.clone(),
            component: name.to_string(),
        });
        Ok(())
    }

    pub fn component_names(&self) -> Vec<String> {
        self.shared.registry.names()
    }

    pub fn components(&self) -> Vec<ComponentInfo> {
        self.shared
            .registry
            .all()
            .iter()
            .map(|entry| ComponentInfo {
                name: entry.name.clone(),
                state: entry.state(),
                period: entry.period(),
                provided: entry.provided.values().map(|p| p.describe()).collect(),
                required: entry.required.keys().cloned().collect(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            process: self.config.process_name.clone(),
            endpoint: self.endpoint.clone(),
            components: self.components(),
            connections: self.connections(),
        }
    }

    pub fn component_state(&self, name: &str) -> MtsResult<TaskState> {
        Ok(self.entry(name)?.state())
    }

    /// Counters of a task component; `None` for passive components
    pub fn task_metrics(&self, name: &str) -> MtsResult<Option<TaskMetrics>> {
        Ok(self.entry(name)?.metrics())
    }

    // ---- Lifecycle ----

    pub fn create(&self, name: &str) -> MtsResult<()> {
        self.entry(name)?.create()
    }

    pub fn start(&self, name: &str) -> MtsResult<()> {
        self.entry(name)?.start()
    }

    /// Request a component to stop; observed at its next period boundary
    pub fn kill(&self, name: &str) -> MtsResult<()> {
        self.entry(name)?.kill();
        Ok(())
    }

    /// Drive every CONSTRUCTED component to INITIALIZING
    pub fn create_all(&self) -> MtsResult<()> {
        for entry in self.shared.registry.all() {
            if entry.state() == TaskState::Constructed {
                entry.create()?;
            }
        }
        Ok(())
    }

    /// Drive every INITIALIZING component to ACTIVE
    pub fn start_all(&self) -> MtsResult<()> {
        for entry in self.shared.registry.all() {
            if entry.state() == TaskState::Initializing {
                entry.start()?;
            }
        }
        Ok(())
    }

    pub fn kill_all(&self) {
        for entry in self.shared.registry.all() {
            if !entry.state().is_terminal() {
                entry.kill();
            }
        }
    }

    /// Wait until `name` reaches `state`
    ///
    /// Returns `Ok(false)` on timeout, or as soon as the component ends up
    /// in a different terminal state.
    pub fn wait_for_state(&self, name: &str, state: TaskState, timeout: Duration) -> MtsResult<bool> {
        let entry = self.entry(name)?;
        entry
            .state
            .wait_until(|s| s.same_phase(&state) || s.is_terminal(), timeout);
        Ok(entry.state().same_phase(&state))
    }

    /// Wait until every component reaches `state`
    pub fn wait_for_all(&self, state: TaskState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for entry in self.shared.registry.all() {
            let left = deadline.saturating_duration_since(Instant::now());
            entry
                .state
                .wait_until(|s| s.same_phase(&state) || s.is_terminal(), left);
            if !entry.state().same_phase(&state) {
                return false;
            }
        }
        true
    }

    // ---- Connections ----

    /// Connect `client_component.required_interface` to
    /// `server_process:server_component.provided_interface`
    ///
    /// The connection is either fully established or nothing is left
    /// behind; on failure a FAILED state change is published and the error
    /// returned.
    pub fn connect(
        &self,
        client_component: &str,
        required_interface: &str,
        server_process: &str,
        server_component: &str,
        provided_interface: &str,
    ) -> MtsResult<ConnectionId> {
        self.ensure_running()?;
        self.shared.pump();
        let endpoints = ConnectionEndpoints {
            client_process: self.config.process_name.clone(),
            client_component: client_component.to_string(),
            required_interface: required_interface.to_string(),
            server_process: server_process.to_string(),
            server_component: server_component.to_string(),
            provided_interface: provided_interface.to_string(),
        };

        let mut connections = self.shared.connections.lock();
        let mut stale = Vec::new();
        for conn in connections.values() {
            let e = &conn.endpoints;
            if e.client_component != client_component || e.required_interface != required_interface {
                continue;
            }
            if conn.state != ConnectionState::Failed {
                return Err(MtsError::AlreadyConnected(format!(
                    "'{}.{}' is already connected by connection {} ({})",
                    client_component, required_interface, conn.id, conn.endpoints
                )));
            }
            stale.push(conn.id);
        }
        for id in stale {
            if let Some(mut conn) = connections.remove(&id) {
                log::debug!("Dropping failed connection {} before reconnecting", id);
                conn.release();
            }
        }

        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let conn = self.establish(id, endpoints).map_err(|(e, _)| e)?;
        connections.insert(id, conn);
        Ok(id)
    }

    /// Connect two components of this process
    pub fn connect_local(
        &self,
        client_component: &str,
        required_interface: &str,
        server_component: &str,
        provided_interface: &str,
    ) -> MtsResult<ConnectionId> {
        let process = self.config.process_name.clone();
        self.connect(
            client_component,
            required_interface,
            &process,
            server_component,
            provided_interface,
        )
    }

    /// Unbind a connection and forget it
    pub fn disconnect(&self, id: ConnectionId) -> MtsResult<()> {
        self.shared.pump();
        let mut conn = self
            .shared
            .connections
            .lock()
            .remove(&id)
            .ok_or_else(|| MtsError::not_found(format!("connection {}", id)))?;
        conn.release();
        log::info!("Connection {} ({}) disconnected", id, conn.endpoints);
        Ok(())
    }

    /// Tear a connection down and establish it again under the same id
    pub fn reconnect(&self, id: ConnectionId) -> MtsResult<()> {
        self.ensure_running()?;
        self.shared.pump();
        let mut connections = self.shared.connections.lock();
        let mut old = connections
            .remove(&id)
            .ok_or_else(|| MtsError::not_found(format!("connection {}", id)))?;
        old.release();
        let endpoints = old.endpoints.clone();
        drop(old);

        log::info!("Reconnecting {} ({})", id, endpoints);
        match self.establish(id, endpoints) {
            Ok(conn) => {
                connections.insert(id, conn);
                Ok(())
            }
            Err((e, failed)) => {
                // Stays listed as FAILED so the caller can retry later
                connections.insert(id, failed);
                Err(e)
            }
        }
    }

    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.shared.pump();
        self.shared.connections.lock().get(&id).map(|c| c.state)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.shared.pump();
        self.shared.connections.lock().get(&id).map(|c| c.info())
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared.pump();
        self.shared
            .connections
            .lock()
            .values()
            .map(|c| c.info())
            .collect()
    }

    /// Bind a new connection; on error the released FAILED record is returned
    /// alongside the cause
    fn establish(
        &self,
        id: ConnectionId,
        endpoints: ConnectionEndpoints,
    ) -> Result<Connection, (MtsError, Connection)> {
        let mut conn = Connection::new(id, endpoints);
        self.shared.events.publish(ManagerEvent::ConnectionStateChanged {
            id,
            state: ConnectionState::Requested,
            reason: None,
        });
        let outcome = if conn.endpoints.is_local() {
            self.bind_local(&mut conn)
        } else {
            self.bind_remote(&mut conn)
        };

        let outcome =
            outcome.and_then(|()| self.shared.advance(&mut conn, ConnectionState::Connected));
        match outcome {
            Ok(()) => {
                log::info!("Connection {} established: {}", id, conn.endpoints);
                Ok(conn)
            }
            Err(e) => {
                conn.release();
                self.shared.fail(&mut conn, e.to_string());
                conn.state = ConnectionState::Failed;
                conn.failure.get_or_insert_with(|| e.to_string());
                Err((e, conn))
            }
        }
    }

    fn bind_local(&self, conn: &mut Connection) -> MtsResult<()> {
        let e = &conn.endpoints;
        let required = self
            .shared
            .registry
            .required_interface(&e.client_component, &e.required_interface)?;
        let provided = self
            .shared
            .registry
            .provided_interface(&e.server_component, &e.provided_interface)?;
        let plan = plan_binding(&required, &provided)?;
        self.shared.advance(conn, ConnectionState::BoundLocal)?;
        conn.binding = Some(plan.commit()?);
        Ok(())
    }

    fn bind_remote(&self, conn: &mut Connection) -> MtsResult<()> {
        let required = self
            .shared
            .registry
            .required_interface(&conn.endpoints.client_component, &conn.endpoints.required_interface)?;
        let location = self.global.find_provided_interface(
            &conn.endpoints.server_process,
            &conn.endpoints.server_component,
            &conn.endpoints.provided_interface,
        )?;
        self.shared.advance(conn, ConnectionState::ProxyPending)?;

        let transport = self.connector.open(&location.endpoint)?;
        let (session, targets) = ProxySession::open(
            conn.id,
            &conn.endpoints,
            &required,
            transport,
            self.failures_tx.clone(),
            self.config.void_fire_and_forget,
        )?;
        // Held by the connection from here on, so a failed commit closes it
        conn.session = Some(session);

        let mut plan = BindingPlan::new(&required)?;
        for (slot, target) in targets {
            plan.bind_slot(slot, target);
        }
        let binding: Binding = plan.commit()?;
        conn.binding = Some(binding);
        Ok(())
    }

    // ---- Teardown ----

    /// Stop every task, drop every connection and leave the global registry
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Shutting down local manager '{}'", self.config.process_name);

        self.kill_all();
        for entry in self.shared.registry.all() {
            if !entry.join(JOIN_TIMEOUT) {
                log::warn!("Task '{}' did not stop in time", entry.name);
            }
        }

        let connections = std::mem::take(&mut *self.shared.connections.lock());
        for (_, mut conn) in connections {
            conn.release();
        }

        self.watcher_stop.lock().take();
        if let Some(handle) = self.watcher.lock().take() {
            let _ = handle.join();
        }

        match &self.exposure {
            Exposure::Tcp(listener) => listener.shutdown(),
            Exposure::Loopback(network) => {
                network.disconnect(&self.endpoint);
            }
        }
        if let Err(e) = self.global.remove_process(&self.config.process_name) {
            log::warn!("Deregistering '{}' failed: {}", self.config.process_name, e);
        }
    }

    fn entry(&self, name: &str) -> MtsResult<Arc<ComponentEntry>> {
        self.shared
            .registry
            .get(name)
            .ok_or_else(|| MtsError::not_found(format!("component '{}'", name)))
    }

    fn ensure_running(&self) -> MtsResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MtsError::InvalidState(format!(
                "local manager '{}' is shut down",
                self.config.process_name
            )));
        }
        Ok(())
    }
}

impl Drop for LocalManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_watcher(shared: &Arc<Shared>, stop: Receiver<()>) -> MtsResult<JoinHandle<()>> {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let failures = shared.failures.clone();
    let registry_events = shared.registry_events.clone();
    let handle = thread::Builder::new()
        .name(format!("mts-lcm-{}", shared.process))
        .spawn(move || {
            let mut select = Select::new();
            select.recv(&failures);
            let registry_index = select.recv(&registry_events);
            let stop_index = select.recv(&stop);
            let mut watching_registry = true;
            loop {
                // Only wait for readiness; pump() does the receiving
                let index = select.ready();
                if index == stop_index {
                    break;
                }
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.pump();
                if watching_registry && !shared.registry_feed_open.load(Ordering::SeqCst) {
                    select.remove(registry_index);
                    watching_registry = false;
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ExecutionResult;
    use crate::manager::GlobalManager;

    fn manager(process: &str, network: &Arc<LoopbackNetwork>, gcm: &Arc<GlobalManager>) -> LocalManager {
        let global: Arc<dyn GlobalRegistry> = gcm.clone();
        LocalManager::with_loopback(ManagerConfig::new(process), global, network).unwrap()
    }

    fn counter_server() -> Component {
        let mut server = Component::passive("counter");
        let value = Arc::new(parking_lot::Mutex::new(0i32));
        let sink = value.clone();
        server
            .add_provided_interface("Counter")
            .unwrap()
            .add_command_write("Add", move |v: &i32| {
                *sink.lock() += *v;
            })
            .unwrap()
            .add_command_read("Get", move || *value.lock())
            .unwrap();
        server
    }

    #[test]
    fn test_local_connect_and_duplicate() {
        let network = LoopbackNetwork::new();
        let gcm = Arc::new(GlobalManager::new());
        let lcm = manager("main", &network, &gcm);
        let events = lcm.subscribe();

        let mut client = Component::passive("user");
        let required = client.add_required_interface("Counter").unwrap();
        let add = required.add_function_write::<i32>("Add").unwrap();
        let get = required.add_function_read::<i32>("Get").unwrap();
        lcm.add_component(client).unwrap();
        lcm.add_component(counter_server()).unwrap();

        let id = lcm.connect_local("user", "Counter", "counter", "Counter").unwrap();
        assert_eq!(lcm.connection_state(id), Some(ConnectionState::Connected));
        assert_eq!(add.execute(&5), ExecutionResult::Ok);
        assert_eq!(get.call(), (ExecutionResult::Ok, 5));

        assert!(matches!(
            lcm.connect_local("user", "Counter", "counter", "Counter"),
            Err(MtsError::AlreadyConnected(_))
        ));

        let states: Vec<ConnectionState> = events
            .try_iter()
            .filter_map(|e| match e {
                ManagerEvent::ConnectionStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Requested,
                ConnectionState::BoundLocal,
                ConnectionState::Connected
            ]
        );

        lcm.disconnect(id).unwrap();
        assert_eq!(get.call().0, ExecutionResult::NotBound);
        assert!(lcm.connection_state(id).is_none());
    }

    #[test]
    fn test_failed_connect_leaves_nothing() {
        let network = LoopbackNetwork::new();
        let gcm = Arc::new(GlobalManager::new());
        let lcm = manager("main", &network, &gcm);

        let mut client = Component::passive("user");
        let required = client.add_required_interface("Counter").unwrap();
        let add = required.add_function_write::<i32>("Add").unwrap();
        required.add_function_void("Reset").unwrap();
        lcm.add_component(client).unwrap();
        lcm.add_component(counter_server()).unwrap();

        assert!(matches!(
            lcm.connect_local("user", "Counter", "counter", "Counter"),
            Err(MtsError::NoSuchInterfaceOrCommand(_))
        ));
        assert!(!add.is_bound());
        assert!(lcm.connections().is_empty());
        assert!(lcm.connect_local("user", "Counter", "nobody", "Counter").is_err());
    }

    #[test]
    fn test_components_registered_globally() {
        let network = LoopbackNetwork::new();
        let gcm = Arc::new(GlobalManager::new());
        let lcm = manager("main", &network, &gcm);
        lcm.add_component(counter_server()).unwrap();

        assert_eq!(gcm.interfaces("main", "counter").unwrap(), vec!["Counter"]);
        assert!(matches!(
            lcm.add_component(Component::passive("counter")),
            Err(MtsError::DuplicateName(_))
        ));
        assert_eq!(lcm.components()[0].provided[0].commands.len(), 2);

        lcm.remove_component("counter").unwrap();
        assert!(gcm.components("main").unwrap().is_empty());

        lcm.shutdown();
        assert!(gcm.processes().unwrap().is_empty());
        assert!(!network.is_registered("loopback://main"));
        assert!(lcm.add_component(Component::passive("late")).is_err());
    }

    #[test]
    fn test_passive_lifecycle_through_manager() {
        let network = LoopbackNetwork::new();
        let gcm = Arc::new(GlobalManager::new());
        let lcm = manager("main", &network, &gcm);
        lcm.add_component(counter_server()).unwrap();

        lcm.create_all().unwrap();
        assert_eq!(lcm.component_state("counter").unwrap(), TaskState::Initializing);
        lcm.start_all().unwrap();
        assert!(lcm
            .wait_for_state("counter", TaskState::Active, Duration::from_millis(10))
            .unwrap());
        assert!(lcm.task_metrics("counter").unwrap().is_none());
        lcm.kill_all();
        assert!(lcm.wait_for_all(TaskState::Finished, Duration::from_millis(10)));
    }

    #[test]
    fn test_from_config_reports_unreachable_gcm() {
        let mut config = ManagerConfig::new("orphan");
        config.global_manager_address = Some("127.0.0.1:1".to_string());
        config.rpc_timeout_ms = 200;
        assert!(matches!(
            LocalManager::from_config(config),
            Err(MtsError::Transport(_))
        ));
    }

    #[test]
    fn test_zero_capacity_task_rejected_on_add() {
        let network = LoopbackNetwork::new();
        let gcm = Arc::new(GlobalManager::new());
        let lcm = manager("arm", &network, &gcm);
        let options = TaskOptions {
            mailbox_capacity: 0,
            ..TaskOptions::default()
        };
        let task = Component::periodic_with_options(
            "servo",
            Duration::from_millis(5),
            |_: &mut crate::task::TaskContext| -> MtsResult<()> { Ok(()) },
            options,
        );
        assert!(matches!(lcm.add_component(task), Err(MtsError::Config(_))));
        assert!(lcm.components().is_empty());
    }

    #[test]
    fn test_snapshot_json_file() {
        let network = LoopbackNetwork::new();
        let gcm = Arc::new(GlobalManager::new());
        let lcm = manager("viewer", &network, &gcm);
        lcm.add_component(counter_server()).unwrap();

        let snapshot = lcm.snapshot();
        assert_eq!(snapshot.process, "viewer");
        assert_eq!(snapshot.components.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        snapshot.write_to_file(&path).unwrap();
        assert_eq!(ManagerSnapshot::read_from_file(&path).unwrap(), snapshot);
        assert!(matches!(
            ManagerSnapshot::from_json("{\"process\": 3}"),
            Err(MtsError::Serialization(_))
        ));
    }
}
