// Connections across simulated and real process boundaries
use mts_core::manager::ManagerEvent;
use mts_core::{
    Component, ConnectionState, ExecutionResult, FunctionQualifiedRead, FunctionRead,
    FunctionVoid, FunctionWrite, GlobalManager, GlobalRegistry, LocalManager, LoopbackNetwork,
    ManagerConfig, MtsError,
};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct ArmHandles {
    move_to: FunctionWrite<i64>,
    position: FunctionRead<i64>,
    scale: FunctionQualifiedRead<f64, f64>,
    home: FunctionVoid,
}

fn arm_component(homed: Arc<AtomicUsize>) -> Component {
    let position = Arc::new(AtomicI64::new(0));
    let sink = position.clone();
    let mut arm = Component::passive("arm");
    arm.add_provided_interface("Arm")
        .unwrap()
        .add_command_write("MoveTo", move |p: &i64| {
            sink.store(*p, Ordering::SeqCst);
        })
        .unwrap()
        .add_command_read("Position", move || position.load(Ordering::SeqCst))
        .unwrap()
        .add_command_qualified_read("Scale", |x: &f64| x * 2.0)
        .unwrap()
        .add_command_void("Home", move || {
            homed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    arm
}

fn planner_component() -> (Component, ArmHandles) {
    let mut planner = Component::passive("planner");
    let arm = planner.add_required_interface("Arm").unwrap();
    let handles = ArmHandles {
        move_to: arm.add_function_write("MoveTo").unwrap(),
        position: arm.add_function_read("Position").unwrap(),
        scale: arm.add_function_qualified_read("Scale").unwrap(),
        home: arm.add_function_void("Home").unwrap(),
    };
    (planner, handles)
}

fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

struct LoopbackPair {
    gcm: Arc<GlobalManager>,
    network: Arc<LoopbackNetwork>,
    server: LocalManager,
    client: LocalManager,
    homed: Arc<AtomicUsize>,
    arm: ArmHandles,
}

fn loopback_pair(client_config: ManagerConfig) -> LoopbackPair {
    let gcm = Arc::new(GlobalManager::new());
    let network = LoopbackNetwork::new();
    let global: Arc<dyn GlobalRegistry> = gcm.clone();

    let server =
        LocalManager::with_loopback(ManagerConfig::new("arm_process"), global.clone(), &network)
            .unwrap();
    let homed = Arc::new(AtomicUsize::new(0));
    server.add_component(arm_component(homed.clone())).unwrap();

    let client = LocalManager::with_loopback(client_config, global, &network).unwrap();
    let (planner, arm) = planner_component();
    client.add_component(planner).unwrap();

    LoopbackPair {
        gcm,
        network,
        server,
        client,
        homed,
        arm,
    }
}

#[test]
fn test_loopback_round_trip() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    let id = pair
        .client
        .connect("planner", "Arm", "arm_process", "arm", "Arm")
        .unwrap();
    assert_eq!(pair.client.connection_state(id), Some(ConnectionState::Connected));

    assert_eq!(pair.arm.move_to.execute(&42), ExecutionResult::Ok);
    assert_eq!(pair.arm.position.call(), (ExecutionResult::Ok, 42));
    assert_eq!(pair.arm.scale.call(&1.25), (ExecutionResult::Ok, 2.5));
    assert_eq!(pair.arm.home.execute(), ExecutionResult::Ok);
    assert_eq!(pair.homed.load(Ordering::SeqCst), 1);

    let states: Vec<ConnectionState> = pair
        .client
        .connections()
        .into_iter()
        .map(|c| c.state)
        .collect();
    assert_eq!(states, vec![ConnectionState::Connected]);
    assert_eq!(pair.server.proxy_server().client_count(), 1);

    pair.client.disconnect(id).unwrap();
    assert_eq!(pair.arm.position.call().0, ExecutionResult::NotBound);
    assert_eq!(pair.server.proxy_server().client_count(), 0);
}

#[test]
fn test_unknown_remote_names_fail_cleanly() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    assert!(matches!(
        pair.client.connect("planner", "Arm", "nowhere", "arm", "Arm"),
        Err(MtsError::NoSuchInterfaceOrCommand(_))
    ));
    assert!(matches!(
        pair.client.connect("planner", "Arm", "arm_process", "arm", "Gripper"),
        Err(MtsError::NoSuchInterfaceOrCommand(_))
    ));
    assert!(pair.client.connections().is_empty());
    assert!(!pair.arm.move_to.is_bound());
    assert_eq!(pair.server.proxy_server().client_count(), 0);
}

#[test]
fn test_cut_link_fails_calls_and_connection() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    let events = pair.client.subscribe();
    let id = pair
        .client
        .connect("planner", "Arm", "arm_process", "arm", "Arm")
        .unwrap();
    assert_eq!(pair.arm.move_to.execute(&3), ExecutionResult::Ok);

    pair.network.disconnect("loopback://arm_process");
    assert_eq!(pair.arm.position.call().0, ExecutionResult::TransportFailure);
    assert_eq!(pair.arm.move_to.execute(&4), ExecutionResult::TransportFailure);
    assert_eq!(pair.client.connection_state(id), Some(ConnectionState::Failed));
    assert!(wait_until(
        || events.try_iter().any(|e| matches!(
            e,
            ManagerEvent::ConnectionStateChanged {
                state: ConnectionState::Failed,
                ..
            }
        )),
        Duration::from_secs(1)
    ));

    // No hidden retry: the link comes back but the connection stays failed
    pair.network
        .register("loopback://arm_process", pair.server.proxy_server().clone())
        .unwrap();
    assert_eq!(pair.arm.position.call().0, ExecutionResult::TransportFailure);

    pair.client.reconnect(id).unwrap();
    assert_eq!(pair.client.connection_state(id), Some(ConnectionState::Connected));
    assert_eq!(pair.arm.position.call(), (ExecutionResult::Ok, 3));
}

#[test]
fn test_failed_reconnect_keeps_connection_for_retry() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    let id = pair
        .client
        .connect("planner", "Arm", "arm_process", "arm", "Arm")
        .unwrap();
    assert_eq!(pair.arm.move_to.execute(&9), ExecutionResult::Ok);

    pair.network.disconnect("loopback://arm_process");
    assert!(pair.client.reconnect(id).is_err());
    let info = pair.client.connection(id).unwrap();
    assert_eq!(info.state, ConnectionState::Failed);
    assert!(info.failure.is_some());
    assert_eq!(pair.client.connections().len(), 1);
    assert!(!pair.arm.position.is_bound());

    pair.network
        .register("loopback://arm_process", pair.server.proxy_server().clone())
        .unwrap();
    pair.client.reconnect(id).unwrap();
    assert_eq!(pair.client.connection_state(id), Some(ConnectionState::Connected));
    assert_eq!(pair.arm.position.call(), (ExecutionResult::Ok, 9));
    // Only the live session stays registered with the servant
    assert_eq!(pair.server.proxy_server().client_count(), 1);
}

#[test]
fn test_deregistered_process_fails_dependent_connections() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    let events = pair.client.subscribe();
    let id = pair
        .client
        .connect("planner", "Arm", "arm_process", "arm", "Arm")
        .unwrap();

    pair.gcm.remove_process("arm_process").unwrap();
    assert_eq!(pair.client.connection_state(id), Some(ConnectionState::Failed));
    assert_eq!(pair.arm.position.call().0, ExecutionResult::TransportFailure);
    assert!(wait_until(
        || events.try_iter().any(|e| e
            == ManagerEvent::ProcessRemoved {
                process: "arm_process".into()
            }),
        Duration::from_secs(1)
    ));
    assert!(pair
        .client
        .connection(id)
        .unwrap()
        .failure
        .unwrap()
        .contains("arm_process"));
}

#[test]
fn test_fire_and_forget_void() {
    let mut config = ManagerConfig::new("planner_process");
    config.void_fire_and_forget = true;
    let pair = loopback_pair(config);
    pair.client
        .connect("planner", "Arm", "arm_process", "arm", "Arm")
        .unwrap();

    assert_eq!(pair.arm.home.execute(), ExecutionResult::Queued);
    assert!(wait_until(
        || pair.homed.load(Ordering::SeqCst) == 1,
        Duration::from_secs(1)
    ));
}

#[test]
fn test_remote_event_handlers_rejected() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    let mut watcher = Component::passive("watcher");
    watcher
        .add_required_interface("Arm")
        .unwrap()
        .add_event_handler_void("Moved", || {})
        .unwrap();
    pair.client.add_component(watcher).unwrap();
    assert!(matches!(
        pair.client.connect("watcher", "Arm", "arm_process", "arm", "Arm"),
        Err(MtsError::Unsupported(_))
    ));
}

#[test]
fn test_duplicate_process_name_rejected() {
    let pair = loopback_pair(ManagerConfig::new("planner_process"));
    let global: Arc<dyn GlobalRegistry> = pair.gcm.clone();
    assert!(matches!(
        LocalManager::with_loopback(ManagerConfig::new("arm_process"), global, &pair.network),
        Err(MtsError::DuplicateName(_))
    ));
}

#[test]
fn test_tcp_round_trip_and_server_shutdown() {
    let gcm = Arc::new(GlobalManager::new());
    let global: Arc<dyn GlobalRegistry> = gcm.clone();

    let mut server_config = ManagerConfig::new("arm_process");
    server_config.listen_address = Some("127.0.0.1:0".to_string());
    let server = LocalManager::new(server_config, global.clone()).unwrap();
    assert!(server.endpoint().starts_with("tcp://127.0.0.1:"));
    let homed = Arc::new(AtomicUsize::new(0));
    server.add_component(arm_component(homed.clone())).unwrap();

    let client = LocalManager::new(ManagerConfig::new("planner_process"), global).unwrap();
    let (planner, arm) = planner_component();
    client.add_component(planner).unwrap();

    let id = client
        .connect("planner", "Arm", "arm_process", "arm", "Arm")
        .unwrap();
    assert_eq!(arm.move_to.execute(&-7), ExecutionResult::Ok);
    assert_eq!(arm.position.call(), (ExecutionResult::Ok, -7));
    assert_eq!(arm.scale.call(&4.0), (ExecutionResult::Ok, 8.0));
    assert_eq!(arm.home.execute(), ExecutionResult::Ok);
    assert_eq!(homed.load(Ordering::SeqCst), 1);

    server.shutdown();
    assert_eq!(arm.position.call().0, ExecutionResult::TransportFailure);
    assert_eq!(client.connection_state(id), Some(ConnectionState::Failed));
    assert_eq!(gcm.processes().unwrap(), vec!["planner_process".to_string()]);
}
