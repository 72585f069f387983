// Connections between components of one process
use mts_core::manager::ManagerEvent;
use mts_core::{
    Component, ConnectionState, ExecutionResult, GlobalManager, GlobalRegistry, LocalManager,
    LoopbackNetwork, ManagerConfig, MtsError, MtsResult, TaskContext, TaskState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn local_manager(process: &str) -> (LocalManager, Arc<LoopbackNetwork>) {
    let global: Arc<dyn GlobalRegistry> = Arc::new(GlobalManager::new());
    let network = LoopbackNetwork::new();
    let manager = LocalManager::with_loopback(ManagerConfig::new(process), global, &network).unwrap();
    (manager, network)
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

fn idle(_: &mut TaskContext) -> MtsResult<()> {
    Ok(())
}

#[test]
fn test_queued_writes_run_on_task_thread_in_order() {
    let (lcm, _network) = local_manager("robot");

    let received = Arc::new(Mutex::new(Vec::<(i32, String)>::new()));
    let sink = received.clone();
    let source = received.clone();
    let mut controller = Component::periodic("controller", Duration::from_millis(2), idle);
    controller
        .add_provided_interface("Control")
        .unwrap()
        .add_command_write("Push", move |v: &i32| {
            let thread_name = thread::current().name().unwrap_or_default().to_string();
            sink.lock().push((*v, thread_name));
        })
        .unwrap()
        .add_command_read("Count", move || source.lock().len() as u64)
        .unwrap();

    let mut operator = Component::passive("operator");
    let control = operator.add_required_interface("Control").unwrap();
    let push = control.add_function_write::<i32>("Push").unwrap();
    let count = control.add_function_read::<u64>("Count").unwrap();

    lcm.add_component(controller).unwrap();
    lcm.add_component(operator).unwrap();
    lcm.connect_local("operator", "Control", "controller", "Control")
        .unwrap();
    lcm.create_all().unwrap();
    lcm.start_all().unwrap();

    for i in 0..10 {
        assert_eq!(push.execute(&i), ExecutionResult::Queued);
    }
    assert!(wait_until(|| count.call().1 == 10, Duration::from_secs(2)));

    let received = received.lock().clone();
    let values: Vec<i32> = received.iter().map(|(v, _)| *v).collect();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
    assert!(received.iter().all(|(_, t)| t == "mts-task-controller"));

    lcm.kill_all();
    assert!(lcm
        .wait_for_state("controller", TaskState::Finished, Duration::from_secs(2))
        .unwrap());
    assert_eq!(push.execute(&11), ExecutionResult::TaskNotRunning);
}

#[test]
fn test_local_events_reach_handlers() {
    let (lcm, _network) = local_manager("robot");

    let mut thermometer = Component::passive("thermometer");
    let temperature = thermometer
        .add_provided_interface("Thermo")
        .unwrap()
        .add_event_write::<f64>("Temperature")
        .unwrap();

    let readings = Arc::new(Mutex::new(Vec::new()));
    let sink = readings.clone();
    let mut monitor = Component::passive("monitor");
    monitor
        .add_required_interface("Thermo")
        .unwrap()
        .add_event_handler_write("Temperature", move |t: &f64| {
            sink.lock().push(*t);
        })
        .unwrap();

    lcm.add_component(thermometer).unwrap();
    lcm.add_component(monitor).unwrap();
    let id = lcm
        .connect_local("monitor", "Thermo", "thermometer", "Thermo")
        .unwrap();

    assert_eq!(temperature.emit(&21.5), 1);
    assert_eq!(temperature.emit(&22.0), 1);
    assert_eq!(*readings.lock(), vec![21.5, 22.0]);

    lcm.disconnect(id).unwrap();
    assert_eq!(temperature.emit(&23.0), 0);
    assert_eq!(readings.lock().len(), 2);
}

#[test]
fn test_mismatched_slot_fails_whole_connection() {
    let (lcm, _network) = local_manager("robot");

    let mut sensor = Component::passive("sensor");
    sensor
        .add_provided_interface("Range")
        .unwrap()
        .add_command_read("Distance", || 3i32)
        .unwrap()
        .add_command_void("Reset", || {})
        .unwrap();

    let mut wrong = Component::passive("wrong");
    let range = wrong.add_required_interface("Range").unwrap();
    let reset = range.add_function_void("Reset").unwrap();
    range.add_function_read::<f32>("Distance").unwrap();

    let mut right = Component::passive("right");
    let range = right.add_required_interface("Range").unwrap();
    let distance = range.add_function_read::<i32>("Distance").unwrap();
    let calibrate = range.add_function_void("Calibrate").unwrap().optional();

    lcm.add_component(sensor).unwrap();
    lcm.add_component(wrong).unwrap();
    lcm.add_component(right).unwrap();

    let events = lcm.subscribe();
    assert!(matches!(
        lcm.connect_local("wrong", "Range", "sensor", "Range"),
        Err(MtsError::TypeMismatch(_))
    ));
    // Nothing of the failed attempt stays bound
    assert!(!reset.is_bound());
    assert!(lcm.connections().is_empty());
    assert!(events.try_iter().any(|e| matches!(
        e,
        ManagerEvent::ConnectionStateChanged {
            state: ConnectionState::Failed,
            reason: Some(_),
            ..
        }
    )));

    lcm.connect_local("right", "Range", "sensor", "Range")
        .unwrap();
    assert_eq!(distance.call(), (ExecutionResult::Ok, 3));
    assert_eq!(calibrate.execute(), ExecutionResult::NotBound);
}

#[test]
fn test_removed_server_fails_connection_until_reconnect() {
    let (lcm, _network) = local_manager("robot");

    let gripper = || {
        let mut gripper = Component::passive("gripper");
        gripper
            .add_provided_interface("Grip")
            .unwrap()
            .add_command_read("Width", || 0.08f64)
            .unwrap();
        gripper
    };
    let mut arm = Component::passive("arm");
    let width = arm
        .add_required_interface("Grip")
        .unwrap()
        .add_function_read::<f64>("Width")
        .unwrap();

    lcm.add_component(gripper()).unwrap();
    lcm.add_component(arm).unwrap();
    let id = lcm.connect_local("arm", "Grip", "gripper", "Grip").unwrap();
    assert_eq!(width.call(), (ExecutionResult::Ok, 0.08));

    lcm.remove_component("gripper").unwrap();
    assert_eq!(lcm.connection_state(id), Some(ConnectionState::Failed));
    assert_eq!(width.call().0, ExecutionResult::NotBound);
    let info = lcm.connection(id).unwrap();
    assert!(info.failure.unwrap().contains("gripper"));

    lcm.add_component(gripper()).unwrap();
    lcm.reconnect(id).unwrap();
    assert_eq!(lcm.connection_state(id), Some(ConnectionState::Connected));
    assert_eq!(width.call(), (ExecutionResult::Ok, 0.08));
}

#[test]
fn test_lifecycle_events_published() {
    let (lcm, _network) = local_manager("robot");
    let events = lcm.subscribe();

    lcm.add_component(Component::periodic(
        "loop",
        Duration::from_millis(1),
        idle,
    ))
    .unwrap();
    lcm.create_all().unwrap();
    lcm.start_all().unwrap();
    lcm.kill("loop").unwrap();
    assert!(lcm
        .wait_for_state("loop", TaskState::Finished, Duration::from_secs(2))
        .unwrap());

    let states: Vec<TaskState> = events
        .try_iter()
        .filter_map(|e| match e {
            ManagerEvent::ComponentStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TaskState::Initializing,
            TaskState::Active,
            TaskState::Finished
        ]
    );
    assert_eq!(lcm.components()[0].state, TaskState::Finished);
}
