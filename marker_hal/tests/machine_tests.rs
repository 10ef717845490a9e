//! Machine integration tests against the simulated device.
//!
//! Motion properties are checked with proptest; the loop tests run the real
//! background thread.

use marker_common::config::MarkerConfig;
use marker_common::types::{Position, SafetyPhase, round_coordinate};
use marker_hal::protocol::{EMERGENCY_OFF, HOME_ACKS, INIT_ACKS};
use marker_hal::{
    ExecMode, Machine, MarkerError, SimulationHandle, SimulationTransport, TransportRegistry,
};
use proptest::prelude::*;
use std::time::Duration;

/// Machine initialised and homed, loop thread not started.
fn homed_machine() -> (Machine, SimulationHandle) {
    let (transport, handle) = SimulationTransport::with_handle();
    let machine = Machine::new(Box::new(transport), &MarkerConfig::default());
    machine.initialize().expect("initialize");
    machine.home().expect("home");
    (machine, handle)
}

fn fast_config() -> MarkerConfig {
    let mut config = MarkerConfig::default();
    config.device.transport = "simulation".to_string();
    config.engine.poll_interval_ms = 1;
    config.engine.restart_poll_ms = 1;
    config
}

fn out_of_range() -> impl Strategy<Value = f64> {
    prop_oneof![-1000.0f64..-0.01, 122.51f64..1000.0]
}

proptest! {
    #[test]
    fn relative_move_adds_rounded_delta(dx in -50.0f64..72.5, dy in -50.0f64..52.5) {
        let (machine, _handle) = homed_machine();
        machine.move_absolute(50.0, 50.0, ExecMode::Batch).unwrap();
        let expected_before = machine.motion_counter().expected();

        let pos = machine.move_relative(dx, dy, ExecMode::Batch).unwrap();

        let expected = Position::new(50.0, 50.0)
            .offset(round_coordinate(dx), round_coordinate(dy));
        prop_assert_eq!(pos, expected);
        prop_assert_eq!(machine.position(), expected);
        prop_assert_eq!(machine.motion_counter().expected(), expected_before + 1);
    }

    #[test]
    fn absolute_move_lands_on_rounded_target(x in 0.0f64..=122.5, y in 0.0f64..=102.5) {
        let (machine, _handle) = homed_machine();
        machine.move_absolute(x, y, ExecMode::Interactive).unwrap();
        prop_assert_eq!(
            machine.position(),
            Position::new(round_coordinate(x), round_coordinate(y))
        );
    }

    #[test]
    fn interactive_violation_keeps_position(x in out_of_range(), y in 0.0f64..=102.5) {
        let (machine, _handle) = homed_machine();
        machine.move_absolute(10.0, 20.0, ExecMode::Interactive).unwrap();
        let expected_before = machine.motion_counter().expected();

        let err = machine.move_absolute(x, y, ExecMode::Interactive).unwrap_err();
        prop_assert!(matches!(err, MarkerError::SafetyViolation(_)));
        prop_assert_eq!(machine.position(), Position::new(10.0, 20.0));
        prop_assert!(machine.error_message().is_some());
        prop_assert!(machine.is_running());
        prop_assert_eq!(machine.motion_counter().expected(), expected_before);
    }

    #[test]
    fn batch_violation_stops_without_moving(x in 0.0f64..=122.5, y in out_of_range()) {
        let (machine, handle) = homed_machine();
        machine.move_absolute(10.0, 20.0, ExecMode::Batch).unwrap();

        let err = machine.move_absolute(x, y, ExecMode::Batch).unwrap_err();
        prop_assert!(err.is_emergency());
        prop_assert_eq!(machine.position(), Position::new(10.0, 20.0));
        prop_assert!(!machine.is_running());
        prop_assert!(handle.written().ends_with(EMERGENCY_OFF));
    }

    #[test]
    fn home_always_ends_at_origin(x in 0.0f64..=122.5, y in 0.0f64..=102.5) {
        let (machine, _handle) = homed_machine();
        machine.move_absolute(x, y, ExecMode::Batch).unwrap();
        machine.home().unwrap();
        prop_assert_eq!(machine.position(), Position::ORIGIN);
        prop_assert_eq!(machine.homed().as_triple(), [1, 1, 1]);
    }
}

#[test]
fn second_emergency_off_changes_nothing() {
    let (machine, handle) = homed_machine();
    machine.move_absolute(5.0, 5.0, ExecMode::Batch).unwrap();

    machine.emergency_off("webinterface").unwrap();
    let written = handle.written();
    let pending = machine.engine().pending_outbound();
    let counter = machine.motion_counter();

    machine.emergency_off("webinterface").unwrap();
    assert_eq!(handle.written(), written);
    assert_eq!(machine.engine().pending_outbound(), pending);
    assert_eq!(machine.motion_counter(), counter);
    assert!(!machine.is_running());
}

#[test]
fn running_loop_acknowledges_everything() {
    let registry = TransportRegistry::with_builtin();
    let config = fast_config();
    let transport = registry.open(&config.device).expect("open simulation");

    let machine = Machine::start(transport, &config).expect("start");
    machine.move_absolute(20.0, 30.0, ExecMode::Batch).unwrap();
    machine.needle_down().unwrap();
    machine.move_relative(-10.0, -10.0, ExecMode::Batch).unwrap();

    assert!(machine.wait_idle(Duration::from_secs(5)));
    let counter = machine.motion_counter();
    assert_eq!(counter.expected(), INIT_ACKS + HOME_ACKS + 3);
    assert_eq!(counter.percent_done(), 100.0);
    assert_eq!(machine.phase(), SafetyPhase::Ready);
    assert_eq!(machine.position(), Position::new(10.0, 20.0));

    let transport = machine.shutdown().expect("shutdown");
    assert_eq!(transport.name(), "simulation");
}

#[test]
fn stalled_device_keeps_machine_moving() {
    let (transport, handle) = SimulationTransport::with_handle();
    handle.set_auto_answer(false);
    let machine = Machine::start(Box::new(transport), &fast_config()).expect("start");

    assert!(!machine.wait_idle(Duration::from_millis(50)));
    assert_eq!(machine.phase(), SafetyPhase::Moving);
    assert!(machine.snapshot().percent_done < 100.0);
}

#[test]
fn restart_with_running_loop() {
    let (transport, handle) = SimulationTransport::with_handle();
    let mut machine = Machine::start(Box::new(transport), &fast_config()).expect("start");
    machine.move_absolute(40.0, 40.0, ExecMode::Batch).unwrap();
    machine.move_absolute(200.0, 0.0, ExecMode::Batch).unwrap_err();
    assert!(!machine.is_running());
    assert!(handle.halted());

    machine.restart().unwrap();
    assert!(machine.is_running());
    assert_eq!(machine.error_message(), None);
    assert!(machine.wait_idle(Duration::from_secs(5)));
    assert!(!handle.halted());
    assert_eq!(machine.position(), Position::ORIGIN);
}

#[test]
fn shutdown_sends_moves_queued_since_last_iteration() {
    let (transport, handle) = SimulationTransport::with_handle();
    let machine = Machine::start(Box::new(transport), &MarkerConfig::default()).expect("start");
    std::thread::sleep(Duration::from_millis(20));

    for i in 1..=10 {
        let step = f64::from(i);
        machine.move_absolute(step, step, ExecMode::Batch).unwrap();
    }
    machine.shutdown().expect("shutdown");

    assert_eq!(handle.moves(), 10);
    assert!(handle.initialized());
}

#[test]
fn emergency_handle_racing_restart_trips_a_live_session() {
    for _ in 0..20 {
        let (transport, handle) = SimulationTransport::with_handle();
        let mut machine = Machine::start(Box::new(transport), &fast_config()).expect("start");
        let emergency = machine.emergency_handle();

        let trigger = std::thread::spawn(move || emergency.trigger("interrupt"));
        // Either the old or the new session is stopped, never a closed one.
        let _ = machine.restart();
        trigger.join().expect("trigger thread").expect("trigger reaches a transport");

        machine.emergency_handle().trigger("again").unwrap();
        assert!(!machine.is_running());
        assert!(handle.halted());
    }
}

#[test]
fn monitor_follows_the_current_session() {
    let (transport, _handle) = SimulationTransport::with_handle();
    let mut machine = Machine::start(Box::new(transport), &fast_config()).expect("start");
    let monitor = machine.monitor();

    machine.move_absolute(30.0, 12.5, ExecMode::Batch).unwrap();
    let poller = {
        let monitor = monitor.clone();
        std::thread::spawn(move || monitor.position())
    };
    assert_eq!(poller.join().expect("poller"), Position::new(30.0, 12.5));

    machine.emergency_off("test").unwrap();
    assert!(!monitor.is_running());
    assert_eq!(
        monitor.snapshot().message.as_deref(),
        Some("Emergency off triggered by test")
    );

    machine.restart().unwrap();
    assert!(monitor.is_running());
    assert!(machine.wait_idle(Duration::from_secs(5)));
    assert_eq!(monitor.snapshot(), machine.snapshot());
    assert_eq!(monitor.snapshot().phase, SafetyPhase::Ready);
}
