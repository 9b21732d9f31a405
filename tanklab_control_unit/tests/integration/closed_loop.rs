//! Closed-loop convergence on the simulated rig.
//!
//! The plant runs accelerated (100 plant seconds per wall second); PID dt
//! matches the plant time that elapses per scheduler tick.

use std::thread;
use std::time::Duration;

use tanklab_control_unit::supervisor::Actuator;

use super::sim_supervisor;

const CONFIG: &str = r#"
[endpoint]
subscription_period_ms = 50

[scheduler]
poll_period_ms = 20

[pid]
kp = 1.5
ki = 0.08
kd = 0.0
setpoint_h1 = 14.0
setpoint_h2 = 14.5
anti_windup_gain = 0.2
dt = 2.0
output_min = 0.0
output_max = 10.0
"#;

#[test]
fn loops_drive_levels_toward_setpoints() {
    let (supervisor, _) = sim_supervisor(CONFIG, Duration::from_millis(5), 100.0);
    supervisor.connect().unwrap();

    let h1_start = supervisor.read_tank_level(1).unwrap();
    let h2_start = supervisor.read_tank_level(2).unwrap();
    let e1_start = (14.0 - h1_start).abs();
    let e2_start = (14.5 - h2_start).abs();

    supervisor.start_control().unwrap();
    thread::sleep(Duration::from_secs(3));
    supervisor.stop_control();

    let stats = supervisor.control_stats();
    assert!(stats.ticks > 50, "too few ticks: {}", stats.ticks);
    assert_eq!(stats.control_skips, 0);

    let h1 = supervisor.read_tank_level(1).unwrap();
    let h2 = supervisor.read_tank_level(2).unwrap();
    let e1 = (14.0 - h1).abs();
    let e2 = (14.5 - h2).abs();

    assert!(
        e1 < e1_start * 0.6,
        "tank 1 did not converge: {h1_start} -> {h1} (setpoint 14.0)"
    );
    assert!(
        e2 < e2_start * 0.6,
        "tank 2 did not converge: {h2_start} -> {h2} (setpoint 14.5)"
    );

    // The loops actually drove the valves.
    assert!(supervisor.read_valve_voltage(1).unwrap() > 0.0);
    assert!(supervisor.read_valve_voltage(2).unwrap() > 0.0);

    supervisor.disconnect().unwrap();
}

#[test]
fn automatic_loop_never_touches_flow_ratios() {
    let (supervisor, _) = sim_supervisor(CONFIG, Duration::from_millis(5), 100.0);
    supervisor.connect().unwrap();

    let g1 = supervisor.read_flow_ratio(1).unwrap();
    let g2 = supervisor.read_flow_ratio(2).unwrap();

    supervisor.start_control().unwrap();
    thread::sleep(Duration::from_millis(500));
    supervisor.stop_control();

    // Ratios are an operator-only channel.
    assert_eq!(supervisor.read_flow_ratio(1), Some(g1));
    assert_eq!(supervisor.read_flow_ratio(2), Some(g2));

    // Operator writes still go through.
    supervisor.write_actuator(Actuator::Ratio2, 0.45).unwrap();
    assert_eq!(supervisor.read_flow_ratio(2), Some(0.45));

    supervisor.disconnect().unwrap();
}

#[test]
fn parameter_updates_mid_run_take_effect() {
    let (supervisor, _) = sim_supervisor(CONFIG, Duration::from_millis(5), 100.0);
    supervisor.connect().unwrap();
    supervisor.start_control().unwrap();
    thread::sleep(Duration::from_millis(300));

    // Retarget both loops while ticking.
    supervisor
        .apply_pid_params(1.5, 0.08, 0.0, 13.0, 13.5, 0.2)
        .unwrap();
    thread::sleep(Duration::from_secs(2));
    supervisor.stop_control();

    let h1 = supervisor.read_tank_level(1).unwrap();
    assert!(
        (13.0 - h1).abs() < 1.5,
        "tank 1 did not track the new setpoint: {h1}"
    );

    supervisor.disconnect().unwrap();
}
