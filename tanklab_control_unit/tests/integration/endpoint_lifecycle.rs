//! Connection lifecycle through the facade.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::sim_supervisor;

#[test]
fn connect_failure_degrades_then_recovers() {
    let (supervisor, faults) = sim_supervisor("", Duration::from_millis(10), 1.0);
    faults.fail_connect.store(true, Ordering::SeqCst);

    assert!(supervisor.connect().is_err());
    assert!(!supervisor.is_connected());
    // Reads report absent, never a fabricated zero.
    assert_eq!(supervisor.read_tank_level(1), None);
    assert_eq!(supervisor.read_flow_ratio(1), None);
    assert_eq!(supervisor.phase_classification(), None);

    // The failed state is retryable.
    faults.fail_connect.store(false, Ordering::SeqCst);
    supervisor.connect().unwrap();
    assert!(supervisor.is_connected());
    assert!(supervisor.read_tank_level(1).is_some());

    supervisor.disconnect().unwrap();
}

#[test]
fn transport_faults_surface_as_absent_reads() {
    let (supervisor, faults) = sim_supervisor("", Duration::from_millis(10), 1.0);
    supervisor.connect().unwrap();
    assert!(supervisor.read_tank_level(2).is_some());

    faults.fail_reads.store(true, Ordering::SeqCst);
    assert_eq!(supervisor.read_tank_level(2), None);

    // Degraded, not dead: once the transport recovers, reads resume on the
    // same session.
    faults.fail_reads.store(false, Ordering::SeqCst);
    assert!(supervisor.read_tank_level(2).is_some());

    supervisor.disconnect().unwrap();
}

#[test]
fn subscriptions_survive_reconnect_cycle() {
    let (supervisor, _) = sim_supervisor(
        "[endpoint]\nsubscription_period_ms = 10\n",
        Duration::from_millis(5),
        1.0,
    );

    // Subscribing requires a session.
    assert!(!supervisor.enable_level_subscription());

    supervisor.connect().unwrap();
    assert!(supervisor.enable_level_subscription());

    // Disconnect tears the subscriptions down with the session.
    supervisor.disconnect().unwrap();
    assert!(!supervisor.is_connected());
    assert!(!supervisor.enable_level_subscription());

    // A fresh session accepts fresh subscriptions.
    supervisor.connect().unwrap();
    assert!(supervisor.enable_level_subscription());
    supervisor.disable_level_subscription();
    supervisor.disconnect().unwrap();
}

#[test]
fn connect_is_idempotent_through_facade() {
    let (supervisor, _) = sim_supervisor("", Duration::from_millis(10), 1.0);
    supervisor.connect().unwrap();
    supervisor.connect().unwrap();
    assert!(supervisor.is_connected());
    supervisor.disconnect().unwrap();
    // Disconnect leaves a reconnectable endpoint.
    supervisor.connect().unwrap();
    supervisor.disconnect().unwrap();
}
