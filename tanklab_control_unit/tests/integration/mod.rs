//! Shared helpers for the integration suite.

pub mod alarm_concurrency;
pub mod closed_loop;
pub mod endpoint_lifecycle;

use std::time::Duration;

use tanklab_control_unit::config::load_config_from_str;
use tanklab_control_unit::supervisor::Supervisor;
use tanklab_endpoint::sim::{SimFaults, SimTransport, TankModel, TankModelParams};

/// Build a supervisor over the simulated plant.
///
/// `time_scale` is plant seconds per wall-clock second; tests accelerate
/// the rig so level dynamics play out in a few seconds.
pub fn sim_supervisor(
    toml: &str,
    tick: Duration,
    time_scale: f64,
) -> (Supervisor<SimTransport>, SimFaults) {
    let config = load_config_from_str(toml).expect("test config invalid");
    let transport =
        SimTransport::new(TankModel::new(TankModelParams::default())).with_timing(tick, time_scale);
    let faults = transport.faults();
    let supervisor = Supervisor::new(transport, &config).expect("supervisor build failed");
    (supervisor, faults)
}
