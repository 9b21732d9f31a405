//! Facade consumed by the presentation layer.
//!
//! Wires the endpoint, the alarm model, and the scheduler together behind
//! the operations the dashboard needs: typed reads that distinguish
//! "absent" from a valid zero, actuator writes, PID parameter updates, the
//! alarm snapshot, and the level-subscription switch.
//!
//! Read accessors return `Option<f64>`: a failed remote read is logged and
//! surfaced as `None`, never as a fabricated value, so the display can show
//! the no-data path distinctly from a genuine zero reading.

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmMonitor, AlarmSnapshot, AlarmWorker, LevelSender, LevelUpdate};
use crate::config::SupervisorConfig;
use crate::control::pid::{PidController, PidError};
use crate::scheduler::{ControlLoopScheduler, SchedulerError, TickStats};
use tanklab_endpoint::{
    EndpointError, EndpointResult, ProcessVar, PvEndpoint, PvTransport, RATIO_COUNT,
    SubscriptionHandle, TANK_COUNT, Tag, VALVE_COUNT,
};

/// Pending level updates the alarm worker can buffer before notifications
/// are dropped in favor of fresher ones.
const ALARM_QUEUE_CAPACITY: usize = 64;

// ─── Error Type ─────────────────────────────────────────────────────

/// Supervisor construction/operation error.
#[derive(Debug)]
pub enum SupervisorError {
    /// PID parameter validation failed.
    Pid(PidError),
    /// Endpoint operation failed.
    Endpoint(EndpointError),
    /// Scheduler lifecycle error.
    Scheduler(SchedulerError),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pid(e) => write!(f, "pid error: {e}"),
            Self::Endpoint(e) => write!(f, "endpoint error: {e}"),
            Self::Scheduler(e) => write!(f, "scheduler error: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<PidError> for SupervisorError {
    fn from(e: PidError) -> Self {
        Self::Pid(e)
    }
}

impl From<EndpointError> for SupervisorError {
    fn from(e: EndpointError) -> Self {
        Self::Endpoint(e)
    }
}

impl From<SchedulerError> for SupervisorError {
    fn from(e: SchedulerError) -> Self {
        Self::Scheduler(e)
    }
}

// ─── Actuators ──────────────────────────────────────────────────────

/// Operator-writable actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    Valve1,
    Valve2,
    Ratio1,
    Ratio2,
}

impl Actuator {
    /// Wire name used by the presentation layer.
    pub fn name(self) -> &'static str {
        match self {
            Self::Valve1 => "valve1",
            Self::Valve2 => "valve2",
            Self::Ratio1 => "ratio1",
            Self::Ratio2 => "ratio2",
        }
    }

    fn var(self) -> ProcessVar {
        match self {
            Self::Valve1 => ProcessVar::ValveVoltage(1),
            Self::Valve2 => ProcessVar::ValveVoltage(2),
            Self::Ratio1 => ProcessVar::FlowRatio(1),
            Self::Ratio2 => ProcessVar::FlowRatio(2),
        }
    }
}

/// Parse error for actuator wire names.
#[derive(Debug)]
pub struct UnknownActuator(pub String);

impl std::fmt::Display for UnknownActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown actuator name: {} (expected valve1|valve2|ratio1|ratio2)",
            self.0
        )
    }
}

impl std::error::Error for UnknownActuator {}

impl FromStr for Actuator {
    type Err = UnknownActuator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valve1" => Ok(Self::Valve1),
            "valve2" => Ok(Self::Valve2),
            "ratio1" => Ok(Self::Ratio1),
            "ratio2" => Ok(Self::Ratio2),
            other => Err(UnknownActuator(other.to_string())),
        }
    }
}

/// Process-control phase classification from the flow splits.
///
/// Informational only: the supervisor never adjusts the ratios itself,
/// which phase to run in is an operator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// γ1 + γ2 > 1.
    Minimum,
    /// γ1 + γ2 < 1.
    NonMinimum,
    /// γ1 + γ2 = 1.
    Boundary,
}

// ─── Supervisor ─────────────────────────────────────────────────────

/// All tag handles the facade reads and writes.
struct SupervisorTags {
    levels: [Tag; TANK_COUNT],
    temps: [Tag; TANK_COUNT],
    valves: [Tag; VALVE_COUNT],
    ratios: [Tag; RATIO_COUNT],
}

/// Supervisory core over one process endpoint.
pub struct Supervisor<T: PvTransport> {
    endpoint: Arc<PvEndpoint<T>>,
    monitor: Arc<AlarmMonitor>,
    scheduler: ControlLoopScheduler<T>,
    worker: AlarmWorker,
    level_sender: LevelSender,
    level_subs: Mutex<Vec<SubscriptionHandle>>,
    tags: SupervisorTags,
}

impl<T: PvTransport> Supervisor<T> {
    /// Build the supervisor from a transport and a validated configuration.
    ///
    /// Registers every tag, seeds the alarm thresholds, spawns the alarm
    /// worker, and constructs both PID loops. No remote I/O happens until
    /// [`Supervisor::connect`].
    pub fn new(transport: T, config: &SupervisorConfig) -> Result<Self, SupervisorError> {
        let endpoint = Arc::new(PvEndpoint::new(transport, config.endpoint_config()));

        let tags = SupervisorTags {
            levels: [
                endpoint.register(ProcessVar::TankLevel(1))?,
                endpoint.register(ProcessVar::TankLevel(2))?,
                endpoint.register(ProcessVar::TankLevel(3))?,
                endpoint.register(ProcessVar::TankLevel(4))?,
            ],
            temps: [
                endpoint.register(ProcessVar::TankTemperature(1))?,
                endpoint.register(ProcessVar::TankTemperature(2))?,
                endpoint.register(ProcessVar::TankTemperature(3))?,
                endpoint.register(ProcessVar::TankTemperature(4))?,
            ],
            valves: [
                endpoint.register(ProcessVar::ValveVoltage(1))?,
                endpoint.register(ProcessVar::ValveVoltage(2))?,
            ],
            ratios: [
                endpoint.register(ProcessVar::FlowRatio(1))?,
                endpoint.register(ProcessVar::FlowRatio(2))?,
            ],
        };

        let monitor = Arc::new(AlarmMonitor::new());
        for (i, threshold) in config.thresholds().into_iter().enumerate() {
            monitor.set_threshold((i + 1) as u8, threshold);
        }
        let (level_sender, worker) =
            AlarmWorker::spawn(Arc::clone(&monitor), ALARM_QUEUE_CAPACITY);

        let pid_h1 = PidController::new(config.pid_settings(config.pid.setpoint_h1))?;
        let pid_h2 = PidController::new(config.pid_settings(config.pid.setpoint_h2))?;
        let scheduler = ControlLoopScheduler::new(
            Arc::clone(&endpoint),
            Arc::clone(&monitor),
            pid_h1,
            pid_h2,
            config.poll_period(),
        )?;

        Ok(Self {
            endpoint,
            monitor,
            scheduler,
            worker,
            level_sender,
            level_subs: Mutex::new(Vec::new()),
            tags,
        })
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Establish the session and resolve all tags.
    pub fn connect(&self) -> EndpointResult<()> {
        self.endpoint.connect()
    }

    /// Release subscriptions and close the session.
    pub fn disconnect(&self) -> EndpointResult<()> {
        self.disable_level_subscription();
        self.endpoint.disconnect()
    }

    /// Whether the endpoint currently holds an open session.
    pub fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    // ── Control loop ────────────────────────────────────────────────

    /// Start the fixed-cadence control loop.
    pub fn start_control(&self) -> Result<(), SupervisorError> {
        self.scheduler.start()?;
        Ok(())
    }

    /// Stop the control loop.
    pub fn stop_control(&self) {
        self.scheduler.stop();
    }

    /// Tick statistics of the control loop.
    pub fn control_stats(&self) -> TickStats {
        self.scheduler.stats()
    }

    /// Update both PID loops. Each controller's memory is reset by the
    /// swap; safe against an in-flight tick.
    pub fn apply_pid_params(
        &self,
        kp: f64,
        ki: f64,
        kd: f64,
        setpoint_h1: f64,
        setpoint_h2: f64,
        anti_windup_gain: f64,
    ) -> Result<(), SupervisorError> {
        self.scheduler
            .apply_params(kp, ki, kd, setpoint_h1, setpoint_h2, anti_windup_gain)?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Level of tank `id` (1..=4) [cm], `None` when unavailable.
    pub fn read_tank_level(&self, id: u8) -> Option<f64> {
        self.read_indexed(&self.tags.levels, id, "tank level")
    }

    /// Temperature of tank `id` (1..=4) [°C], `None` when unavailable.
    pub fn read_tank_temperature(&self, id: u8) -> Option<f64> {
        self.read_indexed(&self.tags.temps, id, "tank temperature")
    }

    /// Voltage of valve `id` (1..=2) [V], `None` when unavailable.
    pub fn read_valve_voltage(&self, id: u8) -> Option<f64> {
        self.read_indexed(&self.tags.valves, id, "valve voltage")
    }

    /// Flow split γ of ratio `id` (1..=2), `None` when unavailable.
    pub fn read_flow_ratio(&self, id: u8) -> Option<f64> {
        self.read_indexed(&self.tags.ratios, id, "flow ratio")
    }

    fn read_indexed(&self, tags: &[Tag], id: u8, what: &str) -> Option<f64> {
        let idx = id.checked_sub(1)? as usize;
        let tag = tags.get(idx)?;
        match self.endpoint.read(*tag) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(id, error = %e, "{what} read failed");
                None
            }
        }
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Write an operator actuator value.
    pub fn write_actuator(&self, actuator: Actuator, value: f64) -> EndpointResult<()> {
        let tag = match actuator {
            Actuator::Valve1 => self.tags.valves[0],
            Actuator::Valve2 => self.tags.valves[1],
            Actuator::Ratio1 => self.tags.ratios[0],
            Actuator::Ratio2 => self.tags.ratios[1],
        };
        debug!(actuator = actuator.name(), value, var = ?actuator.var(), "actuator write");
        self.endpoint.write(tag, value)
    }

    // ── Alarms ──────────────────────────────────────────────────────

    /// Consistent snapshot of levels, thresholds, and active flags.
    pub fn get_alarm_snapshot(&self) -> AlarmSnapshot {
        self.monitor.snapshot()
    }

    /// Replace all four thresholds; `None` disables a tank's alarm.
    pub fn set_alarm_thresholds(&self, thresholds: [Option<f64>; TANK_COUNT]) {
        for (i, threshold) in thresholds.into_iter().enumerate() {
            self.monitor.set_threshold((i + 1) as u8, threshold);
        }
    }

    /// Subscribe to level changes on all four tanks.
    ///
    /// Idempotent; returns whether the subscriptions are live. Each
    /// callback hands its update to the alarm worker through the bounded
    /// channel and returns immediately.
    pub fn enable_level_subscription(&self) -> bool {
        let mut subs = self.level_subs.lock();
        if !subs.is_empty() {
            return true;
        }
        for tank in 1..=TANK_COUNT as u8 {
            let tag = self.tags.levels[tank as usize - 1];
            let sender = self.level_sender.clone();
            match self.endpoint.subscribe(tag, move |level| {
                sender.send(LevelUpdate { tank, level });
            }) {
                Ok(handle) => subs.push(handle),
                Err(e) => {
                    warn!(tank, error = %e, "level subscription failed");
                    for handle in subs.drain(..) {
                        let _ = self.endpoint.unsubscribe(handle);
                    }
                    return false;
                }
            }
        }
        info!("level subscriptions enabled");
        true
    }

    /// Release the level subscriptions, if any.
    pub fn disable_level_subscription(&self) {
        let mut subs = self.level_subs.lock();
        for handle in subs.drain(..) {
            if let Err(e) = self.endpoint.unsubscribe(handle) {
                // A disconnect may already have drained them.
                debug!(error = %e, "level subscription already released");
            }
        }
    }

    // ── Phase ───────────────────────────────────────────────────────

    /// Classify the rig's phase from the current flow splits.
    pub fn phase_classification(&self) -> Option<Phase> {
        let g1 = self.read_flow_ratio(1)?;
        let g2 = self.read_flow_ratio(2)?;
        let sum = g1 + g2;
        Some(if sum < 1.0 {
            Phase::NonMinimum
        } else if sum > 1.0 {
            Phase::Minimum
        } else {
            Phase::Boundary
        })
    }

    /// Orderly shutdown: stop the loop, close the session, stop the alarm
    /// worker.
    pub fn shutdown(&mut self) {
        self.scheduler.stop();
        if let Err(e) = self.disconnect() {
            warn!(error = %e, "disconnect during shutdown failed");
        }
        self.worker.stop();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
