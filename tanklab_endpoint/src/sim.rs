//! Simulated quadruple-tank plant behind the transport seam.
//!
//! Stands in for the out-of-scope remote protocol stack: the binary and the
//! integration tests run the supervisory core against this transport
//! unchanged. The plant is the standard quadruple-tank model: two pumps,
//! two three-way flow splits γ1/γ2, tanks 3 and 4 draining into tanks 1
//! and 2. Tank temperatures relax toward ambient and are read-only process
//! values.
//!
//! A notification thread owned by the transport steps the model and
//! delivers change notifications through the sink installed at `open`,
//! which is exactly the threading shape of the production stack: callbacks
//! arrive off the caller's thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::tag::{ProcessVar, RATIO_COUNT, TANK_COUNT, VALVE_COUNT};
use crate::transport::{NotificationSink, PvTransport, RemoteAddr, SubId, TransportError};

/// Minimum value movement that produces a notification.
const DEADBAND: f64 = 1e-3;

/// Every process variable the simulated server exposes, in address order.
fn all_vars() -> [ProcessVar; TANK_COUNT * 2 + VALVE_COUNT + RATIO_COUNT] {
    [
        ProcessVar::TankLevel(1),
        ProcessVar::TankLevel(2),
        ProcessVar::TankLevel(3),
        ProcessVar::TankLevel(4),
        ProcessVar::TankTemperature(1),
        ProcessVar::TankTemperature(2),
        ProcessVar::TankTemperature(3),
        ProcessVar::TankTemperature(4),
        ProcessVar::ValveVoltage(1),
        ProcessVar::ValveVoltage(2),
        ProcessVar::FlowRatio(1),
        ProcessVar::FlowRatio(2),
    ]
}

// ─── Plant Model ────────────────────────────────────────────────────

/// Physical parameters of the simulated rig.
///
/// Defaults are the classic laboratory values (areas in cm², flows in
/// cm³/s, levels in cm, pump inputs 0..10 V).
#[derive(Debug, Clone)]
pub struct TankModelParams {
    /// Tank cross-sections [cm²].
    pub tank_area: [f64; TANK_COUNT],
    /// Outlet hole cross-sections [cm²].
    pub outlet_area: [f64; TANK_COUNT],
    /// Pump flow gains [cm³/(V·s)].
    pub pump_gain: [f64; VALVE_COUNT],
    /// Gravitational acceleration [cm/s²].
    pub gravity: f64,
    /// Ambient water temperature [°C].
    pub ambient_temp: f64,
    /// First-order temperature relaxation rate [1/s].
    pub temp_relax: f64,
    /// Initial tank levels [cm].
    pub initial_level: [f64; TANK_COUNT],
    /// Initial flow splits γ1, γ2.
    pub initial_gamma: [f64; RATIO_COUNT],
}

impl Default for TankModelParams {
    fn default() -> Self {
        Self {
            tank_area: [28.0, 32.0, 28.0, 32.0],
            outlet_area: [0.071, 0.057, 0.071, 0.057],
            pump_gain: [3.33, 3.35],
            gravity: 981.0,
            ambient_temp: 20.0,
            temp_relax: 0.01,
            initial_level: [12.4, 12.7, 1.8, 1.4],
            initial_gamma: [0.7, 0.6],
        }
    }
}

/// State of the simulated plant.
#[derive(Debug, Clone)]
pub struct TankModel {
    params: TankModelParams,
    levels: [f64; TANK_COUNT],
    temps: [f64; TANK_COUNT],
    valves: [f64; VALVE_COUNT],
    gammas: [f64; RATIO_COUNT],
}

impl TankModel {
    pub fn new(params: TankModelParams) -> Self {
        let levels = params.initial_level;
        let gammas = params.initial_gamma;
        let temps = [params.ambient_temp; TANK_COUNT];
        Self {
            params,
            levels,
            temps,
            valves: [0.0; VALVE_COUNT],
            gammas,
        }
    }

    /// Advance the plant by `dt` seconds (forward Euler).
    pub fn step(&mut self, dt: f64) {
        let p = &self.params;

        // Outflow of each tank through its drain hole [cm³/s].
        let mut v = [0.0; TANK_COUNT];
        for i in 0..TANK_COUNT {
            v[i] = p.outlet_area[i] * (2.0 * p.gravity * self.levels[i].max(0.0)).sqrt();
        }
        // Pump volumetric flows [cm³/s].
        let q1 = p.pump_gain[0] * self.valves[0];
        let q2 = p.pump_gain[1] * self.valves[1];

        let dh = [
            (-v[0] + v[2] + self.gammas[0] * q1) / p.tank_area[0],
            (-v[1] + v[3] + self.gammas[1] * q2) / p.tank_area[1],
            (-v[2] + (1.0 - self.gammas[1]) * q2) / p.tank_area[2],
            (-v[3] + (1.0 - self.gammas[0]) * q1) / p.tank_area[3],
        ];
        for i in 0..TANK_COUNT {
            self.levels[i] = (self.levels[i] + dh[i] * dt).max(0.0);
        }
        for i in 0..TANK_COUNT {
            self.temps[i] += p.temp_relax * (p.ambient_temp - self.temps[i]) * dt;
        }
    }

    /// Current value of one process variable.
    pub fn value(&self, var: ProcessVar) -> f64 {
        match var {
            ProcessVar::TankLevel(n) => self.levels[n as usize - 1],
            ProcessVar::TankTemperature(n) => self.temps[n as usize - 1],
            ProcessVar::ValveVoltage(n) => self.valves[n as usize - 1],
            ProcessVar::FlowRatio(n) => self.gammas[n as usize - 1],
        }
    }

    /// Write one process variable. Pump voltages clamp to 0..10 V, flow
    /// splits to 0..1; levels and temperatures are settable for test
    /// scenarios.
    pub fn set(&mut self, var: ProcessVar, value: f64) {
        match var {
            ProcessVar::TankLevel(n) => self.levels[n as usize - 1] = value.max(0.0),
            ProcessVar::TankTemperature(n) => self.temps[n as usize - 1] = value,
            ProcessVar::ValveVoltage(n) => {
                self.valves[n as usize - 1] = value.clamp(0.0, 10.0);
            }
            ProcessVar::FlowRatio(n) => {
                self.gammas[n as usize - 1] = value.clamp(0.0, 1.0);
            }
        }
    }
}

// ─── Transport ──────────────────────────────────────────────────────

/// Per-subscription sampling state.
struct SubEntry {
    addr: RemoteAddr,
    period: Duration,
    elapsed: Duration,
    last_sent: Option<f64>,
}

struct SimShared {
    model: Mutex<TankModel>,
    subs: Mutex<HashMap<u64, SubEntry>>,
    sink: Mutex<Option<NotificationSink>>,
    running: AtomicBool,
    next_sub: AtomicU64,
    fail_reads: Arc<AtomicBool>,
}

/// Fault-injection handles for lifecycle tests.
#[derive(Clone)]
pub struct SimFaults {
    /// When set, `open` fails with `Unreachable`.
    pub fail_connect: Arc<AtomicBool>,
    /// When set, every `read` fails with a transport I/O error.
    pub fail_reads: Arc<AtomicBool>,
}

/// In-process transport over a [`TankModel`].
pub struct SimTransport {
    shared: Arc<SimShared>,
    worker: Option<JoinHandle<()>>,
    fail_connect: Arc<AtomicBool>,
    /// Notification thread tick.
    tick: Duration,
    /// Plant seconds advanced per wall-clock second; > 1 accelerates the
    /// simulation for tests.
    time_scale: f64,
}

impl SimTransport {
    pub fn new(model: TankModel) -> Self {
        let fail_reads = Arc::new(AtomicBool::new(false));
        Self {
            shared: Arc::new(SimShared {
                model: Mutex::new(model),
                subs: Mutex::new(HashMap::new()),
                sink: Mutex::new(None),
                running: AtomicBool::new(false),
                next_sub: AtomicU64::new(0),
                fail_reads: Arc::clone(&fail_reads),
            }),
            worker: None,
            fail_connect: Arc::new(AtomicBool::new(false)),
            tick: Duration::from_millis(10),
            time_scale: 1.0,
        }
    }

    /// Override the notification tick and the plant time scale.
    pub fn with_timing(mut self, tick: Duration, time_scale: f64) -> Self {
        self.tick = tick;
        self.time_scale = time_scale;
        self
    }

    /// Handles for injecting connect/read faults.
    pub fn faults(&self) -> SimFaults {
        SimFaults {
            fail_connect: Arc::clone(&self.fail_connect),
            fail_reads: Arc::clone(&self.shared.fail_reads),
        }
    }

    fn stop_worker(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl PvTransport for SimTransport {
    fn open(
        &mut self,
        url: &str,
        _io_timeout: Duration,
        sink: NotificationSink,
    ) -> Result<(), TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(url.to_string()));
        }
        if self.worker.is_some() {
            return Ok(());
        }

        *self.shared.sink.lock() = Some(sink);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let tick = self.tick;
        let scale = self.time_scale;
        let handle = thread::Builder::new()
            .name("sim-notify".into())
            .spawn(move || notification_loop(&shared, tick, scale))
            .map_err(|e| TransportError::Io(format!("failed to spawn notify thread: {e}")))?;
        self.worker = Some(handle);
        debug!(url, "simulated tank server session open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stop_worker();
        *self.shared.sink.lock() = None;
        self.shared.subs.lock().clear();
        Ok(())
    }

    fn resolve(&mut self, path: &str) -> Result<RemoteAddr, TransportError> {
        all_vars()
            .iter()
            .position(|v| v.path() == path)
            .map(|idx| RemoteAddr(idx as u64))
            .ok_or_else(|| TransportError::UnknownPath(path.to_string()))
    }

    fn read(&mut self, addr: RemoteAddr) -> Result<f64, TransportError> {
        if self.shared.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::Io("injected read failure".into()));
        }
        let var = var_of(addr)?;
        Ok(self.shared.model.lock().value(var))
    }

    fn write(&mut self, addr: RemoteAddr, value: f64) -> Result<(), TransportError> {
        let var = var_of(addr)?;
        self.shared.model.lock().set(var, value);
        Ok(())
    }

    fn subscribe(&mut self, addr: RemoteAddr, period: Duration) -> Result<SubId, TransportError> {
        var_of(addr)?;
        let id = self.shared.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.subs.lock().insert(
            id,
            SubEntry {
                addr,
                period,
                elapsed: Duration::ZERO,
                last_sent: None,
            },
        );
        Ok(SubId(id))
    }

    fn unsubscribe(&mut self, sub: SubId) -> Result<(), TransportError> {
        self.shared.subs.lock().remove(&sub.0);
        Ok(())
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Notification thread body: step the plant, deliver due notifications.
fn notification_loop(shared: &SimShared, tick: Duration, scale: f64) {
    while shared.running.load(Ordering::SeqCst) {
        thread::sleep(tick);
        let dt = tick.as_secs_f64() * scale;
        shared.model.lock().step(dt);

        let Some(sink) = shared.sink.lock().clone() else {
            continue;
        };

        // Collect due notifications under the locks, fire outside them.
        let mut due: Vec<(SubId, f64)> = Vec::new();
        {
            let model = shared.model.lock();
            let mut subs = shared.subs.lock();
            for (id, sub) in subs.iter_mut() {
                sub.elapsed += tick;
                if sub.elapsed < sub.period {
                    continue;
                }
                sub.elapsed = Duration::ZERO;
                let Ok(var) = var_of(sub.addr) else { continue };
                let value = model.value(var);
                let changed = sub.last_sent.is_none_or(|prev| (value - prev).abs() > DEADBAND);
                if changed {
                    sub.last_sent = Some(value);
                    due.push((SubId(*id), value));
                }
            }
        }
        for (id, value) in due {
            sink(id, value);
        }
    }
}

fn var_of(addr: RemoteAddr) -> Result<ProcessVar, TransportError> {
    all_vars()
        .get(addr.0 as usize)
        .copied()
        .ok_or_else(|| TransportError::Io(format!("invalid remote address {}", addr.0)))
}

// ─── Tests ──────────────────────────────────────────────────────────
