//! Fixed-cadence control loop: read levels → compute PID → write valves.
//!
//! One tick thread, fixed period, no overlap by construction. A tick that
//! overruns its period causes the missed slots to be skipped, never queued,
//! so slow remote I/O cannot build an unbounded backlog of stale control
//! actions.
//!
//! The loop drives tank 1 with valve 1 and tank 2 with valve 2. Flow-ratio
//! actuators are an operator-only input channel and are never written here,
//! so the controller cannot fight manual phase-configuration changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::alarm::AlarmMonitor;
use crate::control::pid::{PidController, PidError};
use tanklab_endpoint::{
    EndpointError, ProcessVar, PvEndpoint, PvTransport, TANK_COUNT, Tag, VALVE_COUNT,
};

// ─── Error Type ─────────────────────────────────────────────────────

/// Scheduler lifecycle error.
#[derive(Debug)]
pub enum SchedulerError {
    /// `start` called while the tick thread is already running.
    AlreadyRunning,
    /// Tag registration against the endpoint failed.
    Endpoint(EndpointError),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "scheduler already running"),
            Self::Endpoint(e) => write!(f, "endpoint error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<EndpointError> for SchedulerError {
    fn from(e: EndpointError) -> Self {
        Self::Endpoint(e)
    }
}

// ─── Tick Statistics ────────────────────────────────────────────────

/// O(1) per-tick counters and timing, updated without allocation.
#[derive(Debug, Clone, Copy)]
pub struct TickStats {
    /// Ticks executed.
    pub ticks: u64,
    /// Tick slots skipped after an overrun.
    pub skipped: u64,
    /// Individual level reads that failed.
    pub read_failures: u64,
    /// Actuator writes that failed.
    pub write_failures: u64,
    /// Ticks where the control action was withheld because a control-tank
    /// read failed.
    pub control_skips: u64,
    /// Last tick duration [ns].
    pub last_tick_ns: i64,
    /// Minimum tick duration [ns].
    pub min_tick_ns: i64,
    /// Maximum tick duration [ns].
    pub max_tick_ns: i64,
}

impl TickStats {
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            skipped: 0,
            read_failures: 0,
            write_failures: 0,
            control_skips: 0,
            last_tick_ns: 0,
            min_tick_ns: i64::MAX,
            max_tick_ns: 0,
        }
    }

    /// Record one tick duration.
    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.ticks += 1;
        self.last_tick_ns = duration_ns;
        if duration_ns < self.min_tick_ns {
            self.min_tick_ns = duration_ns;
        }
        if duration_ns > self.max_tick_ns {
            self.max_tick_ns = duration_ns;
        }
    }
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

/// Shared pieces the tick thread works on.
struct TickContext<T: PvTransport> {
    endpoint: Arc<PvEndpoint<T>>,
    monitor: Arc<AlarmMonitor>,
    pids: [Arc<Mutex<PidController>>; VALVE_COUNT],
    level_tags: [Tag; TANK_COUNT],
    valve_tags: [Tag; VALVE_COUNT],
    stats: Arc<Mutex<TickStats>>,
}

impl<T: PvTransport> TickContext<T> {
    /// One tick: read all levels, feed the alarm table, drive both loops.
    fn tick(&self) {
        let mut levels: [Option<f64>; TANK_COUNT] = [None; TANK_COUNT];
        for (i, tag) in self.level_tags.iter().enumerate() {
            match self.endpoint.read(*tag) {
                Ok(level) => {
                    levels[i] = Some(level);
                    self.monitor.update_level((i + 1) as u8, level);
                }
                Err(e) => {
                    self.stats.lock().read_failures += 1;
                    warn!(tank = i + 1, error = %e, "level read failed");
                }
            }
        }

        // A partial or stale control action is worse than skipping one
        // cycle; the alarm table keeps its last known values meanwhile.
        let (Some(h1), Some(h2)) = (levels[0], levels[1]) else {
            self.stats.lock().control_skips += 1;
            return;
        };

        let outputs = [
            self.pids[0].lock().compute(h1),
            self.pids[1].lock().compute(h2),
        ];
        for (i, (tag, output)) in self.valve_tags.iter().zip(outputs).enumerate() {
            if let Err(e) = self.endpoint.write(*tag, output) {
                self.stats.lock().write_failures += 1;
                warn!(valve = i + 1, error = %e, "actuator write failed");
            }
        }
    }
}

/// Drives the two tank-level PID loops at a fixed cadence.
pub struct ControlLoopScheduler<T: PvTransport> {
    endpoint: Arc<PvEndpoint<T>>,
    monitor: Arc<AlarmMonitor>,
    pids: [Arc<Mutex<PidController>>; VALVE_COUNT],
    level_tags: [Tag; TANK_COUNT],
    valve_tags: [Tag; VALVE_COUNT],
    period: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<TickStats>>,
}

impl<T: PvTransport> ControlLoopScheduler<T> {
    /// Create a scheduler over `endpoint`, registering the tags it needs.
    pub fn new(
        endpoint: Arc<PvEndpoint<T>>,
        monitor: Arc<AlarmMonitor>,
        pid_h1: PidController,
        pid_h2: PidController,
        period: Duration,
    ) -> Result<Self, SchedulerError> {
        let level_tags = [
            endpoint.register(ProcessVar::TankLevel(1))?,
            endpoint.register(ProcessVar::TankLevel(2))?,
            endpoint.register(ProcessVar::TankLevel(3))?,
            endpoint.register(ProcessVar::TankLevel(4))?,
        ];
        let valve_tags = [
            endpoint.register(ProcessVar::ValveVoltage(1))?,
            endpoint.register(ProcessVar::ValveVoltage(2))?,
        ];
        Ok(Self {
            endpoint,
            monitor,
            pids: [
                Arc::new(Mutex::new(pid_h1)),
                Arc::new(Mutex::new(pid_h2)),
            ],
            level_tags,
            valve_tags,
            period,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            stats: Arc::new(Mutex::new(TickStats::new())),
        })
    }

    /// Start the tick thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let ctx = TickContext {
            endpoint: Arc::clone(&self.endpoint),
            monitor: Arc::clone(&self.monitor),
            pids: [Arc::clone(&self.pids[0]), Arc::clone(&self.pids[1])],
            level_tags: self.level_tags,
            valve_tags: self.valve_tags,
            stats: Arc::clone(&self.stats),
        };
        let running = Arc::clone(&self.running);
        let period = self.period;

        let handle = thread::spawn(move || run_loop(&ctx, period, &running));
        *self.handle.lock() = Some(handle);
        info!(period_ms = self.period.as_millis() as u64, "control loop started");
        Ok(())
    }

    /// Stop the tick thread and wait for it to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Whether the tick thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Update both controllers; each swap resets that controller's memory.
    ///
    /// Safe to call concurrently with an in-flight tick: each PID instance
    /// is serialized by its own lock.
    pub fn apply_params(
        &self,
        kp: f64,
        ki: f64,
        kd: f64,
        setpoint_h1: f64,
        setpoint_h2: f64,
        anti_windup_gain: f64,
    ) -> Result<(), PidError> {
        self.pids[0]
            .lock()
            .set_params(kp, ki, kd, setpoint_h1, anti_windup_gain)?;
        self.pids[1]
            .lock()
            .set_params(kp, ki, kd, setpoint_h2, anti_windup_gain)?;
        Ok(())
    }

    /// Copy of the tick statistics.
    pub fn stats(&self) -> TickStats {
        *self.stats.lock()
    }
}

impl<T: PvTransport> Drop for ControlLoopScheduler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tick loop body: fixed cadence, skip-late, re-check the running flag
/// after every sleep so `stop` takes effect within one period.
fn run_loop<T: PvTransport>(ctx: &TickContext<T>, period: Duration, running: &AtomicBool) {
    let mut next = Instant::now();
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < next {
            thread::sleep(next - now);
            continue;
        }

        let start = Instant::now();
        ctx.tick();
        let duration_ns = start.elapsed().as_nanos() as i64;
        ctx.stats.lock().record(duration_ns);

        next += period;
        let now = Instant::now();
        if next <= now {
            let mut missed: u64 = 0;
            while next <= now {
                next += period;
                missed += 1;
            }
            ctx.stats.lock().skipped += missed;
            warn!(missed, "tick overran its period, missed slots skipped");
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
