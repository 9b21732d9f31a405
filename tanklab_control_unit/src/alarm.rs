//! Low-level alarm model for the four tanks.
//!
//! The authoritative view of "is tank n below its critical threshold" lives
//! in one table behind one lock. Both update paths write through the same
//! [`AlarmMonitor`] methods: the scheduler's poll path and the endpoint's
//! subscription callbacks (via the [`AlarmWorker`]). Updates overwrite the
//! last level and recompute the active flag from the threshold in effect,
//! so poll- and subscription-driven updates for the same tank commute.
//!
//! Subscription callbacks run on the endpoint's notification thread and
//! must not block. [`LevelSender::send`] is the non-blocking handoff: it
//! pushes into a bounded channel drained by one long-lived worker thread
//! that applies updates serially, preserving per-subscription ordering and
//! avoiding thread creation under notification bursts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use tanklab_endpoint::TANK_COUNT;

// ─── Table ──────────────────────────────────────────────────────────

/// Alarm state of one monitored tank.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmEntry {
    /// Critical low-level threshold [cm]. `None` disables the alarm.
    pub threshold: Option<f64>,
    /// Most recent level update [cm]. `None` until the first update.
    pub last_level: Option<f64>,
    /// `last_level < threshold`, false whenever either side is unset.
    pub active: bool,
}

/// Consistent point-in-time copy of the whole table.
///
/// Taken under a single lock acquisition: a level and its active flag are
/// always from the same instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmSnapshot {
    /// Last known level per tank (index 0 = tank 1).
    pub levels: [Option<f64>; TANK_COUNT],
    /// Configured threshold per tank.
    pub thresholds: [Option<f64>; TANK_COUNT],
    /// Active alarm flag per tank.
    pub active: [bool; TANK_COUNT],
}

impl AlarmSnapshot {
    /// Whether any tank currently alarms.
    pub fn any_active(&self) -> bool {
        self.active.iter().any(|a| *a)
    }
}

/// Thread-safe alarm table for the four tanks.
pub struct AlarmMonitor {
    table: Mutex<[AlarmEntry; TANK_COUNT]>,
}

impl AlarmMonitor {
    pub fn new() -> Self {
        Self {
            table: Mutex::new([AlarmEntry::default(); TANK_COUNT]),
        }
    }

    /// Set or clear the threshold of one tank.
    ///
    /// Setting a threshold does not retroactively recompute the active
    /// flag; the next level update does. Clearing the threshold clears the
    /// flag immediately (no threshold, no alarm).
    pub fn set_threshold(&self, tank: u8, threshold: Option<f64>) {
        let Some(slot) = Self::slot(tank) else { return };
        let mut table = self.table.lock();
        table[slot].threshold = threshold;
        if threshold.is_none() {
            table[slot].active = false;
        }
    }

    /// Record a new level for one tank and recompute its alarm flag.
    ///
    /// Called from the scheduler's poll path and from the alarm worker.
    pub fn update_level(&self, tank: u8, level: f64) {
        let Some(slot) = Self::slot(tank) else { return };
        let mut table = self.table.lock();
        let entry = &mut table[slot];
        entry.last_level = Some(level);
        entry.active = match entry.threshold {
            Some(threshold) => level < threshold,
            None => false,
        };
    }

    /// Consistent copy of levels, thresholds, and active flags.
    pub fn snapshot(&self) -> AlarmSnapshot {
        let table = self.table.lock();
        let mut snap = AlarmSnapshot::default();
        for (i, entry) in table.iter().enumerate() {
            snap.levels[i] = entry.last_level;
            snap.thresholds[i] = entry.threshold;
            snap.active[i] = entry.active;
        }
        snap
    }

    /// 0-based table slot for a 1-based tank id.
    fn slot(tank: u8) -> Option<usize> {
        if (1..=TANK_COUNT as u8).contains(&tank) {
            Some(tank as usize - 1)
        } else {
            warn!(tank, "level update for unknown tank ignored");
            None
        }
    }
}

impl Default for AlarmMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Subscription Worker ────────────────────────────────────────────

/// One level update handed from a subscription callback to the worker.
#[derive(Debug, Clone, Copy)]
pub struct LevelUpdate {
    /// Tank id (1-based).
    pub tank: u8,
    /// Reported level [cm].
    pub level: f64,
}

/// Non-blocking producer half of the worker channel.
///
/// Safe to call from the endpoint's notification thread: a full channel
/// drops the update (the next notification carries a fresher value anyway)
/// and counts the drop.
#[derive(Clone)]
pub struct LevelSender {
    tx: SyncSender<LevelUpdate>,
    dropped: Arc<AtomicU64>,
}

impl LevelSender {
    /// Enqueue an update without blocking.
    pub fn send(&self, update: LevelUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(tank = update.tank, "alarm channel full, level update dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(tank = update.tank, "alarm worker gone, level update dropped");
            }
        }
    }

    /// Number of updates dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Long-lived worker applying queued level updates to the monitor.
pub struct AlarmWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlarmWorker {
    /// Spawn the worker thread with a channel of `capacity` pending updates.
    pub fn spawn(monitor: Arc<AlarmMonitor>, capacity: usize) -> (LevelSender, AlarmWorker) {
        let (tx, rx) = mpsc::sync_channel::<LevelUpdate>(capacity);
        let running = Arc::new(AtomicBool::new(true));

        let worker_running = Arc::clone(&running);
        let handle = thread::spawn(move || {
            while worker_running.load(Ordering::Relaxed) {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(update) => monitor.update_level(update.tank, update.level),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let sender = LevelSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (
            sender,
            AlarmWorker {
                running,
                handle: Some(handle),
            },
        )
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AlarmWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn threshold_crossing_sequence() {
        // threshold 10.0, levels [12.0, 9.5, 11.0] → [false, true, false]
        let monitor = AlarmMonitor::new();
        monitor.set_threshold(1, Some(10.0));

        let mut observed = Vec::new();
        for level in [12.0, 9.5, 11.0] {
            monitor.update_level(1, level);
            observed.push(monitor.snapshot().active[0]);
        }
        assert_eq!(observed, [false, true, false]);
    }

    #[test]
    fn active_false_while_either_side_unset() {
        let monitor = AlarmMonitor::new();
        // Level without threshold.
        monitor.update_level(2, 3.0);
        assert!(!monitor.snapshot().active[1]);
        // Threshold without level.
        monitor.set_threshold(3, Some(10.0));
        assert!(!monitor.snapshot().active[2]);
    }

    #[test]
    fn set_threshold_defers_recompute_to_next_update() {
        let monitor = AlarmMonitor::new();
        monitor.set_threshold(1, Some(10.0));
        monitor.update_level(1, 8.0);
        assert!(monitor.snapshot().active[0]);

        // Raising the threshold above the level does not fire eagerly...
        monitor.set_threshold(1, Some(5.0));
        assert!(monitor.snapshot().active[0]);
        // ...the next level update recomputes.
        monitor.update_level(1, 8.0);
        assert!(!monitor.snapshot().active[0]);
    }

    #[test]
    fn clearing_threshold_clears_alarm() {
        let monitor = AlarmMonitor::new();
        monitor.set_threshold(4, Some(10.0));
        monitor.update_level(4, 2.0);
        assert!(monitor.snapshot().active[3]);

        monitor.set_threshold(4, None);
        let snap = monitor.snapshot();
        assert!(!snap.active[3]);
        assert_eq!(snap.thresholds[3], None);
        assert_eq!(snap.levels[3], Some(2.0));
    }

    #[test]
    fn updates_commute() {
        // Poll and subscription paths both just overwrite the level; the
        // last writer wins regardless of order.
        let a = AlarmMonitor::new();
        let b = AlarmMonitor::new();
        for m in [&a, &b] {
            m.set_threshold(1, Some(10.0));
        }
        a.update_level(1, 12.0);
        a.update_level(1, 9.0);
        b.update_level(1, 9.0);
        b.update_level(1, 9.0);
        a.update_level(1, 9.0);
        assert_eq!(a.snapshot().active[0], b.snapshot().active[0]);
        assert_eq!(a.snapshot().levels[0], b.snapshot().levels[0]);
    }

    #[test]
    fn out_of_range_tank_ignored() {
        let monitor = AlarmMonitor::new();
        monitor.update_level(0, 1.0);
        monitor.update_level(5, 1.0);
        let snap = monitor.snapshot();
        assert!(snap.levels.iter().all(|l| l.is_none()));
    }

    #[test]
    fn worker_applies_queued_updates() {
        let monitor = Arc::new(AlarmMonitor::new());
        monitor.set_threshold(2, Some(10.0));
        let (sender, mut worker) = AlarmWorker::spawn(Arc::clone(&monitor), 16);

        sender.send(LevelUpdate { tank: 2, level: 7.5 });

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let snap = monitor.snapshot();
            if snap.levels[1] == Some(7.5) {
                assert!(snap.active[1]);
                break;
            }
            assert!(Instant::now() < deadline, "worker never applied the update");
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
    }

    #[test]
    fn full_channel_drops_and_counts() {
        // Channel with no consumer: capacity 1, second send must drop.
        let (tx, _rx) = mpsc::sync_channel(1);
        let sender = LevelSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        sender.send(LevelUpdate { tank: 1, level: 1.0 });
        sender.send(LevelUpdate { tank: 1, level: 2.0 });
        assert_eq!(sender.dropped(), 1);
    }
}
