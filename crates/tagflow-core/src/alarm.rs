//! Wakeups for the event loop
//!
//! When the next event lies in the physical future, the application asks an
//! `Alarm` for a `Wakeup` at that time and waits on it. A wakeup can be
//! cancelled from any thread, e.g. when a physical action arrives early.

use crate::time::{ManualClock, PhysicalClock, SystemClock, TimeValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Longest single sleep of `ThreadAlarm`, so cancellation is noticed promptly
const SLICE: Duration = Duration::from_millis(10);

/// A pending wakeup at a physical time
#[derive(Debug, Clone)]
pub struct Wakeup {
    at: TimeValue,
    cancelled: Arc<AtomicBool>,
}

impl Wakeup {
    /// Create a wakeup at `at`
    pub fn new(at: TimeValue) -> Self {
        Self {
            at,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Physical time of the wakeup
    pub fn at(&self) -> TimeValue {
        self.at
    }

    /// Cancel the wakeup; waiting on it returns immediately
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if the wakeup was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Timer facility used by the event loop
pub trait Alarm {
    /// Arm a wakeup at `at`
    fn schedule_wakeup(&mut self, at: TimeValue) -> Wakeup {
        Wakeup::new(at)
    }

    /// Block until `wakeup` is due or cancelled
    fn wait(&mut self, wakeup: &Wakeup);
}

/// Sleeps the calling thread against the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadAlarm {
    clock: SystemClock,
}

impl ThreadAlarm {
    /// Create an alarm on the system clock
    pub fn new() -> Self {
        Self::default()
    }
}

impl Alarm for ThreadAlarm {
    fn wait(&mut self, wakeup: &Wakeup) {
        loop {
            if wakeup.is_cancelled() {
                return;
            }
            let now = self.clock.now();
            if !now.is_earlier_than(wakeup.at()) {
                return;
            }
            std::thread::sleep(wakeup.at().difference(now).min(SLICE));
        }
    }
}

/// Advances a `ManualClock` instead of sleeping
///
/// Waiting on a wakeup moves the shared clock straight to its time, which
/// lets tests run real-time programs instantly and deterministically.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAlarm {
    clock: ManualClock,
}

impl SimulatedAlarm {
    /// Create an alarm driving `clock`
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

impl Alarm for SimulatedAlarm {
    fn wait(&mut self, wakeup: &Wakeup) {
        if !wakeup.is_cancelled() {
            self.clock.advance_to(wakeup.at());
        }
    }
}
