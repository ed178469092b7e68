//! Timestamp source used for inode times and segment ages.
//!
//! The original always reads `clock_gettime(CLOCK_REALTIME, ...)` directly (see
//! `utils::util::get_timestamp` in the teacher, which wraps `SystemTime::now()` the same
//! way). That is fine for the running system but makes the recovery and cleaner tests
//! unable to control "age" deterministically, so this crate gates it behind a trait.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of nanosecond timestamps.
pub trait Clock {
    /// Returns the current time as nanoseconds since the Unix epoch.
    fn now_ns(&self) -> u64;
}

/// The real wall clock, used by every binary outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before the epoch")
            .as_nanos() as u64
    }
}

/// A clock whose value is advanced explicitly, for deterministic tests.
#[derive(Debug, Default, Clone)]
pub struct FakeClock {
    now: std::cell::Cell<u64>,
}

impl FakeClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: std::cell::Cell::new(start_ns),
        }
    }

    pub fn advance(&self, delta_ns: u64) {
        self.now.set(self.now.get() + delta_ns);
    }
}

impl Clock for FakeClock {
    fn now_ns(&self) -> u64 {
        let v = self.now.get();
        self.now.set(v + 1);
        v
    }
}
