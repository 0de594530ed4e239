//! Mesh clock.
//!
//! Message deadlines and heartbeat schedules are absolute offsets on this
//! clock. Loops read it once per tick and compare against that snapshot.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock time since the Unix epoch, never moving backwards.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_micros: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        let previous = self.last_micros.fetch_max(wall, Ordering::AcqRel);
        Duration::from_micros(previous.max(wall))
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: Duration) {
        let mut current = self.now.lock();
        if now > *current {
            *current = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a > Duration::ZERO);
    }

    #[test]
    fn manual_clock_never_goes_back() {
        let clock = ManualClock::new(Duration::from_secs(10));
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(15));
        clock.set(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(15));
        clock.set(Duration::from_secs(20));
        assert_eq!(clock.now(), Duration::from_secs(20));
    }
}
