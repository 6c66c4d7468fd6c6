//! Time sources and context version stamps

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
///
/// Useful for tests that assert on timestamps or version stamps.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    /// Set the clock to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Issues strictly increasing context versions
///
/// Versions track wall-clock milliseconds, but two stamps taken in the same
/// millisecond (or across a clock step backwards) still increase.
#[derive(Debug, Default)]
pub struct VersionStamper {
    last: AtomicI64,
}

impl VersionStamper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version for the given clock reading
    pub fn next(&self, clock: &dyn Clock) -> i64 {
        let now_ms = clock.now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Last version handed out, or 0
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stamps_follow_clock() {
        let clock = ManualClock::new(Utc.timestamp_millis_opt(1_000).unwrap());
        let stamper = VersionStamper::new();
        assert_eq!(stamper.next(&clock), 1_000);
        clock.advance(chrono::Duration::milliseconds(500));
        assert_eq!(stamper.next(&clock), 1_500);
    }

    #[test]
    fn test_stamps_strictly_increase_on_frozen_clock() {
        let clock = ManualClock::new(Utc.timestamp_millis_opt(1_000).unwrap());
        let stamper = VersionStamper::new();
        let a = stamper.next(&clock);
        let b = stamper.next(&clock);
        let c = stamper.next(&clock);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_stamps_survive_clock_going_backwards() {
        let clock = ManualClock::new(Utc.timestamp_millis_opt(5_000).unwrap());
        let stamper = VersionStamper::new();
        let a = stamper.next(&clock);
        clock.set(Utc.timestamp_millis_opt(1_000).unwrap());
        assert!(stamper.next(&clock) > a);
    }
}
