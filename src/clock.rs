use crate::offer::TimeStamp;
use chrono::{Duration, Utc};
use std::sync::Mutex;

/// Source of the current time, injected so expiry logic can be driven by tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<TimeStamp<Utc>>);

impl FixedClock {
    pub fn new(at: TimeStamp<Utc>) -> Self {
        Self(Mutex::new(at))
    }
    pub fn set(&self, at: TimeStamp<Utc>) {
        *self.lock() = at;
    }
    pub fn advance(&self, delta: Duration) {
        let mut guard = self.lock();
        *guard = guard.plus(delta);
    }
    fn lock(&self) -> std::sync::MutexGuard<'_, TimeStamp<Utc>> {
        // a poisoned guard still holds a valid timestamp
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> TimeStamp<Utc> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let start = TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start.clone());
        assert_eq!(clock.now(), start);

        clock.advance(Duration::hours(2));
        assert_eq!(start.millis_until(&clock.now()), 2 * 3_600_000);
    }
}
