//! Clock

use std::{
    fmt::Debug,
    sync::{Mutex, PoisonError},
};

use jiff::{SignedDuration, Timestamp};

/// Source of the canonical current instant (UTC).
///
/// Every "is this event running" or "has this reservation expired" comparison
/// reads the time from here so it can be pinned in tests.
pub trait Clock: Debug + Send + Sync {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock pinned at `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Pin the clock at a new instant.
    pub fn set(&self, now: Timestamp) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move the clock forward (or backward, for a negative duration).
    ///
    /// # Errors
    ///
    /// Returns an error when the result falls outside the supported timestamp range.
    pub fn advance(&self, by: SignedDuration) -> Result<Timestamp, jiff::Error> {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);

        *now = now.checked_add(by)?;

        Ok(*now)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn manual_clock_advances() -> TestResult {
        let start = Timestamp::from_second(1_700_000_000)?;
        let clock = ManualClock::new(start);

        clock.advance(SignedDuration::from_secs(90))?;

        assert_eq!(
            clock.now(),
            Timestamp::from_second(1_700_000_090)?,
            "clock should move by exactly 90s"
        );

        Ok(())
    }

    #[test]
    fn manual_clock_can_be_repinned() -> TestResult {
        let clock = ManualClock::new(Timestamp::from_second(0)?);
        let later = Timestamp::from_second(42)?;

        clock.set(later);

        assert_eq!(clock.now(), later, "clock should report the pinned instant");

        Ok(())
    }
}
