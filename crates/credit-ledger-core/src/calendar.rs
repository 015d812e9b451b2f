//! Calendar-month arithmetic and the clock the ledger reads time from.
//!
//! Rollover and the anonymous quota are both keyed on the calendar month in a
//! configured reference timezone, never on elapsed wall-clock time.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::Tz;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Whether `a` and `b` fall in the same calendar month and year in `tz`.
#[must_use]
pub fn same_calendar_month(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    let a = a.with_timezone(&tz);
    let b = b.with_timezone(&tz);
    a.year() == b.year() && a.month() == b.month()
}

/// The first instant of the calendar month containing `now` in `tz`.
#[must_use]
pub fn month_start(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);

    // A zone whose DST switch happens at midnight has no 00:00 on that day.
    (0..3)
        .find_map(|hour| {
            tz.with_ymd_and_hms(local.year(), local.month(), 1, hour, 0, 0)
                .earliest()
        })
        .map_or(now, |start| start.with_timezone(&Utc))
}
