//! Wall-clock and elapsed-time checks evaluated once per polling tick.

use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use tokio::time::Instant;

/// Once-a-day rotation after a fixed local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    change_hour: u32,
}

impl DailySchedule {
    pub fn new(change_hour: u32) -> Self {
        Self {
            change_hour: change_hour.min(23),
        }
    }

    pub fn change_hour(&self) -> u32 {
        self.change_hour
    }

    /// A change is due if none ever happened, or if the change hour has
    /// passed today and the last change was on an earlier date.
    pub fn is_due(&self, last_change: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
        let Some(last) = last_change else {
            return true;
        };
        now.hour() >= self.change_hour && last.date() < now.date()
    }
}

/// Fires at most once per `interval`, measured from the last firing.
#[derive(Debug, Clone)]
pub struct Every {
    interval: Duration,
    last: Instant,
}

impl Every {
    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    /// Return `true` and restart the clock if `interval` has elapsed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}
