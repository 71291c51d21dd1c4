//! Channel interval arithmetic.
//!
//! A sync interval is a CCH interval followed by an SCH interval, and each
//! of them begins with a guard interval:
//!
//! ```text
//! |<------------------ sync interval ------------------>|
//! |<------ CCH interval ----->|<----- SCH interval ----->|
//! | guard |      CCH slot     | guard |     SCH slot     |
//! 0       4                   50      54                 100 (ms, defaults)
//! ```
//!
//! All participants share a common time base, so the position inside the
//! sync interval is simply the current time modulo the sync interval length.

use crate::config::CoordinationConfig;
use crate::error::ConfigError;
use core::time::Duration;
use serde::{Deserialize, Serialize};

const ONE_SECOND_NANOS: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    Control,
    Service,
    Guard { in_control: bool },
}

impl Interval {
    pub fn is_control(self) -> bool {
        matches!(self, Interval::Control | Interval::Guard { in_control: true })
    }

    pub fn is_service(self) -> bool {
        matches!(self, Interval::Service | Interval::Guard { in_control: false })
    }

    pub fn is_guard(self) -> bool {
        matches!(self, Interval::Guard { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClock {
    cch_interval: Duration,
    sch_interval: Duration,
    guard_interval: Duration,
}

impl SlotClock {
    pub fn new(cch_interval: Duration, sch_interval: Duration, guard_interval: Duration) -> Self {
        Self {
            cch_interval,
            sch_interval,
            guard_interval,
        }
    }

    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::new(
            config.cch_interval(),
            config.sch_interval(),
            config.guard_interval(),
        )
    }

    pub fn cch_interval(&self) -> Duration {
        self.cch_interval
    }

    pub fn sch_interval(&self) -> Duration {
        self.sch_interval
    }

    pub fn guard_interval(&self) -> Duration {
        self.guard_interval
    }

    pub fn sync_interval(&self) -> Duration {
        self.cch_interval + self.sch_interval
    }

    /// Usable part of the CCH interval once the guard is over
    pub fn cch_slot(&self) -> Duration {
        self.cch_interval.saturating_sub(self.guard_interval)
    }

    pub fn sch_slot(&self) -> Duration {
        self.sch_interval.saturating_sub(self.guard_interval)
    }

    /// Check the interval geometry once at startup.
    ///
    /// Guard conditions are checked first so a zero-length sync interval can
    /// never reach the divisibility test. A zero guard is refused: every
    /// cycle must open with a guard interval the clock can observe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guard_interval.is_zero() {
            return Err(ConfigError::ZeroGuardInterval);
        }
        if self.cch_interval <= self.guard_interval {
            return Err(ConfigError::GuardNotShorterThanCch {
                guard: self.guard_interval,
                cch: self.cch_interval,
            });
        }
        if self.sch_interval <= self.guard_interval {
            return Err(ConfigError::GuardNotShorterThanSch {
                guard: self.guard_interval,
                sch: self.sch_interval,
            });
        }
        if ONE_SECOND_NANOS % self.sync_interval().as_nanos() != 0 {
            return Err(ConfigError::SyncIntervalNotDivisor(self.sync_interval()));
        }
        Ok(())
    }

    /// Offset of `now + duration` inside its sync interval
    pub fn interval_time(&self, now: Duration, duration: Duration) -> Duration {
        let sync = self.sync_interval().as_nanos();
        if sync == 0 {
            return Duration::ZERO;
        }
        let future = (now + duration).as_nanos();
        Duration::from_nanos((future % sync) as u64)
    }

    pub fn interval_at(&self, now: Duration, duration: Duration) -> Interval {
        let offset = self.interval_time(now, duration);
        let in_control = offset < self.cch_interval;
        let within_half = if in_control {
            offset
        } else {
            offset - self.cch_interval
        };

        if within_half < self.guard_interval {
            Interval::Guard { in_control }
        } else if in_control {
            Interval::Control
        } else {
            Interval::Service
        }
    }

    pub fn is_cch_interval(&self, now: Duration, duration: Duration) -> bool {
        self.interval_time(now, duration) < self.cch_interval
    }

    pub fn is_sch_interval(&self, now: Duration, duration: Duration) -> bool {
        !self.is_cch_interval(now, duration)
    }

    pub fn is_guard_interval(&self, now: Duration, duration: Duration) -> bool {
        self.interval_at(now, duration).is_guard()
    }

    /// Time left until the next CCH interval begins, zero inside one
    pub fn time_to_control(&self, now: Duration, duration: Duration) -> Duration {
        if self.is_cch_interval(now, duration) {
            return Duration::ZERO;
        }
        self.sync_interval() - self.interval_time(now, duration)
    }

    /// Time left until the next SCH interval begins, zero inside one
    pub fn time_to_service(&self, now: Duration, duration: Duration) -> Duration {
        if self.is_sch_interval(now, duration) {
            return Duration::ZERO;
        }
        self.cch_interval - self.interval_time(now, duration)
    }

    /// Time left until the next guard interval begins, zero inside one
    pub fn time_to_guard(&self, now: Duration, duration: Duration) -> Duration {
        if self.is_guard_interval(now, duration) {
            return Duration::ZERO;
        }
        if self.is_cch_interval(now, duration) {
            return self.cch_interval - self.interval_time(now, duration);
        }
        self.sync_interval() - self.interval_time(now, duration)
    }

    /// Guard time still to run when `now + duration` falls inside a guard
    pub fn remaining_guard(&self, now: Duration, duration: Duration) -> Option<Duration> {
        let offset = self.interval_time(now, duration);
        match self.interval_at(now, duration) {
            Interval::Guard { in_control: true } => Some(self.guard_interval - offset),
            Interval::Guard { in_control: false } => {
                Some(self.guard_interval - (offset - self.cch_interval))
            }
            _ => None,
        }
    }

    pub fn remaining_in_cycle(&self, now: Duration, duration: Duration) -> Duration {
        self.sync_interval() - self.interval_time(now, duration)
    }
}

impl Default for SlotClock {
    fn default() -> Self {
        Self::from_config(&CoordinationConfig::default())
    }
}
