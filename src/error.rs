use core::time::Duration;
use thiserror::Error;

/// Errors that abort device initialization.
///
/// Runtime arbitration never produces these; access requests report their
/// outcome as a plain `bool`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("guard interval must be longer than zero")]
    ZeroGuardInterval,

    #[error("guard interval {guard:?} must be shorter than the CCH interval {cch:?}")]
    GuardNotShorterThanCch { guard: Duration, cch: Duration },

    #[error("guard interval {guard:?} must be shorter than the SCH interval {sch:?}")]
    GuardNotShorterThanSch { guard: Duration, sch: Duration },

    #[error("every UTC second shall be an integer number of sync intervals, got {0:?}")]
    SyncIntervalNotDivisor(Duration),

    #[error("channel coordination must start at a CCH guard boundary, current cycle offset is {0:?}")]
    NotAtCycleStart(Duration),

    #[error("queue capacity must be at least one frame")]
    ZeroQueueCapacity,

    #[error("invalid configuration document: {0}")]
    Parse(String),

    #[error("cannot read configuration file: {0}")]
    Io(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}
