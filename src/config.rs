use crate::error::ConfigError;
use crate::slot_clock::SlotClock;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;

pub const DEFAULT_CCH_INTERVAL_MS: u64 = 50;
pub const DEFAULT_SCH_INTERVAL_MS: u64 = 50;
// Annex H: sync tolerance (2ms) + max channel switch time (2ms)
pub const DEFAULT_GUARD_INTERVAL_MS: u64 = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 400;

const_assert!(DEFAULT_GUARD_INTERVAL_MS > 0);
const_assert!(DEFAULT_GUARD_INTERVAL_MS < DEFAULT_CCH_INTERVAL_MS);
const_assert!(DEFAULT_GUARD_INTERVAL_MS < DEFAULT_SCH_INTERVAL_MS);
const_assert!(1000 % (DEFAULT_CCH_INTERVAL_MS + DEFAULT_SCH_INTERVAL_MS) == 0);

/// Channel interval geometry shared by every device on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinationConfig {
    pub cch_interval_ms: u64,
    pub sch_interval_ms: u64,
    pub guard_interval_ms: u64,
}

impl CoordinationConfig {
    pub fn cch_interval(&self) -> Duration {
        Duration::from_millis(self.cch_interval_ms)
    }

    pub fn sch_interval(&self) -> Duration {
        Duration::from_millis(self.sch_interval_ms)
    }

    pub fn guard_interval(&self) -> Duration {
        Duration::from_millis(self.guard_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        SlotClock::from_config(self).validate()
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            cch_interval_ms: DEFAULT_CCH_INTERVAL_MS,
            sch_interval_ms: DEFAULT_SCH_INTERVAL_MS,
            guard_interval_ms: DEFAULT_GUARD_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub coordination: CoordinationConfig,
    /// Allow IPv4/IPv6 frames on the control channel
    pub ip_on_cch: bool,
    /// Maximum number of frames held per channel queue
    pub queue_capacity: usize,
}

impl DeviceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordination.validate()?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            coordination: CoordinationConfig::default(),
            ip_on_cch: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
