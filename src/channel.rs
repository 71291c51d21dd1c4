//! WAVE channel numbering and per-channel radio parameters.
//!
//! ```text
//! channel number   172   174   176   178   180   182   184
//! channel name     SCH1  SCH2  SCH3  CCH   SCH4  SCH5  SCH6
//! ```
//!
//! Only the seven 10MHz channels are modelled.

use core::time::Duration;
use serde::{Deserialize, Serialize};

pub type ChannelNumber = u32;

pub const SCH1: ChannelNumber = 172;
pub const SCH2: ChannelNumber = 174;
pub const SCH3: ChannelNumber = 176;
pub const CCH: ChannelNumber = 178;
pub const SCH4: ChannelNumber = 180;
pub const SCH5: ChannelNumber = 182;
pub const SCH6: ChannelNumber = 184;

pub const CHANNELS_OF_WAVE: usize = 7;

/// All WAVE channels ordered by channel number
pub const WAVE_CHANNELS: [ChannelNumber; CHANNELS_OF_WAVE] = [SCH1, SCH2, SCH3, CCH, SCH4, SCH5, SCH6];

pub const DEFAULT_OPERATING_CLASS: u8 = 17;
pub const DEFAULT_TX_POWER_LEVEL: u8 = 4;
/// Highest valid transmit power level
pub const MAX_TX_POWER_LEVEL: u8 = 7;

pub fn is_wave_channel(channel: ChannelNumber) -> bool {
    (SCH1..=SCH6).contains(&channel) && channel % 2 == 0
}

pub fn is_cch(channel: ChannelNumber) -> bool {
    channel == CCH
}

pub fn is_sch(channel: ChannelNumber) -> bool {
    is_wave_channel(channel) && channel != CCH
}

/// Position of a channel inside [`WAVE_CHANNELS`]
pub fn channel_index(channel: ChannelNumber) -> Option<usize> {
    if is_wave_channel(channel) {
        Some(((channel - SCH1) / 2) as usize)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRole {
    Control,
    Service,
}

impl ChannelRole {
    pub fn of(channel: ChannelNumber) -> Option<Self> {
        if is_cch(channel) {
            Some(ChannelRole::Control)
        } else if is_sch(channel) {
            Some(ChannelRole::Service)
        } else {
            None
        }
    }
}

/// Channel access assignment state.
///
/// * `Dead` - no access assigned, frames can neither be sent nor received.
/// * `Active` - access assigned and the radio is (or is about to be) tuned to it.
/// * `Inactive` - access assigned for the next channel interval only. Frames
///   are queued but wait until the coordinator hands the interval over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Dead,
    Active,
    Inactive,
}

/// OFDM data rates of a 10MHz WAVE channel, slowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WaveDataRate {
    Ofdm3M,
    Ofdm4_5M,
    Ofdm6M,
    Ofdm9M,
    Ofdm12M,
    Ofdm18M,
    Ofdm24M,
    Ofdm27M,
}

impl WaveDataRate {
    pub fn kbps(self) -> u32 {
        match self {
            WaveDataRate::Ofdm3M => 3_000,
            WaveDataRate::Ofdm4_5M => 4_500,
            WaveDataRate::Ofdm6M => 6_000,
            WaveDataRate::Ofdm9M => 9_000,
            WaveDataRate::Ofdm12M => 12_000,
            WaveDataRate::Ofdm18M => 18_000,
            WaveDataRate::Ofdm24M => 24_000,
            WaveDataRate::Ofdm27M => 27_000,
        }
    }

    /// Time on air of `bytes` at this rate, preamble excluded
    pub fn airtime(self, bytes: usize) -> Duration {
        let bits = bytes as u64 * 8;
        Duration::from_nanos(bits * 1_000_000 / u64::from(self.kbps()))
    }
}

/// Static radio parameters used when management frames are sent on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProfile {
    pub operating_class: u8,
    pub adaptable: bool,
    pub data_rate: WaveDataRate,
    pub tx_power_level: u8,
}

impl Default for ChannelProfile {
    fn default() -> Self {
        Self {
            operating_class: DEFAULT_OPERATING_CLASS,
            adaptable: true,
            data_rate: WaveDataRate::Ofdm6M,
            tx_power_level: DEFAULT_TX_POWER_LEVEL,
        }
    }
}
