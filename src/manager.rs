use crate::channel::{
    channel_index, is_cch, is_sch, is_wave_channel, ChannelNumber, ChannelProfile, ChannelState,
    WaveDataRate, CHANNELS_OF_WAVE, WAVE_CHANNELS,
};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveChannel {
    pub number: ChannelNumber,
    pub profile: ChannelProfile,
    pub state: ChannelState,
}

impl WaveChannel {
    fn new(number: ChannelNumber) -> Self {
        Self {
            number,
            profile: ChannelProfile::default(),
            state: ChannelState::Dead,
        }
    }
}

/// Table of the seven WAVE channels and their access state.
///
/// Entries are stored in channel-number order rather than CCH-first so a
/// channel number maps straight to its slot. Every channel starts `Dead`;
/// only the channel scheduler changes states afterwards.
#[derive(Debug, Clone)]
pub struct ChannelManager {
    channels: Vec<WaveChannel, CHANNELS_OF_WAVE>,
}

impl ChannelManager {
    pub fn new() -> Self {
        let mut channels = Vec::new();
        for number in WAVE_CHANNELS {
            let pushed = channels.push(WaveChannel::new(number)).is_ok();
            debug_assert!(pushed, "channel table sized below the WAVE channel count");
        }
        Self { channels }
    }

    pub fn is_cch(channel: ChannelNumber) -> bool {
        is_cch(channel)
    }

    pub fn is_sch(channel: ChannelNumber) -> bool {
        is_sch(channel)
    }

    pub fn is_wave_channel(channel: ChannelNumber) -> bool {
        is_wave_channel(channel)
    }

    fn get(&self, channel: ChannelNumber) -> Option<&WaveChannel> {
        channel_index(channel).and_then(|index| self.channels.get(index))
    }

    pub fn state(&self, channel: ChannelNumber) -> Option<ChannelState> {
        self.get(channel).map(|c| c.state)
    }

    pub fn set_state(&mut self, channel: ChannelNumber, state: ChannelState) {
        match channel_index(channel).and_then(|index| self.channels.get_mut(index)) {
            Some(entry) => entry.state = state,
            None => warn!("ignoring state change of invalid channel {}", channel),
        }
    }

    pub fn is_channel_active(&self, channel: ChannelNumber) -> bool {
        self.state(channel) == Some(ChannelState::Active)
    }

    pub fn is_channel_inactive(&self, channel: ChannelNumber) -> bool {
        self.state(channel) == Some(ChannelState::Inactive)
    }

    /// Unknown channels count as dead: nothing can be sent on them
    pub fn is_channel_dead(&self, channel: ChannelNumber) -> bool {
        self.state(channel).map_or(true, |s| s == ChannelState::Dead)
    }

    pub fn profile(&self, channel: ChannelNumber) -> Option<ChannelProfile> {
        self.get(channel).map(|c| c.profile)
    }

    pub fn set_profile(&mut self, channel: ChannelNumber, profile: ChannelProfile) {
        if let Some(entry) = channel_index(channel).and_then(|index| self.channels.get_mut(index)) {
            entry.profile = profile;
        }
    }

    pub fn operating_class(&self, channel: ChannelNumber) -> Option<u8> {
        self.profile(channel).map(|p| p.operating_class)
    }

    pub fn is_adaptable(&self, channel: ChannelNumber) -> Option<bool> {
        self.profile(channel).map(|p| p.adaptable)
    }

    pub fn data_rate(&self, channel: ChannelNumber) -> Option<WaveDataRate> {
        self.profile(channel).map(|p| p.data_rate)
    }

    pub fn tx_power_level(&self, channel: ChannelNumber) -> Option<u8> {
        self.profile(channel).map(|p| p.tx_power_level)
    }

    pub fn channels(&self) -> impl Iterator<Item = &WaveChannel> {
        self.channels.iter()
    }

    /// Number of service channels currently holding an access grant
    pub fn granted_service_channels(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| is_sch(c.number) && c.state != ChannelState::Dead)
            .count()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
