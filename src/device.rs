//! WAVE device: the coordinator and channel scheduler of one radio wired
//! together, plus the higher-layer send paths that sit on top of them.

use crate::channel::{
    is_cch, is_wave_channel, ChannelNumber, ChannelState, WaveDataRate, MAX_TX_POWER_LEVEL,
};
use crate::config::DeviceConfig;
use crate::coordinator::{ChannelCoordinator, CoordinatorStats, ListenerId, SharedListener};
use crate::error::ConfigError;
use crate::event::WaveEvent;
use crate::mac::{MacLink, QueueStats, Radio, TxParameters, WaveFrame};
use crate::scheduler::{AccessKind, AccessMode, AccessRequest, AccessStats, ChannelScheduler};
use crate::sim::Timers;
use crate::slot_clock::SlotClock;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell};
use std::rc::Rc;
use tracing::{debug, info, warn};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
pub const ETHERTYPE_WSMP: u16 = 0x88dc;

/// Highest user priority a frame may carry
pub const MAX_PRIORITY: u8 = 7;

fn is_ip(protocol: u16) -> bool {
    protocol == ETHERTYPE_IPV4 || protocol == ETHERTYPE_IPV6
}

/// Start-SCH request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchInfo {
    pub channel: ChannelNumber,
    pub immediate: bool,
    /// 0 alternating, 0xff continuous, anything else the extension count
    pub extended_access: u8,
}

impl SchInfo {
    pub fn new(channel: ChannelNumber, immediate: bool, extended_access: u8) -> Self {
        Self {
            channel,
            immediate,
            extended_access,
        }
    }
}

/// Per-frame parameters of a WSMP send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub channel: ChannelNumber,
    pub priority: u8,
    pub data_rate: Option<WaveDataRate>,
    pub tx_power_level: Option<u8>,
}

impl TxInfo {
    pub fn new(channel: ChannelNumber) -> Self {
        Self {
            channel,
            priority: 0,
            data_rate: None,
            tx_power_level: None,
        }
    }
}

/// Transmit profile applied to every IP frame handed to [`WaveDevice::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxProfile {
    pub channel: ChannelNumber,
    pub adaptable: bool,
    pub tx_power_level: u8,
    pub data_rate: WaveDataRate,
}

impl TxProfile {
    pub fn new(channel: ChannelNumber) -> Self {
        Self {
            channel,
            adaptable: false,
            tx_power_level: MAX_TX_POWER_LEVEL,
            data_rate: WaveDataRate::Ofdm6M,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: ChannelNumber,
    pub state: ChannelState,
    pub queued: usize,
}

/// Point-in-time view of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub time_ms: u64,
    pub coordinating: bool,
    pub access: AccessKind,
    pub granted_channel: Option<ChannelNumber>,
    pub extends: Option<u8>,
    pub pending_request: Option<AccessRequest>,
    pub radio_channel: ChannelNumber,
    pub channels: Vec<ChannelStatus>,
    pub coordinator: CoordinatorStats,
    pub access_stats: AccessStats,
    pub queue_stats: QueueStats,
}

pub struct WaveDevice {
    config: DeviceConfig,
    coordinator: ChannelCoordinator,
    scheduler: Rc<RefCell<ChannelScheduler>>,
    scheduler_listener: Option<ListenerId>,
    tx_profile: Option<TxProfile>,
}

impl WaveDevice {
    pub fn new(
        config: DeviceConfig,
        radio: Box<dyn Radio>,
        mac: Box<dyn MacLink>,
    ) -> Result<Self, ConfigError> {
        if let Err(e) = config.validate() {
            warn!("rejecting device configuration: {}", e);
            return Err(e);
        }
        let clock = SlotClock::from_config(&config.coordination);
        let scheduler = ChannelScheduler::new(radio, mac, config.queue_capacity);
        Ok(Self {
            config,
            coordinator: ChannelCoordinator::new(clock),
            scheduler: Rc::new(RefCell::new(scheduler)),
            scheduler_listener: None,
            tx_profile: None,
        })
    }

    /// Hook the scheduler to the coordinator and start coordination.
    /// Must run on a sync interval boundary.
    pub fn initialize(&mut self, timers: &mut dyn Timers<WaveEvent>) -> Result<(), ConfigError> {
        if self.scheduler_listener.is_none() {
            let listener: SharedListener = self.scheduler.clone();
            self.scheduler_listener = Some(self.coordinator.register_listener(listener, timers.now()));
        }
        self.coordinator.start(timers)?;
        info!("WAVE device initialized at {:?}", timers.now());
        Ok(())
    }

    /// Stop coordination, drop any access assignment and every listener
    pub fn dispose(&mut self, timers: &mut dyn Timers<WaveEvent>) {
        self.coordinator.stop(timers);
        {
            let mut scheduler = self.scheduler.borrow_mut();
            if let Some(channel) = scheduler.channel().or(scheduler.pending_request().map(|r| r.channel)) {
                scheduler.release(channel, timers);
            }
        }
        self.coordinator.unregister_all();
        self.scheduler_listener = None;
        self.tx_profile = None;
        info!("WAVE device disposed at {:?}", timers.now());
    }

    /// Dispatch a timer event armed by this device
    pub fn handle_event(&mut self, event: WaveEvent, timers: &mut dyn Timers<WaveEvent>) {
        match event {
            WaveEvent::SlotBoundary => self.coordinator.handle_boundary(timers),
            WaveEvent::RetryAccess(request) => {
                self.scheduler
                    .borrow_mut()
                    .retry(request, self.coordinator.clock(), timers);
            }
            WaveEvent::AccessExpired(channel) => {
                self.scheduler.borrow_mut().expire(channel, timers);
            }
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn clock(&self) -> &SlotClock {
        self.coordinator.clock()
    }

    pub fn coordinator(&self) -> &ChannelCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> Ref<'_, ChannelScheduler> {
        self.scheduler.borrow()
    }

    pub fn register_listener(&mut self, listener: SharedListener, now: Duration) -> ListenerId {
        self.coordinator.register_listener(listener, now)
    }

    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        self.coordinator.unregister_listener(id)
    }

    pub fn start_sch(&mut self, info: &SchInfo, timers: &mut dyn Timers<WaveEvent>) -> bool {
        if !is_wave_channel(info.channel) {
            debug!("start SCH rejected, {} is not a WAVE channel", info.channel);
            return false;
        }
        let request = AccessRequest::new(
            info.channel,
            AccessMode::from_extended_access(info.extended_access),
            info.immediate,
        );
        self.scheduler
            .borrow_mut()
            .request(request, self.coordinator.clock(), timers)
    }

    pub fn stop_sch(&mut self, channel: ChannelNumber, timers: &mut dyn Timers<WaveEvent>) {
        if !is_wave_channel(channel) {
            debug!("stop SCH ignored, {} is not a WAVE channel", channel);
            return;
        }
        self.scheduler.borrow_mut().release(channel, timers);
    }

    pub fn register_tx_profile(&mut self, profile: TxProfile) -> bool {
        if !is_wave_channel(profile.channel) {
            debug!("tx profile rejected, {} is not a WAVE channel", profile.channel);
            return false;
        }
        if self.tx_profile.is_some() {
            debug!("tx profile rejected, one is already registered");
            return false;
        }
        if is_cch(profile.channel) && !self.config.ip_on_cch {
            debug!("tx profile rejected, IP traffic is not allowed on the CCH");
            return false;
        }
        if profile.tx_power_level > MAX_TX_POWER_LEVEL {
            debug!("tx profile rejected, power level {} out of range", profile.tx_power_level);
            return false;
        }
        self.tx_profile = Some(profile);
        true
    }

    pub fn unregister_tx_profile(&mut self, channel: ChannelNumber) -> bool {
        match self.tx_profile {
            Some(profile) if profile.channel == channel => {
                self.tx_profile = None;
                true
            }
            _ => false,
        }
    }

    pub fn tx_profile(&self) -> Option<TxProfile> {
        self.tx_profile
    }

    /// Queue a WSMP (or other non-IP) frame on an explicitly chosen channel
    pub fn send_x(&mut self, payload: Vec<u8>, protocol: u16, info: &TxInfo) -> bool {
        if !is_wave_channel(info.channel) {
            debug!("send rejected, {} is not a WAVE channel", info.channel);
            return false;
        }
        if self.scheduler.borrow().manager().is_channel_dead(info.channel) {
            debug!("send rejected, no access assigned for channel {}", info.channel);
            return false;
        }
        if info.priority > MAX_PRIORITY {
            debug!("send rejected, priority {} out of range", info.priority);
            return false;
        }
        if is_ip(protocol) && is_cch(info.channel) && !self.config.ip_on_cch {
            debug!("send rejected, IP traffic is not allowed on the CCH");
            return false;
        }

        let tx_parameters = match (info.data_rate, info.tx_power_level) {
            (Some(_), Some(level)) if level > MAX_TX_POWER_LEVEL => {
                debug!("send rejected, power level {} out of range", level);
                return false;
            }
            (Some(data_rate), Some(tx_power_level)) => Some(TxParameters {
                data_rate,
                tx_power_level,
                adaptable: false,
            }),
            _ => None,
        };

        let frame = WaveFrame {
            channel: info.channel,
            priority: info.priority,
            protocol,
            payload,
            tx_parameters,
        };
        self.scheduler.borrow_mut().enqueue(frame)
    }

    /// Queue an IP frame according to the registered tx profile
    pub fn send(&mut self, payload: Vec<u8>, protocol: u16) -> bool {
        if !is_ip(protocol) {
            debug!("send rejected, protocol {:#06x} is not IP", protocol);
            return false;
        }
        let profile = match self.tx_profile {
            Some(profile) => profile,
            None => {
                debug!("send rejected, no tx profile registered");
                return false;
            }
        };
        if self.scheduler.borrow().manager().is_channel_dead(profile.channel) {
            debug!("send rejected, no access assigned for channel {}", profile.channel);
            return false;
        }

        let mut frame = WaveFrame::new(profile.channel, protocol, payload);
        frame.tx_parameters = Some(TxParameters {
            data_rate: profile.data_rate,
            tx_power_level: profile.tx_power_level,
            adaptable: profile.adaptable,
        });
        self.scheduler.borrow_mut().enqueue(frame)
    }

    /// Frame the MAC should transmit next, if the active channel is usable
    pub fn next_frame(&mut self) -> Option<WaveFrame> {
        let mut scheduler = self.scheduler.borrow_mut();
        let active = scheduler.queues().active_channel();
        if !scheduler.manager().is_channel_active(active) {
            return None;
        }
        scheduler.queues_mut().begin_service().cloned()
    }

    /// The frame returned by [`WaveDevice::next_frame`] went out
    pub fn confirm_sent(&mut self) -> Option<WaveFrame> {
        self.scheduler.borrow_mut().queues_mut().complete_service()
    }

    /// Whether a transmission lasting `tx_time` may start at `now`
    pub fn can_transmit(&self, tx_time: Duration, now: Duration) -> bool {
        self.scheduler
            .borrow()
            .permits_transmission(tx_time, self.coordinator.clock(), now)
    }

    /// Under alternating access nothing received during a guard interval is
    /// delivered: the radio may still be switching.
    pub fn accept_received(&self, now: Duration) -> bool {
        let scheduler = self.scheduler.borrow();
        !(scheduler.access() == AccessKind::Alternating
            && self.coordinator.clock().is_guard_interval(now, Duration::ZERO))
    }

    /// Management frames only go up when they arrived on the tuned channel
    /// and that channel holds access
    pub fn accept_management(&self, channel: ChannelNumber) -> bool {
        let scheduler = self.scheduler.borrow();
        channel == scheduler.radio_channel() && !scheduler.manager().is_channel_dead(channel)
    }

    pub fn status(&self, now: Duration) -> DeviceStatus {
        let scheduler = self.scheduler.borrow();
        let channels = scheduler
            .manager()
            .channels()
            .map(|c| ChannelStatus {
                channel: c.number,
                state: c.state,
                queued: scheduler.queues().len(c.number),
            })
            .collect();

        DeviceStatus {
            time_ms: now.as_millis() as u64,
            coordinating: self.coordinator.is_running(),
            access: scheduler.access(),
            granted_channel: scheduler.channel(),
            extends: scheduler.remaining_extensions(),
            pending_request: scheduler.pending_request(),
            radio_channel: scheduler.radio_channel(),
            channels,
            coordinator: self.coordinator.stats(),
            access_stats: scheduler.stats(),
            queue_stats: scheduler.queues().stats(),
        }
    }
}

impl std::fmt::Debug for WaveDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveDevice")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("scheduler", &self.scheduler.borrow())
            .field("tx_profile", &self.tx_profile)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{CCH, SCH1};
    use crate::coordinator::CoordinationListener;
    use crate::mac::{SimMac, SimRadio};
    use crate::sim::Simulator;

    fn device(config: DeviceConfig) -> WaveDevice {
        WaveDevice::new(config, Box::new(SimRadio::new()), Box::new(SimMac::new())).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DeviceConfig::default();
        config.coordination.guard_interval_ms = 60;
        let result = WaveDevice::new(config, Box::new(SimRadio::new()), Box::new(SimMac::new()));
        assert!(matches!(result, Err(ConfigError::GuardNotShorterThanCch { .. })));
    }

    #[test]
    fn test_initialize_registers_scheduler_once() {
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let mut device = device(DeviceConfig::default());
        device.initialize(&mut sim).unwrap();
        device.initialize(&mut sim).unwrap();
        assert_eq!(device.coordinator().listener_count(), 1);
        assert!(device.status(sim.now()).coordinating);
    }

    #[test]
    fn test_dispose_releases_access() {
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let mut device = device(DeviceConfig::default());
        device.initialize(&mut sim).unwrap();
        assert!(device.start_sch(&SchInfo::new(SCH1, true, 0xff), &mut sim));

        device.dispose(&mut sim);
        assert_eq!(device.scheduler().access(), AccessKind::DefaultCch);
        assert_eq!(device.coordinator().listener_count(), 0);
        assert!(!device.coordinator().is_running());
        assert_eq!(sim.pending(), 0);
    }

    struct Idle;

    impl CoordinationListener for Idle {}

    #[test]
    fn test_listener_handle_from_before_dispose_stays_dead() {
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let mut device = device(DeviceConfig::default());
        device.initialize(&mut sim).unwrap();
        let before = device.register_listener(Rc::new(RefCell::new(Idle)), sim.now());

        device.dispose(&mut sim);
        device.initialize(&mut sim).unwrap();
        let after = device.register_listener(Rc::new(RefCell::new(Idle)), sim.now());

        assert!(!device.unregister_listener(before));
        assert_eq!(device.coordinator().listener_count(), 2);
        assert!(device.unregister_listener(after));
        assert_eq!(device.coordinator().listener_count(), 1);
    }

    #[test]
    fn test_status_snapshot_serializes() {
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let mut device = device(DeviceConfig::default());
        device.initialize(&mut sim).unwrap();
        device.send_x(vec![1, 2, 3], ETHERTYPE_WSMP, &TxInfo::new(CCH));

        let status = device.status(sim.now());
        assert_eq!(status.radio_channel, CCH);
        assert_eq!(status.channels.len(), 7);
        let json = serde_json::to_string(&status).unwrap();
        let parsed: DeviceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }
}
