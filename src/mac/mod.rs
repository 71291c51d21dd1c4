//! Interfaces to the radio and the contention MAC below the coordination core.
//!
//! The core only needs three things from below: retune the radio, kick the
//! MAC when the active queue has something to send, and hold the medium busy
//! for a guard interval. Frame contention, retransmission and the PHY stay
//! behind [`Radio`] and [`MacLink`].

pub mod queues;

use crate::channel::{ChannelNumber, WaveDataRate, CCH};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

pub use queues::{ChannelQueues, QueueStats};

pub trait Radio {
    /// Retune to `channel`. Assumed instantaneous.
    fn set_channel(&mut self, channel: ChannelNumber);

    fn current_channel(&self) -> ChannelNumber;
}

pub trait MacLink {
    /// The active queue has frames waiting
    fn start_access_if_needed(&mut self);

    /// Treat the medium as busy for `duration`
    fn notify_busy(&mut self, duration: Duration);

    /// A retune is about to happen
    fn notify_channel_switching(&mut self) {}
}

/// Per-frame transmit parameters supplied by the higher layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxParameters {
    pub data_rate: WaveDataRate,
    pub tx_power_level: u8,
    pub adaptable: bool,
}

impl TxParameters {
    /// Combine with what the MAC's rate control picked.
    ///
    /// Fixed parameters win outright. Adaptable ones turn the requested rate
    /// into a floor and the requested power level into a ceiling.
    pub fn resolve(&self, mac_rate: WaveDataRate, mac_power: u8) -> (WaveDataRate, u8) {
        if !self.adaptable {
            return (self.data_rate, self.tx_power_level);
        }
        (
            self.data_rate.max(mac_rate),
            self.tx_power_level.min(mac_power),
        )
    }
}

/// Outbound frame tagged with the channel it must go out on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFrame {
    pub channel: ChannelNumber,
    pub priority: u8,
    pub protocol: u16,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub tx_parameters: Option<TxParameters>,
}

impl WaveFrame {
    pub fn new(channel: ChannelNumber, protocol: u16, payload: Vec<u8>) -> Self {
        Self {
            channel,
            priority: 0,
            protocol,
            payload,
            tx_parameters: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioLog {
    pub current: ChannelNumber,
    pub switches: Vec<ChannelNumber>,
}

/// Radio stand-in recording every retune. Clones share one log.
#[derive(Debug, Clone)]
pub struct SimRadio {
    log: Rc<RefCell<RadioLog>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(RadioLog {
                current: CCH,
                switches: Vec::new(),
            })),
        }
    }

    pub fn switches(&self) -> Vec<ChannelNumber> {
        self.log.borrow().switches.clone()
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimRadio {
    fn set_channel(&mut self, channel: ChannelNumber) {
        let mut log = self.log.borrow_mut();
        log.current = channel;
        log.switches.push(channel);
    }

    fn current_channel(&self) -> ChannelNumber {
        self.log.borrow().current
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacLog {
    pub access_signals: u64,
    pub switch_notifications: u64,
    pub busy_periods: Vec<Duration>,
}

/// MAC stand-in recording the signals it receives. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct SimMac {
    log: Rc<RefCell<MacLog>>,
}

impl SimMac {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MacLog {
        self.log.borrow().clone()
    }
}

impl MacLink for SimMac {
    fn start_access_if_needed(&mut self) {
        self.log.borrow_mut().access_signals += 1;
    }

    fn notify_busy(&mut self, duration: Duration) {
        self.log.borrow_mut().busy_periods.push(duration);
    }

    fn notify_channel_switching(&mut self) {
        self.log.borrow_mut().switch_notifications += 1;
    }
}
