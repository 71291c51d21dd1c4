//! # WAVE Channel Coordination
//!
//! Channel access arbitration for a single-radio vehicular device that
//! alternates, on a globally synchronized clock, between one control channel
//! (CCH) and a set of service channels (SCH).
//!
//! ## Features
//!
//! - **Slot timing**: guard/CCH/SCH interval arithmetic for any instant
//! - **Channel coordination**: periodic slot boundary notifications
//! - **Access arbitration**: continuous, alternating and extended SCH access
//!   with single-radio exclusivity
//! - **Per-channel queues**: frames wait for their channel instead of being
//!   flushed on a channel switch
//! - **Deterministic time**: every timer goes through a discrete-event loop
//!
//! ## Quick Start
//!
//! ```rust
//! use wavemac::{DeviceConfig, SchInfo, Simulator, WaveDevice, WaveEvent, SCH1};
//! use wavemac::mac::{SimMac, SimRadio};
//! use std::time::Duration;
//!
//! let mut sim: Simulator<WaveEvent> = Simulator::new();
//! let mut device = WaveDevice::new(
//!     DeviceConfig::default(),
//!     Box::new(SimRadio::new()),
//!     Box::new(SimMac::new()),
//! )
//! .unwrap();
//!
//! device.initialize(&mut sim).unwrap();
//! assert!(device.start_sch(&SchInfo::new(SCH1, false, 0), &mut sim));
//!
//! sim.run_until(Duration::from_millis(200), |event, sim| {
//!     device.handle_event(event, sim);
//! });
//! ```
//!
//! ## Architecture
//!
//! - [`slot_clock`] - interval arithmetic
//! - [`coordinator`] - slot boundary generator and listener registry
//! - [`scheduler`] - access assignment state machine
//! - [`manager`] - per-channel state table
//! - [`mac`] - radio/MAC interfaces and per-channel queues
//! - [`device`] - everything above wired into one device
//! - [`sim`] - the event loop supplying time and timers
//!
//! Everything is single-threaded. Timers, listener callbacks and requests are
//! serialized by the event loop that owns the device.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::new_without_default)]

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod event;
pub mod mac;
pub mod manager;
pub mod scheduler;
pub mod sim;
pub mod slot_clock;

// Re-export main public types for convenience
pub use channel::{ChannelNumber, ChannelState, CCH, SCH1, SCH2, SCH3, SCH4, SCH5, SCH6};
pub use config::{CoordinationConfig, DeviceConfig};
pub use coordinator::{ChannelCoordinator, CoordinationListener, ListenerId};
pub use device::{SchInfo, TxInfo, TxProfile, WaveDevice};
pub use error::ConfigError;
pub use event::WaveEvent;
pub use manager::ChannelManager;
pub use scheduler::{AccessKind, AccessMode, AccessRequest, ChannelScheduler};
pub use sim::{Scoped, Simulator, Timers};
pub use slot_clock::{Interval, SlotClock};
