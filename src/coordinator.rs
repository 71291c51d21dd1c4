//! Periodic guard/control/service slot generator.
//!
//! Once started the coordinator walks through
//! `GuardBeforeControl -> Control -> GuardBeforeService -> Service` forever,
//! arming one `SlotBoundary` timer per phase and notifying its listeners in
//! registration order every time a phase begins.
//!
//! The whole core is single-threaded: listeners are `Rc<RefCell<_>>` handles
//! and are called synchronously from the event loop.

use crate::error::ConfigError;
use crate::event::WaveEvent;
use crate::sim::{EventId, Timers};
use crate::slot_clock::{Interval, SlotClock};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info, trace};

/// Receiver of slot boundary notifications. Every hook defaults to a no-op.
pub trait CoordinationListener {
    fn on_control_slot_start(&mut self, _now: Duration, _duration: Duration) {}

    fn on_service_slot_start(&mut self, _now: Duration, _duration: Duration) {}

    fn on_guard_slot_start(&mut self, _now: Duration, _duration: Duration, _in_control_half: bool) {}
}

pub type SharedListener = Rc<RefCell<dyn CoordinationListener>>;

/// Handle returned by [`ChannelCoordinator::register_listener`].
///
/// Ids are never reused by the coordinator that issued them, so a handle kept
/// past `unregister_all` cannot remove a later listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPhase {
    GuardBeforeControl,
    Control,
    GuardBeforeService,
    Service,
}

impl SlotPhase {
    fn next(self) -> Self {
        match self {
            SlotPhase::GuardBeforeControl => SlotPhase::Control,
            SlotPhase::Control => SlotPhase::GuardBeforeService,
            SlotPhase::GuardBeforeService => SlotPhase::Service,
            SlotPhase::Service => SlotPhase::GuardBeforeControl,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub guard_slots: u64,
    pub control_slots: u64,
    pub service_slots: u64,
}

pub struct ChannelCoordinator {
    clock: SlotClock,
    listeners: Vec<(ListenerId, SharedListener)>,
    next_listener_id: u64,
    next_phase: SlotPhase,
    pending: Option<EventId>,
    running: bool,
    stats: CoordinatorStats,
}

impl ChannelCoordinator {
    pub fn new(clock: SlotClock) -> Self {
        Self {
            clock,
            listeners: Vec::new(),
            next_listener_id: 0,
            next_phase: SlotPhase::GuardBeforeControl,
            pending: None,
            running: false,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn clock(&self) -> &SlotClock {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Add a listener behind every existing one.
    ///
    /// A listener joining in the middle of a guard interval has missed that
    /// guard's notification, so it receives one right away carrying the guard
    /// time still to run.
    pub fn register_listener(&mut self, listener: SharedListener, now: Duration) -> ListenerId {
        if self.running {
            if let Some(remaining) = self.clock.remaining_guard(now, Duration::ZERO) {
                let in_control = self.clock.interval_at(now, Duration::ZERO).is_control();
                trace!("catch-up guard notification, {:?} left", remaining);
                listener
                    .borrow_mut()
                    .on_guard_slot_start(now, remaining, in_control);
            }
        }
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false if the id was never issued or is already unregistered
    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        match self.listeners.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn unregister_all(&mut self) {
        self.listeners.clear();
    }

    /// Begin coordination. Must be called exactly on a sync interval boundary.
    pub fn start(&mut self, timers: &mut dyn Timers<WaveEvent>) -> Result<(), ConfigError> {
        self.clock.validate()?;
        let now = timers.now();
        let offset = self.clock.interval_time(now, Duration::ZERO);
        if offset != Duration::ZERO {
            return Err(ConfigError::NotAtCycleStart(offset));
        }
        if self.running {
            debug!("channel coordination already running");
            return Ok(());
        }

        info!(
            "starting channel coordination at {:?} (CCH {:?}, SCH {:?}, guard {:?})",
            now,
            self.clock.cch_interval(),
            self.clock.sch_interval(),
            self.clock.guard_interval()
        );
        self.running = true;
        self.enter(SlotPhase::GuardBeforeControl, timers);
        Ok(())
    }

    pub fn stop(&mut self, timers: &mut dyn Timers<WaveEvent>) {
        if let Some(id) = self.pending.take() {
            timers.cancel(id);
        }
        if self.running {
            info!("stopping channel coordination at {:?}", timers.now());
        }
        self.running = false;
        self.next_phase = SlotPhase::GuardBeforeControl;
    }

    /// Called when the armed `WaveEvent::SlotBoundary` fires
    pub fn handle_boundary(&mut self, timers: &mut dyn Timers<WaveEvent>) {
        if !self.running {
            return;
        }
        self.pending = None;
        self.enter(self.next_phase, timers);
    }

    fn phase_duration(&self, phase: SlotPhase) -> Duration {
        match phase {
            SlotPhase::GuardBeforeControl | SlotPhase::GuardBeforeService => {
                self.clock.guard_interval()
            }
            SlotPhase::Control => self.clock.cch_slot(),
            SlotPhase::Service => self.clock.sch_slot(),
        }
    }

    fn enter(&mut self, phase: SlotPhase, timers: &mut dyn Timers<WaveEvent>) {
        let now = timers.now();
        let duration = self.phase_duration(phase);
        self.pending = Some(timers.schedule(duration, WaveEvent::SlotBoundary));
        self.next_phase = phase.next();

        debug_assert_eq!(
            self.clock.interval_at(now, Duration::ZERO),
            match phase {
                SlotPhase::GuardBeforeControl => Interval::Guard { in_control: true },
                SlotPhase::Control => Interval::Control,
                SlotPhase::GuardBeforeService => Interval::Guard { in_control: false },
                SlotPhase::Service => Interval::Service,
            },
            "slot boundary out of step with the clock"
        );

        match phase {
            SlotPhase::GuardBeforeControl | SlotPhase::GuardBeforeService => {
                let in_control = phase == SlotPhase::GuardBeforeControl;
                self.stats.guard_slots += 1;
                trace!("guard slot start at {:?} (control half: {})", now, in_control);
                for (_, listener) in &self.listeners {
                    listener
                        .borrow_mut()
                        .on_guard_slot_start(now, duration, in_control);
                }
            }
            SlotPhase::Control => {
                self.stats.control_slots += 1;
                trace!("control slot start at {:?}", now);
                for (_, listener) in &self.listeners {
                    listener.borrow_mut().on_control_slot_start(now, duration);
                }
            }
            SlotPhase::Service => {
                self.stats.service_slots += 1;
                trace!("service slot start at {:?}", now);
                for (_, listener) in &self.listeners {
                    listener.borrow_mut().on_service_slot_start(now, duration);
                }
            }
        }
    }
}

impl std::fmt::Debug for ChannelCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCoordinator")
            .field("clock", &self.clock)
            .field("listeners", &self.listener_count())
            .field("running", &self.running)
            .field("stats", &self.stats)
            .finish()
    }
}
