//! Channel access arbitration for a single radio.
//!
//! The scheduler holds exactly one access assignment at a time:
//!
//! * default CCH access, the state after start-up and after every release;
//! * alternating access, the granted SCH during SCH intervals and the CCH
//!   during CCH intervals, driven by coordinator notifications;
//! * time-bounded access, either continuous (no end) or extended (released
//!   after a number of sync intervals). The CCH is dead while it is held,
//!   unless the CCH itself is the granted channel.
//!
//! Requests that do not fit the current state are rejected with `false` and
//! leave everything untouched.

use crate::channel::{is_cch, is_wave_channel, ChannelNumber, ChannelState, CCH};
use crate::coordinator::CoordinationListener;
use crate::event::WaveEvent;
use crate::mac::{ChannelQueues, MacLink, Radio, WaveFrame};
use crate::manager::ChannelManager;
use crate::sim::{EventId, Timers};
use crate::slot_clock::SlotClock;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Continuous,
    Alternating,
    /// Continuous access released after `extends` sync intervals
    Extended { extends: u8 },
}

impl AccessMode {
    /// Decode the `extendedAccess` field of a start-SCH request
    pub fn from_extended_access(value: u8) -> Self {
        match value {
            0 => AccessMode::Alternating,
            0xff => AccessMode::Continuous,
            extends => AccessMode::Extended { extends },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub channel: ChannelNumber,
    pub mode: AccessMode,
    /// Switch right away instead of waiting for the channel's own interval
    pub immediate: bool,
}

impl AccessRequest {
    pub fn new(channel: ChannelNumber, mode: AccessMode, immediate: bool) -> Self {
        Self {
            channel,
            mode,
            immediate,
        }
    }
}

/// Public view of the current assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    DefaultCch,
    Continuous,
    Alternating,
    Extended,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStats {
    pub granted: u32,
    pub deferred: u32,
    pub rejected: u32,
    pub released: u32,
    pub expired: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    DefaultCch,
    Alternating {
        channel: ChannelNumber,
    },
    /// Continuous when `extends` is `None`, extended otherwise
    TimeBounded {
        channel: ChannelNumber,
        extends: Option<u8>,
        expiry: Option<EventId>,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingAccess {
    request: AccessRequest,
    event: EventId,
}

pub struct ChannelScheduler {
    manager: ChannelManager,
    queues: ChannelQueues,
    radio: Box<dyn Radio>,
    mac: Box<dyn MacLink>,
    access: Access,
    pending: Option<PendingAccess>,
    stats: AccessStats,
}

impl ChannelScheduler {
    pub fn new(radio: Box<dyn Radio>, mac: Box<dyn MacLink>, queue_capacity: usize) -> Self {
        let mut scheduler = Self {
            manager: ChannelManager::new(),
            queues: ChannelQueues::new(queue_capacity),
            radio,
            mac,
            access: Access::DefaultCch,
            pending: None,
            stats: AccessStats::default(),
        };
        scheduler.assign_default_cch();
        scheduler
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    pub fn queues(&self) -> &ChannelQueues {
        &self.queues
    }

    pub fn queues_mut(&mut self) -> &mut ChannelQueues {
        &mut self.queues
    }

    pub fn mac_mut(&mut self) -> &mut dyn MacLink {
        self.mac.as_mut()
    }

    pub fn radio_channel(&self) -> ChannelNumber {
        self.radio.current_channel()
    }

    pub fn stats(&self) -> AccessStats {
        self.stats
    }

    pub fn access(&self) -> AccessKind {
        match self.access {
            Access::DefaultCch => AccessKind::DefaultCch,
            Access::Alternating { .. } => AccessKind::Alternating,
            Access::TimeBounded { extends: None, .. } => AccessKind::Continuous,
            Access::TimeBounded { extends: Some(_), .. } => AccessKind::Extended,
        }
    }

    /// Channel holding the current grant, `None` under default CCH access
    pub fn channel(&self) -> Option<ChannelNumber> {
        match self.access {
            Access::DefaultCch => None,
            Access::Alternating { channel } | Access::TimeBounded { channel, .. } => Some(channel),
        }
    }

    /// Extension count of the current extended access
    pub fn remaining_extensions(&self) -> Option<u8> {
        match self.access {
            Access::TimeBounded { extends, .. } => extends,
            _ => None,
        }
    }

    pub fn pending_request(&self) -> Option<AccessRequest> {
        self.pending.map(|pending| pending.request)
    }

    pub fn is_access_assigned(&self) -> bool {
        self.access != Access::DefaultCch
    }

    /// Under alternating access the CCH keeps its share of the cycle, so it
    /// counts as assigned too.
    pub fn is_access_assigned_for(&self, channel: ChannelNumber) -> bool {
        match self.access {
            Access::DefaultCch => false,
            Access::Alternating { channel: granted } => channel == granted || is_cch(channel),
            Access::TimeBounded { channel: granted, .. } => channel == granted,
        }
    }

    /// Queue `frame` on the channel it is tagged with
    pub fn enqueue(&mut self, frame: WaveFrame) -> bool {
        let channel = frame.channel;
        self.queues.enqueue(channel, frame, self.mac.as_mut())
    }

    /// Whether a frame lasting `tx_time` may start now. Under alternating
    /// access it must end before the next guard interval.
    pub fn permits_transmission(&self, tx_time: Duration, clock: &SlotClock, now: Duration) -> bool {
        match self.access {
            Access::Alternating { .. } => tx_time <= clock.time_to_guard(now, Duration::ZERO),
            _ => true,
        }
    }

    /// Mode and channel of what is currently held, or waiting to be
    fn current(&self) -> Option<(ChannelNumber, AccessMode)> {
        match self.access {
            Access::DefaultCch => self
                .pending
                .map(|pending| (pending.request.channel, pending.request.mode)),
            Access::Alternating { channel } => Some((channel, AccessMode::Alternating)),
            Access::TimeBounded { channel, extends, .. } => Some((
                channel,
                extends.map_or(AccessMode::Continuous, |extends| AccessMode::Extended { extends }),
            )),
        }
    }

    fn reject(&mut self, request: &AccessRequest, reason: &str) -> bool {
        debug!("rejecting {:?} access on channel {}: {}", request.mode, request.channel, reason);
        self.stats.rejected += 1;
        false
    }

    pub fn request(
        &mut self,
        request: AccessRequest,
        clock: &SlotClock,
        timers: &mut dyn Timers<WaveEvent>,
    ) -> bool {
        if !is_wave_channel(request.channel) {
            return self.reject(&request, "not a WAVE channel");
        }

        if let Some((channel, mode)) = self.current() {
            if channel != request.channel {
                return self.reject(&request, "radio already assigned to another channel");
            }
            return match (mode, request.mode) {
                (AccessMode::Continuous, AccessMode::Continuous)
                | (AccessMode::Alternating, AccessMode::Alternating) => true,
                // Fewer extensions than already granted is meaningless, not an error
                (AccessMode::Extended { extends: held }, AccessMode::Extended { extends })
                    if extends <= held =>
                {
                    true
                }
                _ => self.reject(&request, "conflicts with the access already assigned"),
            };
        }

        match request.mode {
            AccessMode::Alternating => self.assign_alternating(request, clock, timers),
            AccessMode::Continuous => self.assign_time_bounded(request, None, clock, timers),
            AccessMode::Extended { extends } => {
                self.assign_time_bounded(request, Some(extends), clock, timers)
            }
        }
    }

    fn assign_alternating(
        &mut self,
        request: AccessRequest,
        clock: &SlotClock,
        timers: &mut dyn Timers<WaveEvent>,
    ) -> bool {
        let sch = request.channel;
        if is_cch(sch) {
            return self.reject(&request, "alternating access needs a service channel");
        }

        let now = timers.now();
        if request.immediate || clock.is_sch_interval(now, Duration::ZERO) {
            self.manager.set_state(sch, ChannelState::Active);
            self.manager.set_state(CCH, ChannelState::Inactive);
            self.switch_radio(sch);
        } else {
            self.manager.set_state(CCH, ChannelState::Active);
            self.manager.set_state(sch, ChannelState::Inactive);
        }
        self.access = Access::Alternating { channel: sch };

        // The guard notification for the current guard already went out
        if let Some(remaining) = clock.remaining_guard(now, Duration::ZERO) {
            self.mac.notify_busy(remaining);
        }

        self.stats.granted += 1;
        info!("alternating access on channel {} granted at {:?}", sch, now);
        self.signal_if_ready();
        self.check_invariants();
        true
    }

    fn assign_time_bounded(
        &mut self,
        request: AccessRequest,
        extends: Option<u8>,
        clock: &SlotClock,
        timers: &mut dyn Timers<WaveEvent>,
    ) -> bool {
        if extends == Some(0) {
            return self.reject(&request, "extended access needs at least one extension");
        }

        let channel = request.channel;
        let now = timers.now();
        let (in_interval, wait) = if is_cch(channel) {
            (
                clock.is_cch_interval(now, Duration::ZERO),
                clock.time_to_control(now, Duration::ZERO),
            )
        } else {
            (
                clock.is_sch_interval(now, Duration::ZERO),
                clock.time_to_service(now, Duration::ZERO),
            )
        };

        if !request.immediate && !in_interval {
            let event = timers.schedule(wait, WaveEvent::RetryAccess(request));
            self.pending = Some(PendingAccess { request, event });
            self.stats.deferred += 1;
            debug!(
                "{:?} access on channel {} deferred by {:?}",
                request.mode, channel, wait
            );
            return true;
        }

        self.switch_radio(channel);
        self.manager.set_state(CCH, ChannelState::Dead);
        self.manager.set_state(channel, ChannelState::Active);

        // Extensions count from the start of the channel's own interval
        let expiry = extends.map(|extends| {
            let duration = wait + clock.sync_interval() * u32::from(extends);
            timers.schedule(duration, WaveEvent::AccessExpired(channel))
        });
        self.access = Access::TimeBounded {
            channel,
            extends,
            expiry,
        };

        self.stats.granted += 1;
        info!("{:?} access on channel {} granted at {:?}", request.mode, channel, now);
        self.signal_if_ready();
        self.check_invariants();
        true
    }

    /// A deferred request reached its interval
    pub fn retry(
        &mut self,
        request: AccessRequest,
        clock: &SlotClock,
        timers: &mut dyn Timers<WaveEvent>,
    ) -> bool {
        match self.pending {
            Some(pending) if pending.request == request => self.pending = None,
            _ => {
                debug!("ignoring stale retry for channel {}", request.channel);
                return false;
            }
        }
        self.request(request, clock, timers)
    }

    /// The extended access timer for `channel` fired
    pub fn expire(&mut self, channel: ChannelNumber, timers: &mut dyn Timers<WaveEvent>) {
        match self.access {
            Access::TimeBounded {
                channel: granted,
                extends,
                expiry: Some(_),
            } if granted == channel => {
                self.access = Access::TimeBounded {
                    channel,
                    extends,
                    expiry: None,
                };
            }
            _ => {
                debug!("ignoring stale expiry for channel {}", channel);
                return;
            }
        }
        info!("extended access on channel {} expired at {:?}", channel, timers.now());
        self.stats.expired += 1;
        self.release(channel, timers);
    }

    /// Give up access to `channel` and fall back to default CCH access.
    /// Releasing a channel without access is a no-op.
    pub fn release(&mut self, channel: ChannelNumber, timers: &mut dyn Timers<WaveEvent>) {
        if let Some(pending) = self.pending {
            if pending.request.channel == channel {
                timers.cancel(pending.event);
                self.pending = None;
                self.stats.released += 1;
                info!("deferred access request for channel {} cancelled", channel);
                return;
            }
        }

        if !self.is_access_assigned_for(channel) {
            debug!("no access assigned for channel {}, nothing to release", channel);
            return;
        }

        if let Access::TimeBounded {
            expiry: Some(id), ..
        } = self.access
        {
            timers.cancel(id);
        }
        if let Some(granted) = self.channel() {
            self.manager.set_state(granted, ChannelState::Dead);
            info!("access on channel {} released at {:?}", granted, timers.now());
        }
        self.access = Access::DefaultCch;
        self.stats.released += 1;
        self.assign_default_cch();
    }

    fn assign_default_cch(&mut self) {
        self.manager.set_state(CCH, ChannelState::Active);
        self.switch_radio(CCH);
        self.signal_if_ready();
        self.check_invariants();
    }

    /// Retune the radio and make the matching queue the served one
    fn switch_radio(&mut self, channel: ChannelNumber) {
        if self.radio.current_channel() != channel {
            self.mac.notify_channel_switching();
            self.queues.on_channel_switching();
            self.radio.set_channel(channel);
            debug!("radio switched to channel {}", channel);
        }
        self.queues.switch_active(channel);
    }

    fn signal_if_ready(&mut self) {
        let active = self.queues.active_channel();
        if self.manager.is_channel_active(active) && !self.queues.is_empty(active) {
            self.mac.start_access_if_needed();
        }
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.manager.granted_service_channels() <= 1,
            "{} service channels hold access on a single radio",
            self.manager.granted_service_channels()
        );
        if let Access::Alternating { channel } = self.access {
            debug_assert!(
                matches!(
                    (self.manager.state(CCH), self.manager.state(channel)),
                    (Some(ChannelState::Active), Some(ChannelState::Inactive))
                        | (Some(ChannelState::Inactive), Some(ChannelState::Active))
                ),
                "CCH and channel {} out of step under alternating access",
                channel
            );
        }
    }
}

impl CoordinationListener for ChannelScheduler {
    fn on_control_slot_start(&mut self, now: Duration, _duration: Duration) {
        if let Access::Alternating { channel } = self.access {
            // An immediate grant inside the CCH guard left the radio on the SCH
            if self.radio.current_channel() != CCH {
                self.switch_radio(CCH);
            }
            self.manager.set_state(channel, ChannelState::Inactive);
            self.manager.set_state(CCH, ChannelState::Active);
            debug!("alternating access: CCH interval at {:?}", now);
            self.signal_if_ready();
            self.check_invariants();
        }
    }

    fn on_service_slot_start(&mut self, now: Duration, _duration: Duration) {
        if let Access::Alternating { channel } = self.access {
            if self.radio.current_channel() != channel {
                self.switch_radio(channel);
            }
            self.manager.set_state(CCH, ChannelState::Inactive);
            self.manager.set_state(channel, ChannelState::Active);
            debug!("alternating access: SCH {} interval at {:?}", channel, now);
            self.signal_if_ready();
            self.check_invariants();
        }
    }

    fn on_guard_slot_start(&mut self, _now: Duration, duration: Duration, in_control_half: bool) {
        if let Access::Alternating { channel } = self.access {
            let target = if in_control_half { CCH } else { channel };
            self.switch_radio(target);
            self.mac.notify_busy(duration);
        }
    }
}

impl std::fmt::Debug for ChannelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelScheduler")
            .field("access", &self.access)
            .field("pending", &self.pending)
            .field("radio_channel", &self.radio.current_channel())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{SCH1, SCH2};
    use crate::mac::{SimMac, SimRadio};
    use crate::sim::Simulator;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn scheduler() -> (ChannelScheduler, SimRadio, SimMac) {
        let radio = SimRadio::new();
        let mac = SimMac::new();
        let scheduler = ChannelScheduler::new(Box::new(radio.clone()), Box::new(mac.clone()), 16);
        (scheduler, radio, mac)
    }

    #[test]
    fn test_initial_default_cch_access() {
        let (scheduler, radio, _) = scheduler();
        assert_eq!(scheduler.access(), AccessKind::DefaultCch);
        assert!(!scheduler.is_access_assigned());
        assert!(scheduler.manager().is_channel_active(CCH));
        assert_eq!(radio.current_channel(), CCH);
        assert_eq!(scheduler.queues().active_channel(), CCH);
    }

    #[test]
    fn test_extended_access_field_decoding() {
        assert_eq!(AccessMode::from_extended_access(0), AccessMode::Alternating);
        assert_eq!(AccessMode::from_extended_access(0xff), AccessMode::Continuous);
        assert_eq!(
            AccessMode::from_extended_access(8),
            AccessMode::Extended { extends: 8 }
        );
    }

    #[test]
    fn test_invalid_requests_leave_state_untouched() {
        let clock = SlotClock::default();
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let (mut scheduler, _, _) = scheduler();

        assert!(!scheduler.request(AccessRequest::new(179, AccessMode::Continuous, true), &clock, &mut sim));
        assert!(!scheduler.request(AccessRequest::new(CCH, AccessMode::Alternating, true), &clock, &mut sim));
        assert!(!scheduler.request(
            AccessRequest::new(SCH1, AccessMode::Extended { extends: 0 }, true),
            &clock,
            &mut sim
        ));
        assert_eq!(scheduler.access(), AccessKind::DefaultCch);
        assert_eq!(scheduler.stats().rejected, 3);
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn test_continuous_cch_access() {
        let clock = SlotClock::default();
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let (mut scheduler, _, _) = scheduler();
        sim.advance_to(ms(10));

        assert!(scheduler.request(AccessRequest::new(CCH, AccessMode::Continuous, false), &clock, &mut sim));
        assert_eq!(scheduler.access(), AccessKind::Continuous);
        assert!(scheduler.manager().is_channel_active(CCH));
        assert!(scheduler.is_access_assigned_for(CCH));
        assert!(!scheduler.is_access_assigned_for(SCH1));

        // Holding the CCH still reserves the single radio
        assert!(!scheduler.request(AccessRequest::new(SCH1, AccessMode::Continuous, true), &clock, &mut sim));
        assert!(!scheduler.request(AccessRequest::new(SCH1, AccessMode::Alternating, false), &clock, &mut sim));
        assert_eq!(scheduler.stats().rejected, 2);

        scheduler.release(CCH, &mut sim);
        assert_eq!(scheduler.access(), AccessKind::DefaultCch);
        assert!(scheduler.manager().is_channel_active(CCH));
    }

    #[test]
    fn test_release_without_access_is_noop() {
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let (mut scheduler, radio, _) = scheduler();
        scheduler.release(SCH1, &mut sim);
        scheduler.release(CCH, &mut sim);
        assert_eq!(scheduler.access(), AccessKind::DefaultCch);
        assert_eq!(scheduler.stats().released, 0);
        assert!(radio.switches().is_empty());
    }

    #[test]
    fn test_deferred_request_reserves_radio() {
        let clock = SlotClock::default();
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let (mut scheduler, _, _) = scheduler();
        sim.advance_to(ms(10));

        let request = AccessRequest::new(SCH1, AccessMode::Continuous, false);
        assert!(scheduler.request(request, &clock, &mut sim));
        assert_eq!(scheduler.pending_request(), Some(request));
        assert!(!scheduler.is_access_assigned());
        assert!(!scheduler.request(AccessRequest::new(SCH2, AccessMode::Continuous, false), &clock, &mut sim));

        scheduler.release(SCH1, &mut sim);
        assert_eq!(scheduler.pending_request(), None);
        assert_eq!(sim.pending(), 0);
        assert!(!scheduler.retry(request, &clock, &mut sim));
    }

    #[test]
    fn test_frames_signal_mac_only_on_active_channel() {
        let (mut scheduler, _, mac) = scheduler();
        assert!(scheduler.enqueue(WaveFrame::new(SCH1, 0x88dc, vec![1])));
        assert_eq!(mac.log().access_signals, 0);
        assert!(scheduler.enqueue(WaveFrame::new(CCH, 0x88dc, vec![2])));
        assert_eq!(mac.log().access_signals, 1);
    }

    #[test]
    fn test_transmission_gate_only_under_alternating() {
        let clock = SlotClock::default();
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let (mut scheduler, _, _) = scheduler();
        sim.advance_to(ms(40));
        assert!(scheduler.permits_transmission(ms(20), &clock, sim.now()));

        assert!(scheduler.request(AccessRequest::new(SCH1, AccessMode::Alternating, false), &clock, &mut sim));
        assert!(scheduler.permits_transmission(ms(10), &clock, sim.now()));
        assert!(!scheduler.permits_transmission(ms(11), &clock, sim.now()));
    }
}
