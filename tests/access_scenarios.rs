use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use wavemac::mac::{ChannelQueues, Radio, SimMac, SimRadio, WaveFrame};
use wavemac::*;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[derive(Default)]
struct SlotLog {
    control: Vec<u64>,
    service: Vec<u64>,
    guard: Vec<(u64, bool)>,
}

impl CoordinationListener for SlotLog {
    fn on_control_slot_start(&mut self, now: Duration, _duration: Duration) {
        self.control.push(now.as_millis() as u64);
    }

    fn on_service_slot_start(&mut self, now: Duration, _duration: Duration) {
        self.service.push(now.as_millis() as u64);
    }

    fn on_guard_slot_start(&mut self, now: Duration, _duration: Duration, in_control_half: bool) {
        self.guard.push((now.as_millis() as u64, in_control_half));
    }
}

struct Harness {
    sim: Simulator<WaveEvent>,
    device: WaveDevice,
    radio: SimRadio,
    mac: SimMac,
}

impl Harness {
    fn new() -> Self {
        let radio = SimRadio::new();
        let mac = SimMac::new();
        let mut sim: Simulator<WaveEvent> = Simulator::new();
        let mut device = WaveDevice::new(
            DeviceConfig::default(),
            Box::new(radio.clone()),
            Box::new(mac.clone()),
        )
        .unwrap();
        device.initialize(&mut sim).unwrap();
        Self {
            sim,
            device,
            radio,
            mac,
        }
    }

    fn run_until(&mut self, until_ms: u64) {
        let device = &mut self.device;
        self.sim
            .run_until(ms(until_ms), |event, sim| device.handle_event(event, sim));
    }

    fn start_sch(&mut self, channel: ChannelNumber, immediate: bool, extended_access: u8) -> bool {
        self.device
            .start_sch(&SchInfo::new(channel, immediate, extended_access), &mut self.sim)
    }

    fn state(&self, channel: ChannelNumber) -> Option<ChannelState> {
        self.device.scheduler().manager().state(channel)
    }
}

#[test]
fn test_alternating_access_follows_slot_boundaries() {
    let mut h = Harness::new();
    let slots = Rc::new(RefCell::new(SlotLog::default()));
    h.device.register_listener(slots.clone(), h.sim.now());

    assert!(h.start_sch(SCH1, false, 0));
    assert_eq!(h.device.scheduler().access(), AccessKind::Alternating);
    // Granted inside the CCH interval: CCH keeps the radio for now
    assert_eq!(h.state(CCH), Some(ChannelState::Active));
    assert_eq!(h.state(SCH1), Some(ChannelState::Inactive));
    assert_eq!(h.radio.current_channel(), CCH);

    h.run_until(250);
    assert_eq!(slots.borrow().control, vec![4, 104, 204]);
    assert_eq!(slots.borrow().service, vec![54, 154]);
    assert_eq!(slots.borrow().guard, vec![(0, true), (50, false), (100, true), (150, false), (200, true), (250, false)]);
}

#[test]
fn test_alternating_access_swaps_channel_states_and_radio() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, false, 0));

    h.run_until(60);
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.state(CCH), Some(ChannelState::Inactive));
    assert_eq!(h.radio.current_channel(), SCH1);

    h.run_until(110);
    assert_eq!(h.state(SCH1), Some(ChannelState::Inactive));
    assert_eq!(h.state(CCH), Some(ChannelState::Active));
    assert_eq!(h.radio.current_channel(), CCH);
    assert_eq!(h.radio.switches(), vec![SCH1, CCH]);

    // Catch-up for the guard at t=0 plus the guards at 50 and 100
    assert_eq!(h.mac.log().busy_periods, vec![ms(4), ms(4), ms(4)]);
}

#[test]
fn test_alternating_access_granted_mid_guard_declares_remaining_busy() {
    let mut h = Harness::new();
    h.run_until(51);
    assert!(h.start_sch(SCH1, false, 0));
    // Already in the SCH interval: switch right away
    assert_eq!(h.radio.current_channel(), SCH1);
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.mac.log().busy_periods, vec![ms(3)]);
}

#[test]
fn test_immediate_alternating_grant_in_cch_guard_returns_radio_for_cch_interval() {
    let mut h = Harness::new();
    h.run_until(1);
    assert!(h.start_sch(SCH1, true, 0));
    assert_eq!(h.radio.current_channel(), SCH1);
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));

    // An active channel is always the one the radio is tuned to
    h.run_until(4);
    assert_eq!(h.state(CCH), Some(ChannelState::Active));
    assert_eq!(h.state(SCH1), Some(ChannelState::Inactive));
    assert_eq!(h.radio.current_channel(), CCH);

    h.run_until(54);
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.radio.current_channel(), SCH1);
    assert_eq!(h.radio.switches(), vec![SCH1, CCH, SCH1]);
}

#[test]
fn test_alternating_traffic_waits_for_its_interval() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, false, 0));
    h.run_until(60);

    assert!(h.device.send_x(vec![1], device::ETHERTYPE_WSMP, &TxInfo::new(CCH)));
    assert!(h.device.next_frame().is_none());

    assert!(h.device.send_x(vec![2], device::ETHERTYPE_WSMP, &TxInfo::new(SCH1)));
    let frame = h.device.next_frame().unwrap();
    assert_eq!((frame.channel, frame.payload), (SCH1, vec![2]));
    assert!(h.device.confirm_sent().is_some());

    h.run_until(110);
    let frame = h.device.next_frame().unwrap();
    assert_eq!((frame.channel, frame.payload), (CCH, vec![1]));
}

#[test]
fn test_frame_in_service_survives_guard_switch() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, false, 0));
    h.run_until(60);

    assert!(h.device.send_x(vec![9], device::ETHERTYPE_WSMP, &TxInfo::new(SCH1)));
    assert!(h.device.next_frame().is_some());
    // Not confirmed before the CCH guard retunes the radio
    h.run_until(100);
    assert_eq!(h.device.scheduler().queues().len(SCH1), 1);

    h.run_until(160);
    let frame = h.device.next_frame().unwrap();
    assert_eq!(frame.payload, vec![9]);
}

#[test]
fn test_continuous_access_blocks_other_service_channels() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, true, 0xff));
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.state(CCH), Some(ChannelState::Dead));
    assert_eq!(h.radio.current_channel(), SCH1);

    h.run_until(1);
    assert!(!h.start_sch(SCH2, true, 0xff));
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.state(SCH2), Some(ChannelState::Dead));
    assert_eq!(h.device.scheduler().stats().rejected, 1);

    // Continuous access ignores slot boundaries
    h.run_until(300);
    assert_eq!(h.radio.current_channel(), SCH1);
    assert_eq!(h.radio.switches(), vec![SCH1]);
}

#[test]
fn test_repeated_continuous_request_is_idempotent() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, true, 0xff));
    let before = h.device.status(h.sim.now());
    assert!(h.start_sch(SCH1, true, 0xff));
    assert_eq!(h.device.status(h.sim.now()), before);
}

#[test]
fn test_mode_change_on_held_channel_rejected() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, true, 0xff));
    assert!(!h.start_sch(SCH1, true, 0));
    assert!(!h.start_sch(SCH1, true, 3));
    assert_eq!(h.device.scheduler().access(), AccessKind::Continuous);
}

#[test]
fn test_continuous_request_deferred_to_its_interval() {
    let mut h = Harness::new();
    h.run_until(10);
    assert!(h.start_sch(SCH1, false, 0xff));
    assert!(!h.device.scheduler().is_access_assigned());
    assert!(h.device.scheduler().pending_request().is_some());
    assert_eq!(h.radio.current_channel(), CCH);

    h.run_until(49);
    assert_eq!(h.state(SCH1), Some(ChannelState::Dead));

    h.run_until(50);
    assert_eq!(h.device.scheduler().access(), AccessKind::Continuous);
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.radio.current_channel(), SCH1);
}

#[test]
fn test_extended_access_deferred_then_auto_released() {
    let mut h = Harness::new();
    h.run_until(10);

    assert!(h.start_sch(SCH1, false, 5));
    assert_eq!(h.device.scheduler().access(), AccessKind::DefaultCch);
    // Smaller extension count for the same pending request is accepted as is
    assert!(h.start_sch(SCH1, false, 4));
    assert!(!h.start_sch(SCH1, false, 6));

    h.run_until(50);
    assert_eq!(h.device.scheduler().access(), AccessKind::Extended);
    assert_eq!(h.device.scheduler().remaining_extensions(), Some(5));
    assert_eq!(h.state(SCH1), Some(ChannelState::Active));
    assert_eq!(h.state(CCH), Some(ChannelState::Dead));

    assert!(h.start_sch(SCH1, false, 4));
    assert_eq!(h.device.scheduler().remaining_extensions(), Some(5));

    h.run_until(549);
    assert_eq!(h.device.scheduler().access(), AccessKind::Extended);

    h.run_until(550);
    assert_eq!(h.device.scheduler().access(), AccessKind::DefaultCch);
    assert_eq!(h.state(SCH1), Some(ChannelState::Dead));
    assert_eq!(h.state(CCH), Some(ChannelState::Active));
    assert_eq!(h.radio.current_channel(), CCH);
    assert_eq!(h.device.scheduler().stats().expired, 1);
}

#[test]
fn test_immediate_extended_access_counts_wait_to_interval() {
    let mut h = Harness::new();
    h.run_until(10);
    assert!(h.start_sch(SCH1, true, 2));
    assert_eq!(h.radio.current_channel(), SCH1);

    // 40ms to the SCH interval plus two sync intervals
    h.run_until(249);
    assert_eq!(h.device.scheduler().access(), AccessKind::Extended);
    h.run_until(250);
    assert_eq!(h.device.scheduler().access(), AccessKind::DefaultCch);
}

#[test]
fn test_release_cancels_expiry() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, true, 3));
    let pending = h.sim.pending();

    h.device.stop_sch(SCH1, &mut h.sim);
    assert_eq!(h.sim.pending(), pending - 1);
    assert_eq!(h.device.scheduler().access(), AccessKind::DefaultCch);

    // Releasing twice is harmless
    h.device.stop_sch(SCH1, &mut h.sim);
    h.run_until(1000);
    assert_eq!(h.device.scheduler().stats().expired, 0);
    assert_eq!(h.device.scheduler().stats().released, 1);
}

#[test]
fn test_release_of_alternating_access_through_cch() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH1, false, 0));
    assert!(h.device.scheduler().is_access_assigned_for(CCH));

    h.run_until(60);
    h.device.stop_sch(CCH, &mut h.sim);
    assert_eq!(h.device.scheduler().access(), AccessKind::DefaultCch);
    assert_eq!(h.state(SCH1), Some(ChannelState::Dead));
    assert_eq!(h.radio.current_channel(), CCH);

    // No further retunes once alternating access is gone
    h.run_until(300);
    assert_eq!(h.radio.switches(), vec![SCH1, CCH]);
}

#[test]
fn test_alternating_access_rejected_while_continuous_held() {
    let mut h = Harness::new();
    assert!(h.start_sch(SCH2, true, 0xff));
    assert!(!h.start_sch(SCH1, false, 0));
    assert!(!h.start_sch(CCH, false, 0));

    h.device.stop_sch(SCH2, &mut h.sim);
    assert!(h.start_sch(SCH1, false, 0));
}

#[test]
fn test_queue_preserved_across_switches() {
    let mut mac = SimMac::new();
    let mut queues = ChannelQueues::new(8);
    queues.switch_active(SCH1);
    assert!(queues.enqueue(SCH2, WaveFrame::new(SCH2, 0x88dc, vec![42]), &mut mac));

    queues.switch_active(SCH2);
    assert_eq!(queues.len(SCH2), 1);
    assert_eq!(queues.peek(SCH2).map(|f| f.payload.clone()), Some(vec![42]));
}
