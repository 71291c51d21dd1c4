use super::{MacLink, WaveFrame};
use crate::channel::{ChannelNumber, CCH};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub sent: u64,
    pub requeued: u64,
    pub switches: u64,
}

/// One FIFO of outbound frames per channel.
///
/// Only the queue of the channel the radio is tuned to is served. Switching
/// channels never flushes a queue: frames wait until their channel becomes
/// active again, which is what lets alternating access carry both CCH and
/// SCH traffic without loss.
#[derive(Debug, Clone)]
pub struct ChannelQueues {
    queues: BTreeMap<ChannelNumber, VecDeque<WaveFrame>>,
    active: ChannelNumber,
    in_service: Option<WaveFrame>,
    capacity: usize,
    stats: QueueStats,
}

impl ChannelQueues {
    pub fn new(capacity: usize) -> Self {
        let mut queues = BTreeMap::new();
        queues.insert(CCH, VecDeque::new());
        Self {
            queues,
            active: CCH,
            in_service: None,
            capacity,
            stats: QueueStats::default(),
        }
    }

    pub fn active_channel(&self) -> ChannelNumber {
        self.active
    }

    /// Append `frame` to the queue of `channel`, creating the queue on first
    /// use. The MAC is only signalled when the frame can go out right away.
    pub fn enqueue(&mut self, channel: ChannelNumber, mut frame: WaveFrame, mac: &mut dyn MacLink) -> bool {
        let queue = self.queues.entry(channel).or_default();
        if queue.len() >= self.capacity {
            self.stats.dropped += 1;
            warn!("queue of channel {} full, dropping frame", channel);
            return false;
        }
        frame.channel = channel;
        queue.push_back(frame);
        self.stats.enqueued += 1;

        if channel == self.active {
            mac.start_access_if_needed();
        }
        true
    }

    /// Make the queue of `channel` the served one. Nothing is discarded.
    pub fn switch_active(&mut self, channel: ChannelNumber) {
        self.requeue_in_service();
        self.queues.entry(channel).or_default();
        if self.active != channel {
            debug!("active queue {} -> {}", self.active, channel);
            self.stats.switches += 1;
        }
        self.active = channel;
    }

    /// A retune is starting: a frame taken for transmission but not yet
    /// confirmed goes back to the head of its queue.
    pub fn on_channel_switching(&mut self) {
        self.requeue_in_service();
    }

    fn requeue_in_service(&mut self) {
        if let Some(frame) = self.in_service.take() {
            self.stats.requeued += 1;
            self.queues.entry(frame.channel).or_default().push_front(frame);
        }
    }

    /// Take the head of the active queue for transmission
    pub fn begin_service(&mut self) -> Option<&WaveFrame> {
        if self.in_service.is_none() {
            self.in_service = self
                .queues
                .get_mut(&self.active)
                .and_then(|queue| queue.pop_front());
        }
        self.in_service.as_ref()
    }

    /// Transmission of the frame in service finished
    pub fn complete_service(&mut self) -> Option<WaveFrame> {
        let frame = self.in_service.take()?;
        self.stats.sent += 1;
        Some(frame)
    }

    pub fn in_service(&self) -> Option<&WaveFrame> {
        self.in_service.as_ref()
    }

    pub fn len(&self, channel: ChannelNumber) -> usize {
        self.queues.get(&channel).map_or(0, |queue| queue.len())
    }

    pub fn is_empty(&self, channel: ChannelNumber) -> bool {
        self.len(channel) == 0
    }

    pub fn peek(&self, channel: ChannelNumber) -> Option<&WaveFrame> {
        self.queues.get(&channel).and_then(|queue| queue.front())
    }

    pub fn total_len(&self) -> usize {
        self.queues.values().map(|queue| queue.len()).sum()
    }

    pub fn has_queue(&self, channel: ChannelNumber) -> bool {
        self.queues.contains_key(&channel)
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}
