//! Deterministic discrete-event loop.
//!
//! The coordination core never owns time. It arms one-shot timers through
//! the [`Timers`] trait and is called back when the surrounding loop pops the
//! event. [`Simulator`] is the loop used by the binary and the tests: a
//! min-heap of pending events ordered by fire time, ties broken by the order
//! in which they were scheduled.

use core::cmp::Ordering;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashSet};

/// Handle of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(u64);

/// Clock and one-shot timer service provided by the event loop
pub trait Timers<E> {
    fn now(&self) -> Duration;

    /// Arm `event` to fire `delay` from now
    fn schedule(&mut self, delay: Duration, event: E) -> EventId;

    /// Disarm a timer. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, id: EventId) -> bool;
}

#[derive(Debug)]
struct PendingEvent<E> {
    time: Duration,
    id: EventId,
    event: E,
}

impl<E> PartialEq for PendingEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl<E> Eq for PendingEvent<E> {}

impl<E> Ord for PendingEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest time first, then FIFO
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl<E> PartialOrd for PendingEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct Simulator<E> {
    now: Duration,
    next_id: u64,
    queue: BinaryHeap<PendingEvent<E>>,
    live: HashSet<EventId>,
}

impl<E> Simulator<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            queue: BinaryHeap::new(),
            live: HashSet::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of armed, not yet cancelled timers
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// Fire time of the next live event
    pub fn peek_time(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.queue.peek().map(|pending| pending.time)
    }

    fn discard_cancelled(&mut self) {
        while let Some(head) = self.queue.peek() {
            if self.live.contains(&head.id) {
                break;
            }
            self.queue.pop();
        }
    }

    /// Pop the next live event due at or before `until`, advancing the clock
    pub fn pop_until(&mut self, until: Duration) -> Option<E> {
        self.discard_cancelled();
        let due = self.queue.peek().map_or(false, |head| head.time <= until);
        if !due {
            return None;
        }
        let pending = self.queue.pop()?;
        self.live.remove(&pending.id);
        self.now = pending.time;
        Some(pending.event)
    }

    /// Dispatch every event due up to `until`, then leave the clock at `until`.
    ///
    /// Handlers may schedule further events; those are dispatched too when
    /// they fall inside the window.
    pub fn run_until<F>(&mut self, until: Duration, mut handler: F)
    where
        F: FnMut(E, &mut Self),
    {
        while let Some(event) = self.pop_until(until) {
            handler(event, self);
        }
        if self.now < until {
            self.now = until;
        }
    }

    /// Advance the clock without dispatching anything
    pub fn advance_to(&mut self, time: Duration) {
        debug_assert!(
            self.peek_time().map_or(true, |next| next >= time),
            "advancing past pending event"
        );
        if time > self.now {
            self.now = time;
        }
    }
}

impl<E> Default for Simulator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Timers<E> for Simulator<E> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.queue.push(PendingEvent {
            time: self.now + delay,
            id,
            event,
        });
        self.live.insert(id);
        id
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.live.remove(&id)
    }
}

/// Timers view that tags every event with an owner key, so several devices
/// can share one [`Simulator`].
pub struct Scoped<'a, K, E> {
    sim: &'a mut Simulator<(K, E)>,
    key: K,
}

impl<'a, K: Copy, E> Scoped<'a, K, E> {
    pub fn new(sim: &'a mut Simulator<(K, E)>, key: K) -> Self {
        Self { sim, key }
    }
}

impl<'a, K: Copy, E> Timers<E> for Scoped<'a, K, E> {
    fn now(&self) -> Duration {
        self.sim.now()
    }

    fn schedule(&mut self, delay: Duration, event: E) -> EventId {
        self.sim.schedule(delay, (self.key, event))
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.sim.cancel(id)
    }
}
