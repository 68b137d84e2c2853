//! Monotonic timer scheduling for the control loop.
//!
//! Every expiry the engine cares about (signal loss, connection attempts,
//! discovery removal, the proximity-exit debounce, the active-poll tick) is
//! an entry in one priority queue keyed by [`std::time::Instant`]. The
//! driving loop sleeps until [`Scheduler::next_deadline`] and then drains
//! [`Scheduler::pop_due`]. Cancellation is token removal: cancelling an
//! already-fired or unknown token is a no-op, so duplicate firings cannot
//! happen.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use uuid::Uuid;

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// What a timer firing means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// A monitored target produced no sample for the signal timeout.
    SignalLoss(Uuid),
    /// A connection attempt to a monitored target is stuck.
    ConnectTimeout(Uuid),
    /// A discovered device was not sighted again before its removal timeout.
    DiscoveryExpiry(Uuid),
    /// The proximity-exit debounce elapsed with no qualifying reading.
    ProximityExit,
    /// Periodic active-poll tick.
    PollTick,
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    fire_at: Instant,
    seq: u64,
    kind: TimerKind,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending timers with tombstone cancellation.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    live: HashSet<u64>,
    next_seq: u64,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `kind` to fire at `fire_at` and returns its token.
    pub fn schedule(&mut self, fire_at: Instant, kind: TimerKind) -> TimerToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(seq);
        self.heap.push(Reverse(Entry { fire_at, seq, kind }));
        TimerToken(seq)
    }

    /// Cancels a pending timer. Idempotent: cancelling a token that already
    /// fired or was never issued does nothing.
    pub fn cancel(&mut self, token: TimerToken) {
        self.live.remove(&token.0);
    }

    /// Drops every pending timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Earliest pending deadline, if any. Cancelled entries at the front of
    /// the queue are discarded on the way.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse(entry)| entry.fire_at)
    }

    /// Pops the next timer due at or before `now`, skipping cancelled
    /// entries. Returns `None` once nothing else is due.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        loop {
            self.discard_cancelled();
            let due = self
                .heap
                .peek()
                .is_some_and(|Reverse(entry)| entry.fire_at <= now);
            if !due {
                return None;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                self.live.remove(&entry.seq);
                return Some(entry.kind);
            }
        }
    }

    /// Number of live (pending, uncancelled) timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.live.contains(&entry.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}
