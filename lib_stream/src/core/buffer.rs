//! # Per-Subscription Backpressure Buffer
//!
//! Sits between the hub (single producer) and one consumer's delivery worker.
//! The consumer's demand is the free space in a small window of `capacity`
//! items; what happens once the window is full depends on the strategy:
//!
//! | Strategy  | Window full                                              |
//! |-----------|----------------------------------------------------------|
//! | `Buffer`  | no window, queue grows without bound                     |
//! | `Drop`    | the arriving item is discarded                           |
//! | `Latest`  | the arriving item replaces the newest queued one         |
//! | `Error`   | the subscription faults with `StreamError::Overflow`     |
//! | `Missing` | no admission control, every item is queued               |
//!
//! Items are never reordered. Buffering happens after fan-out, so sibling
//! subscriptions on the same stream may use different strategies.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::StreamError;

/// Overflow behaviour of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackpressureStrategy {
    #[default]
    Buffer,
    Drop,
    Latest,
    Error,
    Missing,
}

impl BackpressureStrategy {
    pub const ALL: [BackpressureStrategy; 5] = [
        BackpressureStrategy::Buffer,
        BackpressureStrategy::Drop,
        BackpressureStrategy::Latest,
        BackpressureStrategy::Error,
        BackpressureStrategy::Missing,
    ];

    /// Wire name, as sent in the `backpressureStrategy` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackpressureStrategy::Buffer => "BUFFER",
            BackpressureStrategy::Drop => "DROP",
            BackpressureStrategy::Latest => "LATEST",
            BackpressureStrategy::Error => "ERROR",
            BackpressureStrategy::Missing => "MISSING",
        }
    }

    /// Whether the strategy enforces the capacity window.
    pub fn is_bounded(&self) -> bool {
        matches!(
            self,
            BackpressureStrategy::Drop | BackpressureStrategy::Latest | BackpressureStrategy::Error
        )
    }
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackpressureStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackpressureStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown backpressure strategy '{}'", s))
    }
}

/// Outcome of offering one item to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Appended to the queue.
    Queued,
    /// Discarded under `Drop`.
    Dropped,
    /// Took the place of the newest queued item under `Latest`.
    Replaced,
    /// Tripped the `Error` strategy; the subscription is now faulted.
    Overflowed,
    /// The buffer already reached a terminal state.
    Closed,
}

/// What the consumer side receives from `next`.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Item(T),
    Completed,
    Failed(StreamError),
    Cancelled,
}

/// Running counters, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub offered: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub replaced: u64,
}

#[derive(Debug)]
enum Phase {
    Open,
    Completed,
    Failed(StreamError),
    Cancelled,
}

struct BufferState<T> {
    queue: VecDeque<T>,
    phase: Phase,
    stats: BufferStats,
    missing_overrun: bool,
}

/// # Backpressure Buffer
///
/// `offer` is called by the producer and never blocks. `next` is called by the
/// single consumer and waits until an item or a terminal signal is available.
pub struct BackpressureBuffer<T> {
    strategy: BackpressureStrategy,
    capacity: usize,
    state: Mutex<BufferState<T>>,
    notify: Notify,
}

impl<T> BackpressureBuffer<T> {
    /// `capacity` is clamped to at least one.
    pub fn new(strategy: BackpressureStrategy, capacity: usize) -> Self {
        Self {
            strategy,
            capacity: capacity.max(1),
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                phase: Phase::Open,
                stats: BufferStats::default(),
                missing_overrun: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn strategy(&self) -> BackpressureStrategy {
        self.strategy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer side: admits, drops, replaces or faults according to the strategy.
    pub fn offer(&self, item: T) -> Admission {
        let mut state = self.lock();
        if !matches!(state.phase, Phase::Open) {
            return Admission::Closed;
        }
        state.stats.offered += 1;

        let window_full = state.queue.len() >= self.capacity;
        let admission = match self.strategy {
            BackpressureStrategy::Buffer => {
                state.queue.push_back(item);
                Admission::Queued
            }
            BackpressureStrategy::Missing => {
                state.queue.push_back(item);
                if state.queue.len() > self.capacity && !state.missing_overrun {
                    state.missing_overrun = true;
                    log::warn!(
                        "MISSING strategy: consumer is {} items behind (window {}), no admission control applied",
                        state.queue.len(),
                        self.capacity
                    );
                }
                Admission::Queued
            }
            BackpressureStrategy::Drop if window_full => {
                state.stats.dropped += 1;
                Admission::Dropped
            }
            BackpressureStrategy::Latest if window_full => {
                if let Some(newest) = state.queue.back_mut() {
                    *newest = item;
                }
                state.stats.replaced += 1;
                Admission::Replaced
            }
            BackpressureStrategy::Error if window_full => {
                state.queue.clear();
                state.phase = Phase::Failed(StreamError::Overflow { capacity: self.capacity });
                Admission::Overflowed
            }
            BackpressureStrategy::Drop | BackpressureStrategy::Latest | BackpressureStrategy::Error => {
                state.queue.push_back(item);
                Admission::Queued
            }
        };
        drop(state);

        if admission != Admission::Dropped {
            self.notify.notify_one();
        }
        admission
    }

    /// Upstream finished; queued items still drain before `Completed`.
    pub fn complete(&self) -> bool {
        self.close_with(Phase::Completed)
    }

    /// Enqueues a final item past admission control, then completes. Queued
    /// items drain first. Returns `false` if the buffer was already closed.
    pub fn complete_with(&self, item: T) -> bool {
        let mut state = self.lock();
        if !matches!(state.phase, Phase::Open) {
            return false;
        }
        state.stats.offered += 1;
        state.queue.push_back(item);
        state.phase = Phase::Completed;
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Upstream failed; queued items still drain before `Failed`.
    pub fn fail(&self, error: StreamError) -> bool {
        self.close_with(Phase::Failed(error))
    }

    fn close_with(&self, phase: Phase) -> bool {
        let mut state = self.lock();
        if !matches!(state.phase, Phase::Open) {
            return false;
        }
        state.phase = phase;
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Consumer went away: discard everything. Returns `false` if already cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if matches!(state.phase, Phase::Cancelled) {
            return false;
        }
        state.queue.clear();
        state.phase = Phase::Cancelled;
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Non-blocking poll. `None` means nothing is ready yet.
    pub fn try_next(&self) -> Option<Delivery<T>> {
        let mut state = self.lock();
        if matches!(state.phase, Phase::Cancelled) {
            return Some(Delivery::Cancelled);
        }
        if let Some(item) = state.queue.pop_front() {
            state.stats.delivered += 1;
            if state.queue.len() <= self.capacity {
                state.missing_overrun = false;
            }
            return Some(Delivery::Item(item));
        }
        match &state.phase {
            Phase::Open => None,
            Phase::Completed => Some(Delivery::Completed),
            Phase::Failed(e) => Some(Delivery::Failed(e.clone())),
            Phase::Cancelled => Some(Delivery::Cancelled),
        }
    }

    /// Waits for the next item or terminal signal.
    pub async fn next(&self) -> Delivery<T> {
        loop {
            if let Some(delivery) = self.try_next() {
                return delivery;
            }
            // Single consumer: `notify_one` stores a permit if we are not yet waiting.
            self.notify.notified().await;
        }
    }

    /// Items queued and not yet taken by the consumer.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Remaining demand before the window is full; unbounded strategies report `usize::MAX`.
    pub fn demand(&self) -> usize {
        if self.strategy.is_bounded() {
            self.capacity.saturating_sub(self.pending())
        } else {
            usize::MAX
        }
    }

    /// True once a terminal state was reached on the producer side or by cancel.
    pub fn is_closed(&self) -> bool {
        !matches!(self.lock().phase, Phase::Open)
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }
}
