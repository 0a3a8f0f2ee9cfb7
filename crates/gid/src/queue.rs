//! Bounded single-writer, multi-reader handoff queue.
//!
//! [`HandoffQueue`] hands pre-minted identifiers from one refill task to any
//! number of callers. Readers block on a condition variable with a timeout;
//! the writer never blocks on a lock for space and instead polls in short
//! fixed sleeps until a reader frees a slot.
//!
//! Occupancy reads ([`HandoffQueue::size`], [`HandoffQueue::remaining_capacity`])
//! go through an atomic counter and never take the reader lock, so they may be
//! stale under concurrent mutation.

use crate::error::{Error, Result};
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Pause between capacity checks while a `put` waits for space.
pub const PUT_PAUSE: Duration = Duration::from_micros(1);

/// A fixed-capacity FIFO for one writer and many readers.
///
/// ## Contract
/// - Exactly one thread may call [`put`](Self::put) at a time. Concurrent
///   writers can overshoot the capacity.
/// - Any number of threads may call [`poll`](Self::poll).
/// - [`clear`](Self::clear) concurrent with `put` is unspecified.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    capacity: usize,
    count: AtomicUsize,
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> HandoffQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("queue", "capacity must be greater than 0"));
        }
        Ok(Self {
            capacity,
            count: AtomicUsize::new(0),
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
        })
    }

    /// Maximum number of items the queue holds.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of queued items.
    pub fn size(&self) -> usize {
        self.count.load(Ordering::Acquire).min(self.capacity)
    }

    /// Approximate number of free slots.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.size()
    }

    /// Returns `true` when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Appends `item`, waiting for a free slot if the queue is full.
    ///
    /// The wait is a busy poll in [`PUT_PAUSE`] steps, not a blocking wait, and
    /// is not cancellable. Wakes one blocked reader if the queue was empty.
    pub fn put(&self, item: T) {
        while self.count.load(Ordering::Acquire) >= self.capacity {
            std::thread::sleep(PUT_PAUSE);
        }

        let mut items = self.items.lock();
        items.push_back(item);
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            self.not_empty.notify_one();
        }
    }

    /// Takes the head of the queue, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the queue stayed empty for the whole timeout. A reader
    /// that leaves items behind wakes the next blocked reader.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut items = self.items.lock();

        while items.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                        break;
                    }
                }
                None => self.not_empty.wait(&mut items),
            }
        }

        let item = items.pop_front()?;
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        if previous > 1 {
            self.not_empty.notify_one();
        }
        Some(item)
    }

    /// Drops every queued item and resets the count to zero.
    ///
    /// Returns the number of discarded items.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        self.count.store(0, Ordering::Release);
        dropped
    }
}
