//! Prefetching front for a coordination-backed counter.
//!
//! A [`PrefetchBuffer`] reserves a whole block of values with one remote
//! increment and hands them out locally through a [`HandoffQueue`]. Refills
//! run on the buffer's [`Spawn`] handle whenever enough of the queue is free,
//! and at most one refill is in flight at a time.
//!
//! ## Resizing
//! [`PrefetchBuffer::adjust_capacity`] only records the requested capacity.
//! The swap to a queue of the new size happens on a later
//! [`next_id`](PrefetchBuffer::next_id) call, once the current queue is empty
//! and no refill is running, so values already reserved are never dropped.
//!
//! ## Reset
//! [`PrefetchBuffer::reset`] overwrites the remote counter and discards the
//! queued values. A refill that started before the reset notices the bumped
//! generation and stops publishing; the values it reserved are skipped.

use crate::counter::RemoteCounter;
use crate::error::{Error, Result};
use crate::queue::{HandoffQueue, PUT_PAUSE};
use crate::spawn::Spawn;
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Fraction of the queue that must be free before a refill starts.
pub const DEFAULT_VACANCY_RATE: f64 = 0.3;

/// How long [`PrefetchBuffer::next_id`] waits for a value.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest single wait on a queue before the buffer re-checks for refills and
/// resizes.
const POLL_SLICE: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferConfig {
    /// In `(0, 1]`. The refill threshold is `floor(capacity * vacancy_rate)`,
    /// at least 1.
    pub vacancy_rate: f64,
    pub poll_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            vacancy_rate: DEFAULT_VACANCY_RATE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl BufferConfig {
    fn threshold(&self, capacity: usize) -> usize {
        ((capacity as f64 * self.vacancy_rate).floor() as usize).max(1)
    }
}

/// A cloneable handle to a prefetching buffer of counter values.
#[derive(Clone, Debug)]
pub struct PrefetchBuffer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    counter: RemoteCounter,
    increment: i64,
    config: BufferConfig,
    spawner: Arc<dyn Spawn>,
    queue: RwLock<Arc<HandoffQueue<i64>>>,
    pending_capacity: AtomicUsize,
    threshold: AtomicUsize,
    refilling: AtomicBool,
    generation: AtomicU64,
    publish: Mutex<()>,
}

/// Holds the single refill slot; releases it on drop, including on unwind.
struct RefillGuard(Arc<Inner>);

impl Drop for RefillGuard {
    fn drop(&mut self) {
        self.0.refilling.store(false, Ordering::Release);
    }
}

impl PrefetchBuffer {
    /// Creates a buffer of `capacity` values and fills it before returning.
    ///
    /// # Errors
    /// - [`Error::Configuration`] for a zero capacity, a zero increment or a
    ///   vacancy rate outside `(0, 1]`.
    /// - Any error of the initial [`RemoteCounter::add`].
    pub fn new(
        counter: RemoteCounter,
        increment: i64,
        capacity: usize,
        spawner: Arc<dyn Spawn>,
        config: BufferConfig,
    ) -> Result<Self> {
        let name = counter.name().to_owned();
        if increment == 0 {
            return Err(Error::config(&name, "increment must not be 0"));
        }
        if !(config.vacancy_rate > 0.0 && config.vacancy_rate <= 1.0) {
            return Err(Error::config(&name, "vacancy rate must be in (0, 1]"));
        }
        let queue = Arc::new(
            HandoffQueue::new(capacity)
                .map_err(|_| Error::config(&name, "cache size must be greater than 0"))?,
        );

        let inner = Arc::new(Inner {
            name,
            counter,
            increment,
            config,
            spawner,
            queue: RwLock::new(Arc::clone(&queue)),
            pending_capacity: AtomicUsize::new(capacity),
            threshold: AtomicUsize::new(config.threshold(capacity)),
            refilling: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            publish: Mutex::new(()),
        });
        inner.refill(&queue, capacity, 0)?;

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Capacity of the queue currently in use.
    pub fn capacity(&self) -> usize {
        self.inner.current_queue().capacity()
    }

    /// Capacity the buffer will switch to after the next drain.
    pub fn pending_capacity(&self) -> usize {
        self.inner.pending_capacity.load(Ordering::Acquire)
    }

    /// Approximate number of values ready to be handed out.
    pub fn len(&self) -> usize {
        self.inner.current_queue().size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current refill threshold.
    pub fn threshold(&self) -> usize {
        self.inner.threshold.load(Ordering::Acquire)
    }

    /// Returns `true` while a refill task holds the refill slot.
    pub fn is_refilling(&self) -> bool {
        self.inner.refilling.load(Ordering::Acquire)
    }

    /// Takes the next value, scheduling a refill or applying a pending resize
    /// first when due.
    ///
    /// # Errors
    /// [`Error::BufferExhausted`] if no value arrives within the configured
    /// poll timeout.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(sequence = %self.inner.name)))]
    pub fn next_id(&self) -> Result<i64> {
        let timeout = self.inner.config.poll_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let queue = self.inner.schedule();
            let wait = deadline.saturating_duration_since(Instant::now()).min(POLL_SLICE);
            if let Some(id) = queue.poll(wait) {
                return Ok(id);
            }
            if Instant::now() >= deadline {
                return Err(Error::BufferExhausted {
                    name: self.inner.name.clone(),
                    timeout,
                });
            }
        }
    }

    /// Requests a new capacity, applied once the current queue drains.
    ///
    /// # Errors
    /// [`Error::Configuration`] if `capacity` is zero.
    pub fn adjust_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::config(&self.inner.name, "cache size must be greater than 0"));
        }
        let _previous = self.inner.pending_capacity.swap(capacity, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        tracing::info!(
            sequence = %self.inner.name,
            previous = _previous,
            capacity,
            "cache resize requested"
        );
        Ok(())
    }

    /// Overwrites the remote counter with `start` and drops every queued value.
    pub fn reset(&self, start: i64) -> Result<()> {
        self.inner.counter.force_set(start)?;
        let _publish = self.inner.publish.lock();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        let _dropped = self.inner.current_queue().clear();
        #[cfg(feature = "tracing")]
        tracing::info!(sequence = %self.inner.name, start, dropped = _dropped, "buffer reset");
        Ok(())
    }
}

impl Inner {
    fn current_queue(&self) -> Arc<HandoffQueue<i64>> {
        Arc::clone(&self.queue.read())
    }

    fn try_begin_refill(self: &Arc<Self>) -> Option<RefillGuard> {
        self.refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefillGuard(Arc::clone(self)))
    }

    /// A resize is due once the queue is empty; otherwise a refill is due once
    /// enough of it is free.
    fn needs_work(&self, queue: &HandoffQueue<i64>) -> bool {
        let vacant = queue.remaining_capacity();
        if self.pending_capacity.load(Ordering::Acquire) == queue.capacity() {
            vacant >= self.threshold.load(Ordering::Acquire)
        } else {
            vacant == queue.capacity()
        }
    }

    /// Starts a refill or applies a resize when due, and returns the queue to
    /// read from.
    fn schedule(self: &Arc<Self>) -> Arc<HandoffQueue<i64>> {
        let queue = self.current_queue();
        if !self.needs_work(&queue) {
            return queue;
        }
        let Some(guard) = self.try_begin_refill() else {
            return queue;
        };

        // Holding the slot, nothing else can swap or fill. Re-read.
        let queue = self.current_queue();
        if !self.needs_work(&queue) {
            return queue;
        }

        let pending = self.pending_capacity.load(Ordering::Acquire);
        if pending == queue.capacity() {
            let vacant = queue.remaining_capacity();
            self.spawn_refill(guard, Arc::clone(&queue), vacant);
            return queue;
        }

        let Ok(resized) = HandoffQueue::new(pending) else {
            return queue;
        };
        let resized = Arc::new(resized);
        self.threshold
            .store(self.config.threshold(pending), Ordering::Release);
        *self.queue.write() = Arc::clone(&resized);
        #[cfg(feature = "tracing")]
        tracing::info!(
            sequence = %self.name,
            from = queue.capacity(),
            to = pending,
            "cache resize applied"
        );
        self.spawn_refill(guard, Arc::clone(&resized), pending);
        resized
    }

    fn spawn_refill(&self, guard: RefillGuard, queue: Arc<HandoffQueue<i64>>, count: usize) {
        let generation = self.generation.load(Ordering::Acquire);
        let task = Box::new(move || {
            let inner = Arc::clone(&guard.0);
            if let Err(_err) = inner.refill(&queue, count, generation) {
                #[cfg(feature = "tracing")]
                tracing::error!(sequence = %inner.name, count, error = %_err, "refill failed");
            }
            drop(guard);
        });
        if let Err(_err) = self.spawner.spawn(task) {
            #[cfg(feature = "tracing")]
            tracing::error!(sequence = %self.name, error = %_err, "failed to spawn refill");
        }
    }

    /// Reserves `count` values with one remote increment and publishes them in
    /// order. Returns how many were published before a reset cut it short.
    fn refill(&self, queue: &HandoffQueue<i64>, count: usize, generation: u64) -> Result<usize> {
        let delta = i64::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(self.increment))
            .ok_or_else(|| Error::config(&self.name, "refill size overflows the counter"))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(sequence = %self.name, count, delta, "refill started");
        let (start, _end) = self.counter.add(delta)?;

        let mut value = start;
        for published in 0..count {
            if !self.publish(queue, value, generation) {
                #[cfg(feature = "tracing")]
                tracing::info!(sequence = %self.name, published, "refill abandoned after reset");
                return Ok(published);
            }
            value = value.wrapping_add(self.increment);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(sequence = %self.name, start, end = _end, count, "refill finished");
        Ok(count)
    }

    /// Puts `value` unless a reset happened since `generation` was taken.
    ///
    /// Waits for space outside the publish lock, so a reset never waits on a
    /// full queue.
    fn publish(&self, queue: &HandoffQueue<i64>, value: i64, generation: u64) -> bool {
        loop {
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            if queue.remaining_capacity() > 0 {
                break;
            }
            std::thread::sleep(PUT_PAUSE);
        }
        let _publish = self.publish.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        queue.put(value);
        true
    }
}
