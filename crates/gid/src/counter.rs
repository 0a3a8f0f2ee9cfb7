//! Adapter over a coordinator-hosted counter.
//!
//! [`RemoteCounter`] is the only way the coordination-backed engine touches
//! its shared counter. It layers an outer attempt budget for lost CAS races on
//! top of [`DistributedAtomicLong`], whose own [`RetryPolicy`] already absorbs
//! short coordinator hiccups.

use crate::coord::{Coordinator, DistributedAtomicLong, RetryPolicy, SEQUENCES_ROOT, make_path};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Number of lost-race rounds [`RemoteCounter::add`] tolerates before giving
/// up.
pub const DEFAULT_ADD_ATTEMPTS: u32 = 128;

#[derive(Clone, Debug)]
pub struct RemoteCounter {
    name: String,
    atomic: DistributedAtomicLong,
    max_attempts: u32,
}

impl RemoteCounter {
    /// Binds to the counter of sequence `name` under `/sequences` with the
    /// default retry settings.
    pub fn open(coordinator: Arc<dyn Coordinator>, name: &str) -> Result<Self> {
        Self::with_policy(coordinator, name, RetryPolicy::default(), DEFAULT_ADD_ATTEMPTS)
    }

    pub fn with_policy(
        coordinator: Arc<dyn Coordinator>,
        name: &str,
        policy: RetryPolicy,
        max_attempts: u32,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::config(name, "counter attempt budget must be greater than 0"));
        }
        let atomic = DistributedAtomicLong::new(coordinator, &make_path(SEQUENCES_ROOT, name), policy)?;
        Ok(Self {
            name: name.to_owned(),
            atomic,
            max_attempts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the initial value. Returns `false` if the counter already existed,
    /// in which case the stored value is authoritative.
    pub fn initialize(&self, start: i64) -> Result<bool> {
        self.atomic.initialize(start)
    }

    /// Reads the stored value.
    pub fn current(&self) -> Result<i64> {
        Ok(self.atomic.get()?.post_value)
    }

    /// Adds `delta` and returns the `(pre, post)` values.
    ///
    /// # Errors
    /// - [`Error::CoordinationUnavailable`] if the coordinator stays
    ///   unreachable past the retry policy, or the increment keeps losing
    ///   races for the whole attempt budget.
    pub fn add(&self, delta: i64) -> Result<(i64, i64)> {
        for _ in 0..self.max_attempts {
            let value = self.atomic.add(delta)?;
            if value.succeeded {
                return Ok((value.pre_value, value.post_value));
            }
            std::thread::yield_now();
        }
        Err(Error::unavailable(format!(
            "adding {delta} to '{}' lost {} consecutive races",
            self.name, self.max_attempts
        )))
    }

    /// Overwrites the stored value unconditionally.
    pub fn force_set(&self, value: i64) -> Result<()> {
        self.atomic.force_set(value)
    }
}
