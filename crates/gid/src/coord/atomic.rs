use super::{Coordinator, RetryPolicy, normalize_path};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Outcome of a [`DistributedAtomicLong`] operation.
///
/// When `succeeded` is `false` the counter was not changed and both values
/// hold the last observed counter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtomicValue {
    pub succeeded: bool,
    pub pre_value: i64,
    pub post_value: i64,
}

impl AtomicValue {
    const fn applied(pre_value: i64, post_value: i64) -> Self {
        Self {
            succeeded: true,
            pre_value,
            post_value,
        }
    }

    const fn rejected(current: i64) -> Self {
        Self {
            succeeded: false,
            pre_value: current,
            post_value: current,
        }
    }
}

enum Attempt {
    Applied(AtomicValue),
    Raced(i64),
}

/// Why one optimistic cycle did not apply.
#[derive(Debug)]
enum Failure {
    /// Another writer got in first; holds the value it left.
    Raced(i64),
    Coordinator(Error),
}

impl Failure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Raced(_) => true,
            Self::Coordinator(err) => err.is_transient(),
        }
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Self::Coordinator(err)
    }
}

impl core::fmt::Display for Failure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Raced(current) => write!(f, "lost update race at value {current}"),
            Self::Coordinator(err) => write!(f, "{err}"),
        }
    }
}

/// A 64-bit counter stored in a coordinator node.
///
/// The payload is the value as 8 big-endian bytes; a missing or empty node
/// reads as `0`. Every mutation is an optimistic read, compute, versioned
/// write cycle, so concurrent writers in any number of processes never lose
/// an update. Lost races and transient coordinator errors are retried under
/// the configured [`RetryPolicy`]; once it is spent a lost race is reported
/// as an unsuccessful [`AtomicValue`] and a coordinator error is returned as
/// is.
#[derive(Clone, Debug)]
pub struct DistributedAtomicLong {
    coordinator: Arc<dyn Coordinator>,
    path: String,
    policy: RetryPolicy,
}

impl DistributedAtomicLong {
    /// Binds a counter to `path`. Nothing is read or written yet.
    pub fn new(coordinator: Arc<dyn Coordinator>, path: &str, policy: RetryPolicy) -> Result<Self> {
        Ok(Self {
            coordinator,
            path: normalize_path(path)?,
            policy,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Creates the node with `value` if it does not exist yet.
    ///
    /// Returns `false` when the counter was already initialized; its current
    /// value is left as is.
    pub fn initialize(&self, value: i64) -> Result<bool> {
        self.policy
            .run(|| self.coordinator.set_versioned(&self.path, &encode(value), None))
    }

    /// Reads the current value. Both `pre_value` and `post_value` hold it.
    pub fn get(&self) -> Result<AtomicValue> {
        let current = self.policy.run(|| match self.coordinator.get_data(&self.path)? {
            Some(data) => decode(&self.path, &data),
            None => Ok(0),
        })?;
        Ok(AtomicValue::applied(current, current))
    }

    /// Adds `delta` (wrapping on overflow).
    pub fn add(&self, delta: i64) -> Result<AtomicValue> {
        self.apply(|current| current.wrapping_add(delta))
    }

    /// Sets the counter to `new_value` only if it currently equals `expected`.
    ///
    /// A value mismatch is not retried.
    pub fn compare_and_set(&self, expected: i64, new_value: i64) -> Result<AtomicValue> {
        self.optimistic(|| {
            match self.try_apply(|current| (current == expected).then_some(new_value))? {
                Attempt::Applied(value) => Ok(value),
                Attempt::Raced(current) if current != expected => {
                    Ok(AtomicValue::rejected(current))
                }
                Attempt::Raced(current) => Err(Failure::Raced(current)),
            }
        })
    }

    /// Overwrites the counter regardless of its current value.
    pub fn force_set(&self, value: i64) -> Result<()> {
        self.policy
            .run(|| self.coordinator.set_data(&self.path, &encode(value)))
    }

    fn apply(&self, f: impl Fn(i64) -> i64) -> Result<AtomicValue> {
        self.optimistic(|| match self.try_apply(|current| Some(f(current)))? {
            Attempt::Applied(value) => Ok(value),
            Attempt::Raced(current) => Err(Failure::Raced(current)),
        })
    }

    /// Retries `op` on lost races and transient errors. A race still lost
    /// once the policy is spent becomes an unsuccessful [`AtomicValue`].
    fn optimistic(
        &self,
        op: impl FnMut() -> core::result::Result<AtomicValue, Failure>,
    ) -> Result<AtomicValue> {
        match self.policy.retry_when(op, Failure::is_retryable, &self.path) {
            Ok(value) => Ok(value),
            Err(Failure::Raced(current)) => Ok(AtomicValue::rejected(current)),
            Err(Failure::Coordinator(err)) => Err(err),
        }
    }

    /// One optimistic cycle. `f` returning `None` leaves the node untouched
    /// and reports the observed value as a race.
    fn try_apply(&self, f: impl Fn(i64) -> Option<i64>) -> Result<Attempt> {
        let (current, version) = match self.coordinator.get_versioned(&self.path)? {
            Some(node) => (decode(&self.path, &node.data)?, Some(node.version)),
            None => (0, None),
        };
        let Some(next) = f(current) else {
            return Ok(Attempt::Raced(current));
        };
        if self
            .coordinator
            .set_versioned(&self.path, &encode(next), version)?
        {
            Ok(Attempt::Applied(AtomicValue::applied(current, next)))
        } else {
            Ok(Attempt::Raced(current))
        }
    }
}

fn encode(value: i64) -> [u8; 8] {
    value.to_be_bytes()
}

fn decode(path: &str, data: &[u8]) -> Result<i64> {
    if data.is_empty() {
        return Ok(0);
    }
    let bytes: [u8; 8] = data.try_into().map_err(|_| {
        Error::Parse(format!(
            "counter at {path} holds {} bytes, expected 8",
            data.len()
        ))
    })?;
    Ok(i64::from_be_bytes(bytes))
}
