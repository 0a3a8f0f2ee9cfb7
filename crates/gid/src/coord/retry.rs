use crate::error::Result;
use backon::{BlockingRetryable, ExponentialBuilder};
use core::fmt::Display;
use core::time::Duration;

/// Bounded retry with capped exponential backoff.
///
/// `max_attempts` counts the first try, so a policy with `max_attempts == 3`
/// runs an operation at most three times and sleeps at most twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs an operation `max_attempts` times with a fixed pause.
    pub const fn n_times(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
        }
    }

    /// A policy that never sleeps and never retries.
    pub const fn once() -> Self {
        Self::n_times(1, Duration::ZERO)
    }

    /// Exponential backoff doubling from `base_delay` up to `max_delay`, with
    /// `max_attempts - 1` retries.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub fn run<T>(&self, op: impl FnMut() -> Result<T>) -> Result<T> {
        self.retry_when(op, crate::error::Error::is_transient, "coordinator call")
    }

    /// Runs `op` under this policy, retrying the errors `when` accepts.
    pub(crate) fn retry_when<T, E: Display>(
        &self,
        op: impl FnMut() -> core::result::Result<T, E>,
        when: impl FnMut(&E) -> bool,
        _context: &str,
    ) -> core::result::Result<T, E> {
        op.retry(self.backoff())
            .when(when)
            .notify(|_err: &E, _delay: Duration| {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    context = _context,
                    error = %_err,
                    retry_in = ?_delay,
                    "coordinator operation failed, retrying"
                );
            })
            .call()
    }
}
