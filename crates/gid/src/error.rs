//! Error types for identifier generation.
//!
//! Every failure in the engine is either retried under an explicit, bounded
//! policy or reported to the caller as one of the variants below. No variant
//! is ever produced by substituting a different identifier.
//!
//! ## Error Cases
//! - `Configuration`: a definition or tunable is out of range.
//! - `ClockMovedBackwards`: the observed tick precedes the last issued tick.
//! - `ClockBeforeEpoch`: the observed tick precedes the binary layout's epoch.
//! - `WorkerIdResolution`: no source yielded a usable worker id.
//! - `CoordinationUnavailable`: the coordination service failed past the retry
//!   budget.
//! - `BufferExhausted`: the prefetch buffer stayed empty for the poll timeout.
//! - `Unsupported`: the operation does not apply to this engine kind.
//! - `DuplicateDefinition` / `UnknownSequence` / `NotStarted`: registry errors.

use core::time::Duration;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `gid` can emit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A sequence definition or engine tunable failed validation.
    #[error("invalid definition for '{name}': {reason}")]
    Configuration { name: String, reason: String },

    /// The clock reported a tick earlier than the last one used.
    #[error("clock moved backwards for '{name}', refusing to generate id for {delta} ticks")]
    ClockMovedBackwards { name: String, delta: u64 },

    /// The clock reads earlier than the epoch of the binary layout.
    #[error("clock for '{name}' reads {tick}, before the id epoch {epoch}")]
    ClockBeforeEpoch { name: String, tick: u64, epoch: u64 },

    /// No worker id could be resolved, or the resolved id is out of range.
    #[error("cannot resolve worker id for '{name}': {reason}")]
    WorkerIdResolution { name: String, reason: String },

    /// The coordination service could not serve the request within the retry
    /// budget.
    #[error("coordination service unavailable: {context}")]
    CoordinationUnavailable { context: String },

    /// No pre-minted identifier became available within the poll timeout.
    #[error("id buffer for '{name}' is empty after {timeout:?}, maybe too fast to get")]
    BufferExhausted { name: String, timeout: Duration },

    /// The engine kind does not support this operation.
    #[error("sequence '{name}' does not support {operation}()")]
    Unsupported {
        name: String,
        operation: &'static str,
    },

    /// A sequence with this name is already registered.
    #[error("sequence '{name}' already exists")]
    DuplicateDefinition { name: String },

    /// No sequence with this name is registered.
    #[error("sequence '{name}' not exists")]
    UnknownSequence { name: String },

    /// The registry has not been started.
    #[error("sequencer is not started")]
    NotStarted,

    /// Reading a definition or fallback file failed.
    #[error("io error: {0}")]
    Io(String),

    /// A definition document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    pub(crate) fn config(name: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(context: impl Into<String>) -> Self {
        Self::CoordinationUnavailable {
            context: context.into(),
        }
    }

    /// Returns `true` for failures that may clear up on their own, such as an
    /// empty buffer waiting on a refill or a coordinator partition.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BufferExhausted { .. } | Self::CoordinationUnavailable { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
