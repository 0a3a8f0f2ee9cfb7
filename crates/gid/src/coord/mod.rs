//! Coordination service seam.
//!
//! The engines never talk to a concrete coordination service. They go through
//! [`Coordinator`], a small hierarchical key/value interface modelled on what a
//! ZooKeeper-style service offers: slash-separated paths, parent creation,
//! recursive deletes, and versioned conditional writes. The distributed counter
//! recipe ([`DistributedAtomicLong`]) is built only on top of those versioned
//! writes, so any backend that can do a compare-and-set on a node version can
//! host the remote counters.
//!
//! [`MemoryCoordinator`] is the in-process implementation used by tests,
//! benchmarks and single-process deployments.

mod atomic;
mod memory;
mod retry;

pub use atomic::*;
pub use memory::*;
pub use retry::*;

use crate::error::{Error, Result};
use core::fmt;
use core::time::Duration;

/// Namespace holding one node per process identity, valued with its worker id.
pub const WORKERS_ROOT: &str = "/workers";

/// Namespace holding one counter node per coordination-backed sequence.
pub const SEQUENCES_ROOT: &str = "/sequences";

/// Default time to wait for a coordinator connection.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Node payload together with the version used for conditional writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned {
    pub data: Vec<u8>,
    pub version: u64,
}

/// A hierarchical coordination service.
///
/// All methods may fail with [`Error::CoordinationUnavailable`] when the
/// service cannot be reached. Callers decide whether to retry.
pub trait Coordinator: Send + Sync + fmt::Debug {
    /// Waits up to `timeout` for a live connection and reports whether one was
    /// established.
    fn block_until_connected(&self, timeout: Duration) -> bool;

    /// Returns whether the connection is currently live.
    fn is_connected(&self) -> bool;

    /// Returns whether a node exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Creates a node at `path`, creating missing parents with empty payloads.
    ///
    /// Returns `false` if the node already existed, in which case its payload
    /// is left untouched.
    fn create(&self, path: &str, data: &[u8]) -> Result<bool>;

    /// Deletes the node at `path` and everything below it. Deleting a missing
    /// node is not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// Reads the payload at `path`, or `None` if there is no such node.
    fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrites the payload at `path` unconditionally, creating the node and
    /// its parents if needed.
    fn set_data(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Lists the names (not full paths) of the direct children of `path`.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Reads the payload and version at `path`.
    fn get_versioned(&self, path: &str) -> Result<Option<Versioned>>;

    /// Conditionally writes `data` at `path`.
    ///
    /// - `expected == None`: create the node (and parents) only if it does not
    ///   exist.
    /// - `expected == Some(v)`: overwrite only if the current version is `v`.
    ///
    /// Returns `true` if the write was applied.
    fn set_versioned(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<bool>;
}

/// Joins a parent path and a child name into a normalized absolute path.
///
/// ```
/// use gid::coord::make_path;
///
/// assert_eq!(make_path("/sequences", "order"), "/sequences/order");
/// assert_eq!(make_path("/workers/", "/10.0.0.1-8080"), "/workers/10.0.0.1-8080");
/// assert_eq!(make_path("/", "x"), "/x");
/// ```
pub fn make_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_matches('/');
    if child.is_empty() {
        if parent.is_empty() {
            "/".to_owned()
        } else {
            parent.to_owned()
        }
    } else {
        format!("{parent}/{child}")
    }
}

/// Validates and normalizes an absolute node path.
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::config(path, "coordinator paths must be absolute"));
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_owned());
    }
    if trimmed.split('/').skip(1).any(str::is_empty) {
        return Err(Error::config(path, "coordinator paths must not contain empty segments"));
    }
    Ok(trimmed.to_owned())
}
