//! Worker id resolution for the clock-driven engines.
//!
//! A worker id is looked up once per engine, in this order:
//!
//! 1. an explicit process-level override,
//! 2. the coordinator node `/workers/<sys_id>` (decimal text), which is also
//!    copied to the fallback file on success,
//! 3. the fallback file `<cache_dir>/<sys_id>`.
//!
//! A source that is missing, unreachable or unparsable is skipped with a
//! warning. If every source is skipped, or the id does not fit the engine's
//! worker field, resolution fails.

use crate::coord::{Coordinator, WORKERS_ROOT, make_path};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory name of the default fallback location under `$HOME`.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".gid";

/// Where a resolved worker id came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerSource {
    Override,
    Coordinator,
    Fallback,
}

#[derive(Clone, Debug)]
pub struct WorkerIdResolver {
    sys_id: String,
    override_id: Option<u64>,
    coordinator: Option<Arc<dyn Coordinator>>,
    cache_dir: PathBuf,
}

impl WorkerIdResolver {
    /// A resolver for the process identity `sys_id`, with no override, no
    /// coordinator and the default fallback directory.
    pub fn new(sys_id: impl Into<String>) -> Self {
        Self {
            sys_id: sys_id.into(),
            override_id: None,
            coordinator: None,
            cache_dir: default_cache_dir(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, worker_id: Option<u64>) -> Self {
        self.override_id = worker_id;
        self
    }

    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn sys_id(&self) -> &str {
        &self.sys_id
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the local fallback file.
    pub fn fallback_path(&self) -> PathBuf {
        self.cache_dir.join(&self.sys_id)
    }

    /// Resolves the worker id for sequence `name`, requiring it to be at most
    /// `max`.
    ///
    /// # Errors
    /// [`Error::WorkerIdResolution`] when no source yields an id or the id is
    /// greater than `max`.
    pub fn resolve(&self, name: &str, max: u64) -> Result<(u64, WorkerSource)> {
        let (worker_id, source) = self.lookup(name)?;
        if worker_id > max {
            return Err(Error::WorkerIdResolution {
                name: name.to_owned(),
                reason: format!(
                    "worker id {worker_id} from {source:?} can't be greater than {max} or less than 0"
                ),
            });
        }
        #[cfg(feature = "tracing")]
        tracing::info!(sequence = name, worker_id, ?source, "resolved worker id");
        Ok((worker_id, source))
    }

    fn lookup(&self, name: &str) -> Result<(u64, WorkerSource)> {
        if let Some(worker_id) = self.override_id {
            return Ok((worker_id, WorkerSource::Override));
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(sequence = name, "skip over getting worker id from override");

        if let Some(worker_id) = self.from_coordinator() {
            if let Err(_err) = self.persist(worker_id) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    path = %self.fallback_path().display(),
                    error = %_err,
                    "failed to write worker id fallback file"
                );
            }
            return Ok((worker_id, WorkerSource::Coordinator));
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(sequence = name, "skip over getting worker id from coordinator");

        if let Some(worker_id) = self.from_file() {
            return Ok((worker_id, WorkerSource::Fallback));
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(sequence = name, "skip over getting worker id from fallback file");

        Err(Error::WorkerIdResolution {
            name: name.to_owned(),
            reason: format!(
                "no worker id for '{}' from override, coordinator or {}",
                self.sys_id,
                self.fallback_path().display()
            ),
        })
    }

    fn from_coordinator(&self) -> Option<u64> {
        let coordinator = self.coordinator.as_ref()?;
        if !coordinator.is_connected() {
            return None;
        }
        let data = coordinator
            .get_data(&make_path(WORKERS_ROOT, &self.sys_id))
            .ok()??;
        parse_worker_id(&String::from_utf8_lossy(&data))
    }

    fn from_file(&self) -> Option<u64> {
        let text = std::fs::read_to_string(self.fallback_path()).ok()?;
        parse_worker_id(text.lines().next()?)
    }

    fn persist(&self, worker_id: u64) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::write(self.fallback_path(), worker_id.to_string())
    }
}

fn parse_worker_id(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse().ok()
}

/// `$HOME/.gid`, or `.gid` under the system temp dir when `HOME` is unset.
pub fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(DEFAULT_CACHE_DIR_NAME)
}
