use core::fmt;

/// A boxed unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A trait that abstracts over where background refills run.
///
/// Each prefetch buffer is handed one explicit `Arc<dyn Spawn>` instead of
/// reaching for a process-wide pool, so tests and embedders decide how refill
/// work is scheduled.
///
/// Tasks run blocking coordinator calls and may busy-wait on a full queue, so
/// implementations must not run them on an async reactor thread.
pub trait Spawn: Send + Sync + fmt::Debug {
    /// Starts `task` in the background.
    ///
    /// # Errors
    /// Returns an error if the task could not be scheduled. The task is
    /// dropped in that case.
    fn spawn(&self, task: Task) -> std::io::Result<()>;
}

/// Runs every task on a fresh, named OS thread.
#[derive(Clone, Debug)]
pub struct ThreadSpawner {
    name: String,
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new("gid-refill")
    }
}

impl ThreadSpawner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Spawn for ThreadSpawner {
    fn spawn(&self, task: Task) -> std::io::Result<()> {
        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(task)
            .map(drop)
    }
}

/// Runs every task on the blocking pool of a [`tokio`](https://docs.rs/tokio)
/// runtime.
#[cfg(feature = "async-tokio")]
#[derive(Clone, Debug)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "async-tokio")]
impl TokioSpawner {
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime the caller is running in.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

#[cfg(feature = "async-tokio")]
impl Spawn for TokioSpawner {
    fn spawn(&self, task: Task) -> std::io::Result<()> {
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}
