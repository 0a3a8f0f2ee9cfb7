use crate::buffer::{BufferConfig, PrefetchBuffer};
use crate::coord::Coordinator;
use crate::counter::RemoteCounter;
use crate::error::{Error, Result};
use crate::spawn::Spawn;
use parking_lot::RwLock;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters of a coordination-backed sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterSettings {
    /// Number of values fetched ahead of time; `0` disables the buffer.
    pub cache: usize,
    /// Step between consecutive values. May be negative, never zero.
    pub increment: i64,
    /// Value of the counter when it is first created.
    pub start: i64,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            cache: 0,
            increment: 1,
            start: 0,
        }
    }
}

/// A coordination-backed identifier engine.
///
/// Values come from a counter shared by every process that opens the same
/// sequence name, so they are unique cluster-wide. Without a cache each
/// [`next_id`](Self::next_id) is one remote increment and returns the value
/// before it. With a cache the engine serves values from a
/// [`PrefetchBuffer`].
///
/// # Example
/// ```
/// use gid::coord::MemoryCoordinator;
/// use gid::generator::{BreadcrumbEngine, CounterSettings};
/// use gid::spawn::ThreadSpawner;
/// use std::sync::Arc;
///
/// let engine = BreadcrumbEngine::new(
///     "invoice",
///     Arc::new(MemoryCoordinator::new()),
///     CounterSettings { start: 100, ..CounterSettings::default() },
///     Arc::new(ThreadSpawner::default()),
///     Default::default(),
/// )
/// .unwrap();
/// assert_eq!(engine.next_id().unwrap(), 100);
/// assert_eq!(engine.next_id().unwrap(), 101);
/// ```
#[derive(Debug)]
pub struct BreadcrumbEngine {
    name: String,
    counter: RemoteCounter,
    increment: i64,
    spawner: Arc<dyn Spawn>,
    config: BufferConfig,
    buffer: RwLock<Option<PrefetchBuffer>>,
}

impl BreadcrumbEngine {
    /// Opens the counter of `name`, creating it at `settings.start` if needed,
    /// and fills the buffer when `settings.cache > 0`.
    ///
    /// # Errors
    /// - [`Error::CoordinationUnavailable`] if `coordinator` is not connected
    ///   or the counter cannot be initialized.
    /// - [`Error::Configuration`] for a zero increment.
    pub fn new(
        name: &str,
        coordinator: Arc<dyn Coordinator>,
        settings: CounterSettings,
        spawner: Arc<dyn Spawn>,
        config: BufferConfig,
    ) -> Result<Self> {
        if settings.increment == 0 {
            return Err(Error::config(name, "increment must not be 0"));
        }
        if !coordinator.is_connected() {
            return Err(Error::unavailable(format!(
                "coordinator is not connected, cannot open '{name}'"
            )));
        }

        let counter = RemoteCounter::open(coordinator, name)?;
        if !counter.initialize(settings.start)? {
            let _current = counter.current()?;
            #[cfg(feature = "tracing")]
            tracing::info!(sequence = name, current = _current, "counter already initialized");
        }

        let buffer = match settings.cache {
            0 => None,
            cache => Some(PrefetchBuffer::new(
                counter.clone(),
                settings.increment,
                cache,
                Arc::clone(&spawner),
                config,
            )?),
        };

        Ok(Self {
            name: name.to_owned(),
            counter,
            increment: settings.increment,
            spawner,
            config,
            buffer: RwLock::new(buffer),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn increment(&self) -> i64 {
        self.increment
    }

    /// Returns `true` once the engine serves values from a buffer.
    pub fn is_cached(&self) -> bool {
        self.buffer.read().is_some()
    }

    /// The buffer, if caching is on.
    pub fn buffer(&self) -> Option<PrefetchBuffer> {
        self.buffer.read().clone()
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(sequence = %self.name)))]
    pub fn next_id(&self) -> Result<i64> {
        if let Some(buffer) = self.buffer() {
            return buffer.next_id();
        }
        let (id, _) = self.counter.add(self.increment)?;
        Ok(id)
    }

    /// Restarts the sequence at `start`, discarding buffered values.
    pub fn reset(&self, start: i64) -> Result<()> {
        match self.buffer() {
            Some(buffer) => buffer.reset(start),
            None => {
                self.counter.force_set(start)?;
                #[cfg(feature = "tracing")]
                tracing::info!(sequence = %self.name, start, "counter reset");
                Ok(())
            }
        }
    }

    /// Changes the buffer size. On an uncached engine the first call turns
    /// caching on with a buffer of `cache` values.
    ///
    /// # Errors
    /// [`Error::Configuration`] if `cache` is zero.
    pub fn adjust_cache(&self, cache: usize) -> Result<()> {
        if cache == 0 {
            return Err(Error::config(&self.name, "cache size must be greater than 0"));
        }
        let mut slot = self.buffer.write();
        match slot.as_ref() {
            Some(buffer) => buffer.adjust_capacity(cache),
            None => {
                #[cfg(feature = "tracing")]
                tracing::info!(sequence = %self.name, cache, "enabling cache");
                let buffer = PrefetchBuffer::new(
                    self.counter.clone(),
                    self.increment,
                    cache,
                    Arc::clone(&self.spawner),
                    self.config,
                )?;
                *slot = Some(buffer);
                Ok(())
            }
        }
    }
}
