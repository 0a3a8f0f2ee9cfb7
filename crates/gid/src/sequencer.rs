//! Registry of named sequences.
//!
//! The [`Sequencer`] owns the coordinator handle, the refill executor and the
//! process identity, and maps each sequence name to its [`Engine`]. Every
//! lookup requires the registry to be started; names are trimmed before use.

use crate::buffer::BufferConfig;
use crate::coord::{Coordinator, DEFAULT_CONNECTION_TIMEOUT, SEQUENCES_ROOT, WORKERS_ROOT};
use crate::def::{SequenceDefinition, load_definitions};
use crate::engine::{Engine, EngineContext};
use crate::error::{Error, Result};
use crate::generator::SpinConfig;
use crate::spawn::Spawn;
use crate::worker::default_cache_dir;
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-level settings for a [`Sequencer`].
#[derive(Clone, Debug, PartialEq)]
pub struct SequencerConfig {
    /// Identity of this process, e.g. `10.0.0.1-8080`. Keys the worker id
    /// lookup.
    pub sys_id: String,
    /// Worker id that overrides every other source.
    pub worker_id: Option<u64>,
    /// Directory holding the worker id fallback file.
    pub cache_dir: PathBuf,
    pub connection_timeout: Duration,
    pub buffer: BufferConfig,
    pub spin: SpinConfig,
}

impl SequencerConfig {
    pub fn new(sys_id: impl Into<String>) -> Self {
        Self {
            sys_id: sys_id.into(),
            worker_id: None,
            cache_dir: default_cache_dir(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            buffer: BufferConfig::default(),
            spin: SpinConfig::default(),
        }
    }

    /// Identity built from a host address and port, as `<ip>-<port>`.
    pub fn for_endpoint(ip: &str, port: u16) -> Self {
        Self::new(format!("{ip}-{port}"))
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: Option<u64>) -> Self {
        self.worker_id = worker_id;
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub const fn with_spin(mut self, spin: SpinConfig) -> Self {
        self.spin = spin;
        self
    }
}

#[derive(Debug)]
pub struct Sequencer {
    context: EngineContext,
    connected: bool,
    started: AtomicBool,
    sequences: RwLock<BTreeMap<String, Arc<Engine>>>,
}

impl Sequencer {
    /// Connects to `coordinator` (bounded by the configured timeout) and, when
    /// connected, makes sure `/workers` and `/sequences` exist.
    ///
    /// A missing connection is not an error here: clock sequences can still
    /// fall back to an override or a cached worker id. Coordination-backed
    /// sequences fail when added.
    pub fn new(config: SequencerConfig, coordinator: Arc<dyn Coordinator>, spawner: Arc<dyn Spawn>) -> Self {
        let connected = coordinator.block_until_connected(config.connection_timeout);
        #[cfg(feature = "tracing")]
        tracing::info!(sys_id = %config.sys_id, connected, "coordinator connection");
        if connected {
            create_required_nodes(coordinator.as_ref());
        }

        let mut context = EngineContext::new(coordinator, spawner, config.sys_id);
        context.workers = context
            .workers
            .with_override(config.worker_id)
            .with_cache_dir(config.cache_dir);
        context.buffer = config.buffer;
        context.spin = config.spin;

        Self {
            context,
            connected,
            started: AtomicBool::new(false),
            sequences: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn sys_id(&self) -> &str {
        self.context.workers.sys_id()
    }

    /// Whether the coordinator was reachable at construction.
    pub const fn was_connected(&self) -> bool {
        self.connected
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Starts the registry and adds `definitions`. Calling it on a started
    /// registry only logs a warning.
    ///
    /// # Errors
    /// The first error from [`add`](Self::add); definitions before it stay
    /// registered.
    pub fn startup(&self, definitions: impl IntoIterator<Item = SequenceDefinition>) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("sequencer is already started");
            return Ok(());
        }
        definitions.into_iter().try_for_each(|definition| self.add(definition))
    }

    /// Starts the registry with the definitions in the file at `path`.
    pub fn startup_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let definitions = load_definitions(path)?;
        #[cfg(feature = "tracing")]
        if definitions.is_empty() {
            tracing::warn!("no sequence definitions to load");
        }
        self.startup(definitions)
    }

    /// Starts the registry without adding anything.
    pub fn startup_without_load(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Stops the registry. Registered sequences are kept but unreachable until
    /// the next start.
    pub fn shutdown(&self) {
        if self
            .started
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("sequencer is already closed");
        }
    }

    /// Validates `definition`, builds its engine and registers it.
    ///
    /// # Errors
    /// - [`Error::NotStarted`]
    /// - [`Error::DuplicateDefinition`] if the trimmed name is taken.
    /// - Any error from [`Engine::create`].
    pub fn add(&self, definition: SequenceDefinition) -> Result<()> {
        self.ensure_started()?;
        let definition = definition.validated()?;
        if self.sequences.read().contains_key(&definition.name) {
            return Err(Error::DuplicateDefinition {
                name: definition.name,
            });
        }

        let engine = Arc::new(Engine::create(&definition, &self.context)?);

        let mut sequences = self.sequences.write();
        if sequences.contains_key(&definition.name) {
            return Err(Error::DuplicateDefinition {
                name: definition.name,
            });
        }
        #[cfg(feature = "tracing")]
        tracing::info!(sequence = %definition.name, kind = engine.kind(), "added sequence");
        sequences.insert(definition.name, engine);
        Ok(())
    }

    /// Looks up the engine registered as `name`.
    pub fn get(&self, name: &str) -> Result<Arc<Engine>> {
        self.ensure_started()?;
        let name = name.trim();
        self.sequences
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSequence {
                name: name.to_owned(),
            })
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Result<Vec<String>> {
        self.ensure_started()?;
        Ok(self.sequences.read().keys().cloned().collect())
    }

    pub fn next_id(&self, name: &str) -> Result<i64> {
        self.get(name)?.next_id()
    }

    pub fn reset(&self, name: &str, start: i64) -> Result<()> {
        self.get(name)?.reset(start)
    }

    pub fn adjust_cache(&self, name: &str, cache: usize) -> Result<()> {
        self.get(name)?.adjust_cache(cache)
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(Error::NotStarted)
        }
    }
}

fn create_required_nodes(coordinator: &dyn Coordinator) {
    for root in [WORKERS_ROOT, SEQUENCES_ROOT] {
        match coordinator.exists(root) {
            Ok(true) => {}
            Ok(false) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = root, "required node missing, creating it");
                if let Err(_err) = coordinator.create(root, &[]) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(path = root, error = %_err, "failed to create required node");
                }
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = root, error = %_err, "failed to check required node");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryCoordinator;
    use crate::spawn::ThreadSpawner;
    use std::collections::HashSet;
    use std::thread::scope;
    use tempfile::TempDir;

    fn sequencer(coord: &Arc<MemoryCoordinator>, dir: &TempDir) -> Sequencer {
        let config = SequencerConfig::for_endpoint("10.0.0.1", 8080)
            .with_worker_id(Some(12))
            .with_cache_dir(dir.path())
            .with_connection_timeout(Duration::from_millis(50));
        Sequencer::new(config, coord.clone(), Arc::new(ThreadSpawner::default()))
    }

    #[test]
    fn creates_required_nodes() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let sequencer = sequencer(&coord, &dir);
        assert!(sequencer.was_connected());
        assert_eq!(sequencer.sys_id(), "10.0.0.1-8080");
        assert!(coord.exists("/workers").unwrap());
        assert!(coord.exists("/sequences").unwrap());
    }

    #[test]
    fn requires_start() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let sequencer = sequencer(&coord, &dir);

        assert_eq!(sequencer.next_id("a"), Err(Error::NotStarted));
        assert_eq!(
            sequencer.add(SequenceDefinition::snowflake("a")),
            Err(Error::NotStarted)
        );

        sequencer.startup_without_load();
        assert!(sequencer.is_started());
        sequencer.add(SequenceDefinition::snowflake("a")).unwrap();
        assert!(sequencer.next_id("a").is_ok());

        sequencer.shutdown();
        assert!(!sequencer.is_started());
        assert_eq!(sequencer.next_id("a"), Err(Error::NotStarted));
        sequencer.shutdown();
    }

    #[test]
    fn names_are_trimmed_and_unique() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let sequencer = sequencer(&coord, &dir);
        sequencer
            .startup([
                SequenceDefinition::snowflake(" trace "),
                SequenceDefinition::breadcrumb("order"),
            ])
            .unwrap();

        assert_eq!(sequencer.names().unwrap(), vec!["order", "trace"]);
        assert!(sequencer.get("  trace").is_ok());
        assert_eq!(
            sequencer.add(SequenceDefinition::ticktock("trace ")),
            Err(Error::DuplicateDefinition {
                name: "trace".into()
            })
        );
        assert_eq!(
            sequencer.next_id("missing").unwrap_err(),
            Error::UnknownSequence {
                name: "missing".into()
            }
        );
    }

    #[test]
    fn second_startup_is_ignored() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let sequencer = sequencer(&coord, &dir);
        sequencer.startup([SequenceDefinition::snowflake("a")]).unwrap();
        sequencer.startup([SequenceDefinition::snowflake("b")]).unwrap();
        assert_eq!(sequencer.names().unwrap(), vec!["a"]);
    }

    #[test]
    fn invalid_definition_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let sequencer = sequencer(&coord, &dir);
        sequencer.startup_without_load();
        let err = sequencer
            .add(SequenceDefinition::snowflake("bad").with_widths(10, 11))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(sequencer.names().unwrap().is_empty());
    }

    #[test]
    fn routes_counter_operations() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let sequencer = sequencer(&coord, &dir);
        sequencer
            .startup([
                SequenceDefinition::breadcrumb("order").with_counter(0, 1, 100),
                SequenceDefinition::ticktock("trace"),
            ])
            .unwrap();

        assert_eq!(sequencer.next_id("order").unwrap(), 100);
        sequencer.reset("order", 5).unwrap();
        assert_eq!(sequencer.next_id("order").unwrap(), 5);
        sequencer.adjust_cache("order", 10).unwrap();
        assert_eq!(sequencer.next_id("order").unwrap(), 6);

        assert!(matches!(
            sequencer.reset("trace", 0),
            Err(Error::Unsupported { .. })
        ));
        assert!(matches!(
            sequencer.adjust_cache("trace", 10),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn two_processes_share_counters() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        let a = sequencer(&coord, &dir);
        let b = sequencer(&coord, &dir);
        let definition = SequenceDefinition::breadcrumb("shared").with_counter(20, 1, 0);
        a.startup([definition.clone()]).unwrap();
        b.startup([definition]).unwrap();

        let seen = parking_lot::Mutex::new(HashSet::new());
        scope(|s| {
            for sequencer in [&a, &b] {
                let seen = &seen;
                s.spawn(move || {
                    for _ in 0..500 {
                        let id = sequencer.next_id("shared").unwrap();
                        assert!(seen.lock().insert(id), "duplicate id {id}");
                    }
                });
            }
        });
        assert_eq!(seen.lock().len(), 1_000);
    }

    #[test]
    fn disconnected_coordinator_still_serves_clock_kinds() {
        let dir = TempDir::new().unwrap();
        let coord = Arc::new(MemoryCoordinator::new());
        coord.set_connected(false);
        let sequencer = sequencer(&coord, &dir);
        assert!(!sequencer.was_connected());

        sequencer.startup_without_load();
        sequencer.add(SequenceDefinition::snowflake("clock")).unwrap();
        assert!(sequencer.next_id("clock").is_ok());
        assert!(matches!(
            sequencer.add(SequenceDefinition::breadcrumb("counter")),
            Err(Error::CoordinationUnavailable { .. })
        ));
    }
}
