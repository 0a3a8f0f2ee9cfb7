use crate::buffer::BufferConfig;
use crate::coord::Coordinator;
use crate::def::{Kind, SequenceDefinition};
use crate::error::{Error, Result};
use crate::generator::{BreadcrumbEngine, ClockEngine, SpinConfig};
use crate::spawn::Spawn;
use crate::time::{DecimalClock, WallClock};
use crate::worker::WorkerIdResolver;
use std::sync::Arc;

/// Everything an engine needs from its surroundings.
#[derive(Clone, Debug)]
pub struct EngineContext {
    pub coordinator: Arc<dyn Coordinator>,
    pub spawner: Arc<dyn Spawn>,
    pub workers: WorkerIdResolver,
    pub buffer: BufferConfig,
    pub spin: SpinConfig,
}

impl EngineContext {
    /// A context for process identity `sys_id` whose worker ids are looked up
    /// through `coordinator`.
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        spawner: Arc<dyn Spawn>,
        sys_id: impl Into<String>,
    ) -> Self {
        let workers = WorkerIdResolver::new(sys_id).with_coordinator(Arc::clone(&coordinator));
        Self {
            coordinator,
            spawner,
            workers,
            buffer: BufferConfig::default(),
            spin: SpinConfig::default(),
        }
    }
}

/// A live identifier engine of one of the three kinds.
#[derive(Debug)]
pub enum Engine {
    Snowflake(ClockEngine<WallClock>),
    Ticktock(ClockEngine<DecimalClock>),
    Breadcrumb(BreadcrumbEngine),
}

impl Engine {
    /// Validates `definition` and builds its engine.
    ///
    /// Clock kinds resolve their worker id here; a breadcrumb opens (and, the
    /// first time, initializes) its remote counter.
    pub fn create(definition: &SequenceDefinition, context: &EngineContext) -> Result<Self> {
        definition.validate()?;
        let name = definition.name.trim();

        match definition.kind {
            Kind::Snowflake {
                worker_id_bits,
                sequence_bits,
            } => {
                let max = definition.kind.layout().map_or(0, |l| l.max_value(worker_id_bits));
                let (worker_id, _) = context.workers.resolve(name, max)?;
                let engine = ClockEngine::snowflake(name, worker_id_bits, sequence_bits, worker_id)?
                    .with_spin(context.spin);
                Ok(Self::Snowflake(engine))
            }
            Kind::Ticktock {
                worker_id_bits,
                sequence_bits,
            } => {
                let max = definition.kind.layout().map_or(0, |l| l.max_value(worker_id_bits));
                let (worker_id, _) = context.workers.resolve(name, max)?;
                let engine = ClockEngine::ticktock(name, worker_id_bits, sequence_bits, worker_id)?
                    .with_spin(context.spin);
                Ok(Self::Ticktock(engine))
            }
            Kind::Breadcrumb { .. } => {
                let settings = definition.counter_settings().unwrap_or_default();
                let engine = BreadcrumbEngine::new(
                    name,
                    Arc::clone(&context.coordinator),
                    settings,
                    Arc::clone(&context.spawner),
                    context.buffer,
                )?;
                Ok(Self::Breadcrumb(engine))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Snowflake(engine) => engine.name(),
            Self::Ticktock(engine) => engine.name(),
            Self::Breadcrumb(engine) => engine.name(),
        }
    }

    /// Lowercase kind tag.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Snowflake(_) => "snowflake",
            Self::Ticktock(_) => "ticktock",
            Self::Breadcrumb(_) => "breadcrumb",
        }
    }

    pub fn next_id(&self) -> Result<i64> {
        match self {
            Self::Snowflake(engine) => engine.next_id(),
            Self::Ticktock(engine) => engine.next_id(),
            Self::Breadcrumb(engine) => engine.next_id(),
        }
    }

    /// Restarts a breadcrumb at `start`.
    ///
    /// # Errors
    /// [`Error::Unsupported`] for clock kinds.
    pub fn reset(&self, start: i64) -> Result<()> {
        match self {
            Self::Breadcrumb(engine) => engine.reset(start),
            _ => Err(self.unsupported("reset")),
        }
    }

    /// Resizes (or turns on) a breadcrumb's buffer.
    ///
    /// # Errors
    /// [`Error::Unsupported`] for clock kinds.
    pub fn adjust_cache(&self, cache: usize) -> Result<()> {
        match self {
            Self::Breadcrumb(engine) => engine.adjust_cache(cache),
            _ => Err(self.unsupported("adjust_cache")),
        }
    }

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            name: self.name().to_owned(),
            operation,
        }
    }
}
