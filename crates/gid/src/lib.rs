//! Globally unique, ordered 64-bit identifiers.
//!
//! Three engine kinds share one registry:
//!
//! - **snowflake**: millisecond tick, worker id and sequence packed in bits.
//! - **ticktock**: human-readable `yyMMddHHmmss` tick, worker id and sequence
//!   packed in decimal digits.
//! - **breadcrumb**: values from a counter shared through a coordination
//!   service, optionally prefetched in blocks.
//!
//! ```
//! use gid::coord::MemoryCoordinator;
//! use gid::spawn::ThreadSpawner;
//! use gid::{SequenceDefinition, Sequencer, SequencerConfig};
//! use std::sync::Arc;
//!
//! let config = SequencerConfig::new("10.0.0.1-8080").with_worker_id(Some(1));
//! let sequencer = Sequencer::new(
//!     config,
//!     Arc::new(MemoryCoordinator::new()),
//!     Arc::new(ThreadSpawner::default()),
//! );
//! sequencer
//!     .startup([
//!         SequenceDefinition::snowflake("trace"),
//!         SequenceDefinition::breadcrumb("invoice").with_counter(100, 1, 1_000),
//!     ])
//!     .unwrap();
//!
//! assert!(sequencer.next_id("trace").unwrap() > 0);
//! assert_eq!(sequencer.next_id("invoice").unwrap(), 1_000);
//! ```

pub mod buffer;
pub mod coord;
pub mod counter;
pub mod def;
pub mod engine;
mod error;
pub mod generator;
pub mod queue;
pub mod sequencer;
pub mod spawn;
mod time;
pub mod worker;

pub use crate::buffer::{BufferConfig, PrefetchBuffer};
pub use crate::def::{Kind, SequenceDefinition, load_definitions, parse_definitions};
pub use crate::engine::{Engine, EngineContext};
pub use crate::error::*;
pub use crate::generator::{BreadcrumbEngine, ClockEngine, CounterSettings, Layout, SpinConfig};
pub use crate::sequencer::{Sequencer, SequencerConfig};
#[cfg(feature = "async-tokio")]
pub use crate::spawn::TokioSpawner;
pub use crate::spawn::{Spawn, ThreadSpawner};
pub use crate::time::*;
