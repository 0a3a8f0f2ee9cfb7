#![doc = include_str!("../README.md")]

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::config::{CliArgs, CliConfig, Command};
use cli::telemetry::init_telemetry;
use gid::coord::MemoryCoordinator;
use gid::{Sequencer, ThreadSpawner};
use std::io::Write;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry()?;

    let sequencer = start(&config)?;
    let result = run(&sequencer, &config.command, &mut std::io::stdout().lock());
    sequencer.shutdown();
    result
}

/// Builds the registry in single-process mode and registers the configured
/// definitions.
fn start(config: &CliConfig) -> anyhow::Result<Sequencer> {
    let sequencer = Sequencer::new(
        config.sequencer.clone(),
        Arc::new(MemoryCoordinator::new()),
        Arc::new(ThreadSpawner::default()),
    );

    match &config.definitions {
        Some(path) => sequencer
            .startup_from_file(path)
            .with_context(|| format!("failed to start sequences from {}", path.display()))?,
        None => sequencer.startup_without_load(),
    }

    tracing::debug!(
        sys_id = sequencer.sys_id(),
        connected = sequencer.was_connected(),
        "sequencer started"
    );
    Ok(sequencer)
}

fn run(sequencer: &Sequencer, command: &Command, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Command::Next { name, count } => {
            for _ in 0..*count {
                let id = sequencer
                    .next_id(name)
                    .with_context(|| format!("failed to generate an id for {name:?}"))?;
                writeln!(out, "{id}")?;
            }
        }
        Command::List => {
            for name in sequencer.names()? {
                let engine = sequencer.get(&name)?;
                writeln!(out, "{name}\t{}", engine.kind())?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
