use anyhow::bail;
use clap::{Parser, Subcommand};
use gid::SequencerConfig;
use std::path::PathBuf;

/// Command-line arguments for the `gid` binary.
///
/// Every global flag falls back to an environment variable, so a `.env` file
/// next to the binary is enough to configure a deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "gid",
    version,
    about = "Issue globally unique, ordered 64-bit identifiers"
)]
pub struct CliArgs {
    /// JSON file with the sequence definitions to register at startup.
    ///
    /// Environment variable: `GID_CONFIG`
    #[arg(long, env = "GID_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity of this process, conventionally `<ip>-<port>`.
    ///
    /// Worker ids are looked up in the coordinator under this key.
    ///
    /// Environment variable: `GID_SYS_ID`
    #[arg(long, env = "GID_SYS_ID", default_value_t = String::from("127.0.0.1-0"))]
    pub sys_id: String,

    /// Worker id used by every clock sequence, overriding the coordinator and
    /// the fallback file.
    ///
    /// Environment variable: `GID_WORKER_ID`
    #[arg(long, env = "GID_WORKER_ID")]
    pub worker_id: Option<u64>,

    /// Directory holding the worker id fallback file. Defaults to `$HOME/.gid`.
    ///
    /// Environment variable: `GID_CACHE_DIR`
    #[arg(long, env = "GID_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print identifiers from one sequence, one per line.
    Next {
        /// Sequence name.
        name: String,
        /// How many identifiers to print.
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    /// Print every registered sequence and its kind.
    List,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub definitions: Option<PathBuf>,
    pub sequencer: SequencerConfig,
    pub command: Command,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let sys_id = args.sys_id.trim();
        if sys_id.is_empty() {
            bail!("GID_SYS_ID must not be empty");
        }

        match &args.command {
            Command::Next { name, .. } if name.trim().is_empty() => {
                bail!("sequence name must not be empty");
            }
            Command::Next { count: 0, .. } => bail!("--count must be greater than 0"),
            _ => {}
        }

        let mut sequencer = SequencerConfig::new(sys_id).with_worker_id(args.worker_id);
        if let Some(dir) = args.cache_dir {
            sequencer = sequencer.with_cache_dir(dir);
        }

        Ok(Self {
            definitions: args.config,
            sequencer,
            command: args.command,
        })
    }
}
