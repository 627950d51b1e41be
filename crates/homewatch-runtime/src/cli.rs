//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "homewatch", about = "debounced presence and intrusion detection")]
pub struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, short = 'c', global = true, env = "HOMEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read JSON-lines evidence from stdin and dispatch alerts to stdout
    Daemon(DaemonOpts),
    /// Replay a recorded JSON-lines file using its timestamps
    Replay(ReplayOpts),
    /// Validate the config and print the effective values
    CheckConfig,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Presence evaluation interval in milliseconds (overrides [runtime] tick_ms)
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Recorded evidence, one JSON record per line
    pub file: PathBuf,

    /// Presence evaluation interval in milliseconds (overrides [runtime] tick_ms)
    #[arg(long)]
    pub tick_ms: Option<u64>,
}
