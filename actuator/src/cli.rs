use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "autopilot-actuator",
    about = "OS-facing automation engine: polls the bus for programs and executes them"
)]
pub struct Cli {
    /// Simulate execution: every handler invocation is replaced by logging.
    #[arg(long)]
    pub dry_run: bool,

    /// Base directory of the file-system message bus.
    #[arg(long, value_name = "DIR")]
    pub messages_dir: Option<PathBuf>,

    /// Configuration file. Defaults to `autopilot.toml` when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Poll interval for the program topic, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub poll_ms: Option<u64>,

    /// Exit after executing one program instead of looping.
    #[arg(long)]
    pub once: bool,
}
