use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "autopilot-planner",
    about = "Validates an automation program and submits it to the actuator"
)]
pub struct Cli {
    /// Program JSON file to validate and submit. Pass `-` (or nothing, when
    /// piped) to read from stdin.
    #[arg(value_name = "PROGRAM")]
    pub program: Option<String>,

    /// Base directory of the file-system message bus.
    #[arg(long, value_name = "DIR")]
    pub messages_dir: Option<PathBuf>,

    /// Configuration file. Defaults to `autopilot.toml` when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the actuator's terminal status.
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub status_timeout: u64,

    /// Validate the program and exit without submitting it.
    #[arg(long)]
    pub check: bool,

    /// Print the machine-readable action library and exit.
    #[arg(long)]
    pub describe_actions: bool,

    /// Screen size assumed for coordinate validation, as WIDTHxHEIGHT.
    #[arg(long, value_name = "WxH", default_value = "1920x1080")]
    pub screen: String,
}
