mod cli;
mod report;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

pub use cli::Cli;
pub use report::render_result;

use anyhow::Context;
use autopilot_core::bus::MessageBus;
use autopilot_core::bus::decode_payload;
use autopilot_core::config::Config;
use autopilot_core::config::ConfigOverrides;
use autopilot_core::handlers::Deps;
use autopilot_core::handlers::register_default_actions;
use autopilot_core::mock::MockSurfaces;
use autopilot_core::mock::MockVisionClient;
use autopilot_core::registry::ActionRegistry;
use autopilot_core::verifier::VisualVerifier;
use autopilot_protocol::parser::ProtocolParser;
use autopilot_protocol::protocol::ExecutionResult;
use autopilot_protocol::protocol::ProgramSubmission;
use autopilot_protocol::protocol::Topic;
use tracing_subscriber::EnvFilter;

/// Opaque source of program documents. Turning a natural-language command
/// into a program lives outside this repository; the planner facade only
/// validates and submits what the source yields.
pub trait ProgramSource {
    fn fetch(&self) -> anyhow::Result<String>;
}

/// Reads the program document from a file, or from stdin for `-`/absent.
pub struct FileProgramSource {
    path: Option<String>,
}

impl FileProgramSource {
    pub fn new(path: Option<String>) -> Self {
        Self { path }
    }
}

impl ProgramSource for FileProgramSource {
    fn fetch(&self) -> anyhow::Result<String> {
        match self.path.as_deref() {
            Some(path) if path != "-" => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read program file `{path}`")),
            _ => {
                let mut buffer = String::new();
                std::io::stdin()
                    .read_to_string(&mut buffer)
                    .context("failed to read program from stdin")?;
                anyhow::ensure!(!buffer.trim().is_empty(), "no program provided on stdin");
                Ok(buffer)
            }
        }
    }
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    if cli.describe_actions {
        let library = default_action_library();
        println!("{}", serde_json::to_string_pretty(&library)?);
        return Ok(());
    }

    let (width, height) = parse_screen(&cli.screen)?;
    let source = FileProgramSource::new(cli.program.clone());
    let document = source.fetch()?;

    let parser = ProtocolParser::new(width, height);
    let program = parser
        .parse(&document)
        .context("program document rejected")?;

    let validation = parser.validate(&program);
    for warning in &validation.warnings {
        eprintln!("warning: {warning}");
    }
    if !validation.is_valid {
        for error in &validation.errors {
            eprintln!("error: {error}");
        }
        anyhow::bail!(
            "program validation failed with {} error(s)",
            validation.errors.len()
        );
    }

    if cli.check {
        println!(
            "program `{}` is valid ({} actions, {} macros)",
            program.id(),
            program.actions.len(),
            program.macros.len()
        );
        return Ok(());
    }

    let overrides = ConfigOverrides {
        messages_dir: cli.messages_dir.clone(),
        ..Default::default()
    };
    let config = Config::load(cli.config.as_deref(), overrides)?;
    let bus = MessageBus::new(&config.messages_dir)?;

    let submission = ProgramSubmission {
        program: program.clone(),
    };
    let id = bus.send(Topic::Program, &submission).await?;
    println!("submitted program `{}` as {id}", program.id());

    let timeout = Duration::from_secs(cli.status_timeout);
    let Some(message) = bus.receive_by_id(Topic::ProgramStatus, &id, timeout).await? else {
        anyhow::bail!(
            "timed out waiting for program status after {}s",
            cli.status_timeout
        );
    };
    let result: ExecutionResult = decode_payload(&message)?;
    println!("{}", render_result(&result));

    Ok(())
}

/// The default catalog's machine-readable description, as handed to the
/// program generator's prompt.
fn default_action_library() -> serde_json::Value {
    let surfaces = MockSurfaces::new();
    let config = Config::default();
    let verifier = Arc::new(VisualVerifier::new(
        surfaces.screen_capture(),
        MockVisionClient::new(),
        &config,
    ));
    let deps = Deps {
        keyboard: surfaces.keyboard(),
        pointer: surfaces.pointer(),
        screen: surfaces.screen_capture(),
        clipboard: surfaces.clipboard(),
        system: surfaces.system(),
        verifier,
    };
    let mut registry = ActionRegistry::new();
    register_default_actions(&mut registry, &deps);
    registry.describe()
}

fn parse_screen(spec: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = spec
        .split_once('x')
        .with_context(|| format!("invalid screen spec `{spec}`, expected WIDTHxHEIGHT"))?;
    Ok((
        width
            .parse()
            .with_context(|| format!("invalid screen width `{width}`"))?,
        height
            .parse()
            .with_context(|| format!("invalid screen height `{height}`"))?,
    ))
}
