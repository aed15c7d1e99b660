mod cli;

use std::sync::Arc;
use std::time::Duration;

pub use cli::Cli;

use autopilot_core::bus::MessageBus;
use autopilot_core::bus::decode_payload;
use autopilot_core::config::Config;
use autopilot_core::config::ConfigOverrides;
use autopilot_core::executor::ExecutorOptions;
use autopilot_core::executor::ProtocolExecutor;
use autopilot_core::handlers::Deps;
use autopilot_core::handlers::register_default_actions;
use autopilot_core::mock::MockSurfaces;
use autopilot_core::mock::MockVisionClient;
use autopilot_core::navigation::VisualNavigationHandler;
use autopilot_core::registry::ActionRegistry;
use autopilot_core::util::backoff;
use autopilot_core::util::notify_on_sigint;
use autopilot_core::verifier::VisualVerifier;
use autopilot_core::vision_client::GeminiClient;
use autopilot_core::vision_client::VisionModelClient;
use autopilot_protocol::parser::ProtocolParser;
use autopilot_protocol::protocol::ExecutionResult;
use autopilot_protocol::protocol::ExecutionStatus;
use autopilot_protocol::protocol::ProgramSubmission;
use autopilot_protocol::protocol::Topic;
use autopilot_protocol::protocol::VisionAction;
use autopilot_protocol::protocol::VisionRequest;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// What one poll pass accomplished.
enum Cycle {
    Idle,
    HandledVision,
    RanProgram,
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let overrides = ConfigOverrides {
        messages_dir: cli.messages_dir.clone(),
        poll_interval_ms: cli.poll_ms,
        dry_run: Some(cli.dry_run),
    };
    let config = Config::load(cli.config.as_deref(), overrides)?;

    let bus = Arc::new(MessageBus::new(&config.messages_dir)?);

    // This build drives the simulation surfaces; real OS input/capture
    // drivers plug into the same capability traits.
    let surfaces = MockSurfaces::new();
    let vision_client: Arc<dyn VisionModelClient> =
        match std::env::var(&config.vision_api_key_env) {
            Ok(api_key) if !api_key.is_empty() => {
                Arc::new(GeminiClient::new(config.vision_api_base.clone(), api_key))
            }
            _ => {
                warn!(
                    env = %config.vision_api_key_env,
                    "no vision API key found, using the mock vision client"
                );
                MockVisionClient::new()
            }
        };
    let verifier = Arc::new(VisualVerifier::new(
        surfaces.screen_capture(),
        vision_client,
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
    let registry = Arc::new(registry);

    let screen_size = deps.screen.size()?;
    let parser = ProtocolParser::new(screen_size.width, screen_size.height)
        .with_contracts(registry.contracts());

    let executor = Arc::new(ProtocolExecutor::new(
        registry.clone(),
        ExecutorOptions::from_config(&config, deps.pointer.clone()),
    ));
    let navigation = VisualNavigationHandler::new(
        deps.screen.clone(),
        deps.pointer.clone(),
        deps.keyboard.clone(),
        bus.clone(),
        config.screen_margin,
    );

    info!(
        messages_dir = %config.messages_dir.display(),
        poll_ms = config.poll_interval.as_millis() as u64,
        dry_run = config.dry_run,
        actions = registry.list_actions(None).len(),
        "actuator started, waiting for programs"
    );

    // SIGINT requests a cooperative stop: the executor observes it at its
    // next checkpoint, the in-flight poll pass completes normally, and the
    // loop below exits on the shutdown flag. Never cancel a run mid-flight.
    let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let ctrl_c = notify_on_sigint();
        let executor = executor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                ctrl_c.notified().await;
                shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
                if executor.is_running() {
                    info!("stopping the current program before shutdown");
                    executor.stop();
                }
            }
        });
    }

    let mut error_streak: u64 = 0;
    loop {
        if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            info!("actuator shutting down");
            return Ok(());
        }

        match poll_once(&bus, &parser, &executor, &navigation).await {
            Ok(Cycle::RanProgram) => {
                error_streak = 0;
                if cli.once {
                    info!("single-program mode, exiting");
                    return Ok(());
                }
            }
            Ok(Cycle::HandledVision) => error_streak = 0,
            Ok(Cycle::Idle) => {
                error_streak = 0;
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(e) => {
                // Malformed message files are left in place for diagnosis;
                // back off so a wedged topic does not spin the loop.
                error_streak += 1;
                error!(error_streak, "bus poll failed: {e}");
                tokio::time::sleep(backoff(error_streak)).await;
            }
        }
    }
}

/// One poll pass: vision traffic first (the executor may be paused on it),
/// then at most one program.
async fn poll_once(
    bus: &Arc<MessageBus>,
    parser: &ProtocolParser,
    executor: &Arc<ProtocolExecutor>,
    navigation: &VisualNavigationHandler,
) -> autopilot_core::Result<Cycle> {
    if let Some(message) = bus.receive(Topic::VisionRequest, Duration::ZERO).await? {
        let request: VisionRequest = decode_payload(&message)?;
        navigation.handle_request(&request).await?;
        return Ok(Cycle::HandledVision);
    }

    if let Some(message) = bus.receive(Topic::VisionAction, Duration::ZERO).await? {
        let command: VisionAction = decode_payload(&message)?;
        navigation.handle_action(&command).await?;
        return Ok(Cycle::HandledVision);
    }

    let Some(message) = bus.receive(Topic::Program, Duration::ZERO).await? else {
        return Ok(Cycle::Idle);
    };
    let submission: ProgramSubmission = decode_payload(&message)?;
    let program = submission.program;

    let validation = parser.validate(&program);
    for warning in &validation.warnings {
        warn!(program = %program.id(), "validation warning: {warning}");
    }
    if !validation.is_valid {
        for error in &validation.errors {
            error!(program = %program.id(), "validation error: {error}");
        }
        let result = ExecutionResult {
            program_id: program.id().to_string(),
            status: ExecutionStatus::Failed,
            actions_completed: 0,
            total_actions: program.actions.len(),
            duration_ms: 0,
            error: Some(format!(
                "program validation failed: {}",
                validation.errors.join("; ")
            )),
            error_details: None,
            context: None,
        };
        bus.send_with_id(Topic::ProgramStatus, &message.id, &result)
            .await?;
        return Ok(Cycle::RanProgram);
    }

    info!(
        program = %program.id(),
        actions = program.actions.len(),
        "executing program"
    );
    let result = executor.execute(&program).await;
    info!(
        program = %result.program_id,
        status = %result.status,
        completed = result.actions_completed,
        total = result.total_actions,
        duration_ms = result.duration_ms,
        "program finished"
    );

    bus.send_with_id(Topic::ProgramStatus, &message.id, &result)
        .await?;
    Ok(Cycle::RanProgram)
}
