//! Sequential state machine that drives a validated program to a terminal
//! state.
//!
//! The executor owns the per-run execution context and is the only writer
//! to it. Control operations (`pause`, `resume`, `stop`, `status`,
//! `context_snapshot`) may be called from any thread; they take the state
//! mutex briefly and set advisory flags that the run loop observes at
//! explicit checkpoints between actions (and at the start of each inner
//! macro step). There is no forcible cancellation of a running handler.

// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use autopilot_protocol::protocol::ActionRecord;
use autopilot_protocol::protocol::ActionStep;
use autopilot_protocol::protocol::ContextSnapshot;
use autopilot_protocol::protocol::ExecutionError;
use autopilot_protocol::protocol::ExecutionResult;
use autopilot_protocol::protocol::ExecutionStatus;
use autopilot_protocol::protocol::Point;
use autopilot_protocol::protocol::Program;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::capability::Pointer;
use crate::config::Config;
use crate::error::AutopilotErr;
use crate::error::Result;
use crate::registry::ActionRegistry;
use crate::safety::DangerousTextPolicy;
use crate::substitution::substitute_params;
use crate::util::now_iso8601;

/// How often a paused run re-checks its flags.
const PAUSE_TICK: Duration = Duration::from_millis(100);

/// Options fixed at executor construction.
pub struct ExecutorOptions {
    /// Replace every handler invocation (and timing wait) with logging.
    pub dry_run: bool,
    pub dangerous_text: DangerousTextPolicy,
    /// Pixels of pointer drift tolerated between checkpoints; zero disables
    /// the user-interrupt check.
    pub drift_threshold_px: u32,
    /// Pointer observed for drift detection. `None` disables the check.
    pub pointer: Option<Arc<dyn Pointer>>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            dangerous_text: DangerousTextPolicy::default(),
            drift_threshold_px: 50,
            pointer: None,
        }
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &Config, pointer: Arc<dyn Pointer>) -> Self {
        Self {
            dry_run: config.dry_run,
            dangerous_text: DangerousTextPolicy::new(config.dangerous_patterns.clone()),
            drift_threshold_px: config.pointer_drift_threshold_px,
            pointer: Some(pointer),
        }
    }
}

/// Point-in-time view of the executor controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorStatus {
    pub running: bool,
    pub paused: bool,
    pub current_index: usize,
    pub total_actions: usize,
    pub program_id: Option<String>,
    pub dry_run: bool,
}

#[derive(Default)]
struct ExecState {
    running: bool,
    program_id: Option<String>,
    total_actions: usize,
    context: Option<ContextSnapshot>,
}

enum RunOutcome {
    Completed(usize),
    Stopped {
        completed: usize,
        error: AutopilotErr,
    },
    Failed {
        completed: usize,
        message: String,
        details: ExecutionError,
    },
}

pub struct ProtocolExecutor {
    registry: Arc<ActionRegistry>,
    options: ExecutorOptions,
    state: Mutex<ExecState>,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    /// Where automation last observed the pointer; drift beyond the
    /// threshold from here reads as the user taking over.
    last_pointer: Mutex<Option<Point>>,
}

impl ProtocolExecutor {
    pub fn new(registry: Arc<ActionRegistry>, options: ExecutorOptions) -> Self {
        Self {
            registry,
            options,
            state: Mutex::new(ExecState::default()),
            pause_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            last_pointer: Mutex::new(None),
        }
    }

    /// Drives `program` to a terminal state. At most one program executes
    /// per executor at any time; re-entry fails deterministically as busy.
    pub async fn execute(&self, program: &Program) -> ExecutionResult {
        let program_id = program.id().to_string();
        let total_actions = program.actions.len();

        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                warn!(program = %program_id, "rejecting program: executor is busy");
                return ExecutionResult {
                    program_id,
                    status: ExecutionStatus::Failed,
                    actions_completed: 0,
                    total_actions,
                    duration_ms: 0,
                    error: Some(AutopilotErr::Busy.to_string()),
                    error_details: None,
                    context: None,
                };
            }
            state.running = true;
            state.program_id = Some(program_id.clone());
            state.total_actions = total_actions;
            state.context = Some(ContextSnapshot {
                program_id: program_id.clone(),
                start_time: now_iso8601(),
                variables: Map::new(),
                action_results: Vec::new(),
                current_action_index: 0,
            });
        }
        self.pause_requested.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        *self.last_pointer.lock().unwrap() = self.observe_pointer();

        info!(
            program = %program_id,
            total_actions,
            dry_run = self.options.dry_run,
            "starting program"
        );
        let started = Instant::now();

        let outcome = self.run_actions(program).await;

        // A pause requested during the last action's wait is still honored
        // before the run returns.
        self.wait_while_paused().await;

        let (status, actions_completed, error, error_details) = match outcome {
            RunOutcome::Completed(completed) => {
                info!(program = %program_id, "program completed successfully");
                (ExecutionStatus::Success, completed, None, None)
            }
            RunOutcome::Stopped { completed, error } => {
                info!(program = %program_id, %error, "program stopped");
                (ExecutionStatus::Stopped, completed, Some(error.to_string()), None)
            }
            RunOutcome::Failed {
                completed,
                message,
                details,
            } => {
                warn!(program = %program_id, %message, "program failed");
                (ExecutionStatus::Failed, completed, Some(message), Some(details))
            }
        };

        let context = {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.program_id = None;
            state.total_actions = 0;
            state.context.take()
        };

        ExecutionResult {
            program_id,
            status,
            actions_completed,
            total_actions,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
            error_details,
            context,
        }
    }

    async fn run_actions(&self, program: &Program) -> RunOutcome {
        let mut completed = 0usize;

        for (index, step) in program.actions.iter().enumerate() {
            self.set_current_index(index);

            if let Err(control) = self.checkpoint().await {
                return RunOutcome::Stopped {
                    completed,
                    error: control,
                };
            }

            debug!(index, action = %step.action, description = ?step.description, "executing action");
            match self.run_top_level_step(program, step).await {
                Ok(value) => {
                    self.record_result(index, &step.action, value, None);
                    completed += 1;
                    // Re-anchor the drift baseline where automation left the
                    // pointer, before the wait gives the user a window to
                    // move it.
                    self.refresh_pointer_baseline();
                    self.wait_after(step.wait_after_ms).await;
                }
                Err(AutopilotErr::Stopped) => {
                    return RunOutcome::Stopped {
                        completed,
                        error: AutopilotErr::Stopped,
                    };
                }
                Err(AutopilotErr::UserInterrupted) => {
                    return RunOutcome::Stopped {
                        completed,
                        error: AutopilotErr::UserInterrupted,
                    };
                }
                Err(err) => {
                    self.record_result(index, &step.action, Value::Null, Some(err.to_string()));
                    let message = format!("action {index} (`{}`) failed: {err}", step.action);
                    let details = ExecutionError {
                        action_index: index,
                        action_name: step.action.clone(),
                        error_kind: err.kind().to_string(),
                        error_message: err.to_string(),
                        timestamp: now_iso8601(),
                        params: Some(step.params.clone()),
                    };
                    return RunOutcome::Failed {
                        completed,
                        message,
                        details,
                    };
                }
            }
        }

        RunOutcome::Completed(completed)
    }

    async fn run_top_level_step(&self, program: &Program, step: &ActionStep) -> Result<Value> {
        let variables = self.current_variables();
        let params = substitute_params(&step.params, &variables)?;
        if step.is_macro_call() {
            self.run_macro(program, &params, &Map::new()).await
        } else {
            self.dispatch(&step.action, params).await
        }
    }

    /// Expands one macro invocation. `outer_overlay` carries the variable
    /// bindings of enclosing macro calls; this call's `vars` shadow them,
    /// and the combined overlay shadows the execution context for every
    /// sub-step of this invocation only.
    async fn run_macro(
        &self,
        program: &Program,
        params: &Map<String, Value>,
        outer_overlay: &Map<String, Value>,
    ) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AutopilotErr::MissingParameter {
                action: "macro".to_string(),
                param: "name".to_string(),
            })?;
        let body = program
            .macros
            .get(name)
            .cloned()
            .ok_or_else(|| AutopilotErr::UndefinedMacro(name.to_string()))?;

        let mut overlay = outer_overlay.clone();
        if let Some(vars) = params.get("vars").and_then(Value::as_object) {
            for (key, value) in vars {
                overlay.insert(key.clone(), value.clone());
            }
        }
        debug!(macro_name = name, steps = body.len(), "expanding macro");

        let mut results = Vec::with_capacity(body.len());
        for sub in &body {
            self.checkpoint().await?;

            // Rebuild the scope per step so context updates (e.g. verified
            // coordinates) stay visible inside macros.
            let mut scope = self.current_variables();
            for (key, value) in &overlay {
                scope.insert(key.clone(), value.clone());
            }

            let sub_params = substitute_params(&sub.params, &scope)?;
            let value = if sub.is_macro_call() {
                Box::pin(self.run_macro(program, &sub_params, &overlay)).await?
            } else {
                debug!(action = %sub.action, "executing macro step");
                self.dispatch(&sub.action, sub_params).await?
            };
            results.push(value);
            self.wait_after(sub.wait_after_ms).await;
        }

        Ok(Value::Array(results))
    }

    async fn dispatch(&self, action: &str, params: Map<String, Value>) -> Result<Value> {
        self.guard_dangerous_text(action, &params)?;

        if self.options.dry_run {
            let params_display = Value::Object(params);
            info!(action, params = %params_display, "[dry run] skipping handler dispatch");
            return Ok(Value::Null);
        }

        let result = self.registry.execute(action, params).await?;
        if action == "verify_screen" && result.is_object() {
            self.apply_verification(&result);
        }
        Ok(result)
    }

    /// The safety floor for keyboard text: refuse to type anything matching
    /// the deny patterns unless this is a dry run.
    fn guard_dangerous_text(&self, action: &str, params: &Map<String, Value>) -> Result<()> {
        if !matches!(action, "type" | "type_with_delay") {
            return Ok(());
        }
        let Some(text) = params.get("text").and_then(Value::as_str) else {
            return Ok(());
        };
        let Some(pattern) = self.options.dangerous_text.first_match(text) else {
            return Ok(());
        };
        if self.options.dry_run {
            warn!(action, pattern, "[dry run] would block dangerous text");
            return Ok(());
        }
        Err(AutopilotErr::DangerousActionBlocked {
            pattern: pattern.to_string(),
        })
    }

    /// Adaptive re-binding: a verification verdict updates the context so
    /// subsequent substitutions observe it. The executor never aborts on
    /// `safe_to_proceed == false`; the authoring program decides.
    fn apply_verification(&self, result: &Value) {
        let safe = result
            .get("safe_to_proceed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let confidence = result
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let analysis = result
            .get("analysis")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        if safe {
            debug!(confidence, "verification passed");
        } else {
            warn!(confidence, %analysis, "verification reported not safe to proceed");
        }

        let mut state = self.state.lock().unwrap();
        let Some(context) = state.context.as_mut() else {
            return;
        };

        if let Some(coords) = result.get("updated_coordinates")
            && let (Some(x), Some(y)) = (
                coords.get("x").and_then(Value::as_i64),
                coords.get("y").and_then(Value::as_i64),
            )
        {
            context.variables.insert("verified_x".to_string(), json!(x));
            context.variables.insert("verified_y".to_string(), json!(y));
            info!(x, y, "verified coordinates stored as `verified_x`/`verified_y`");
        }

        if let Some(suggested) = result
            .get("suggested_actions")
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty())
        {
            context
                .variables
                .insert("suggested_actions".to_string(), Value::Array(suggested.clone()));
        }

        context
            .variables
            .insert("last_verification_safe".to_string(), json!(safe));
        context
            .variables
            .insert("last_verification_confidence".to_string(), json!(confidence));
        context
            .variables
            .insert("last_verification_analysis".to_string(), json!(analysis));
    }

    /// Observes the stop/pause flags and the pointer. The only suspension
    /// points of a run are calls to this method.
    async fn checkpoint(&self) -> Result<()> {
        if self.stop_requested.load(Ordering::SeqCst) {
            return Err(AutopilotErr::Stopped);
        }
        while self.pause_requested.load(Ordering::SeqCst)
            && !self.stop_requested.load(Ordering::SeqCst)
        {
            tokio::time::sleep(PAUSE_TICK).await;
        }
        if self.stop_requested.load(Ordering::SeqCst) {
            return Err(AutopilotErr::Stopped);
        }
        self.check_pointer_drift()
    }

    async fn wait_while_paused(&self) {
        while self.pause_requested.load(Ordering::SeqCst)
            && !self.stop_requested.load(Ordering::SeqCst)
        {
            tokio::time::sleep(PAUSE_TICK).await;
        }
    }

    fn check_pointer_drift(&self) -> Result<()> {
        if self.options.dry_run || self.options.drift_threshold_px == 0 {
            return Ok(());
        }
        let Some(pointer) = &self.options.pointer else {
            return Ok(());
        };
        let Some(baseline) = *self.last_pointer.lock().unwrap() else {
            return Ok(());
        };
        let Ok(current) = pointer.position() else {
            return Ok(());
        };

        let threshold = self.options.drift_threshold_px as i32;
        if (current.x - baseline.x).abs() > threshold
            || (current.y - baseline.y).abs() > threshold
        {
            warn!(
                ?baseline,
                ?current,
                threshold,
                "pointer drift detected, treating as user interrupt"
            );
            return Err(AutopilotErr::UserInterrupted);
        }
        Ok(())
    }

    fn refresh_pointer_baseline(&self) {
        if let Some(position) = self.observe_pointer() {
            *self.last_pointer.lock().unwrap() = Some(position);
        }
    }

    fn observe_pointer(&self) -> Option<Point> {
        self.options
            .pointer
            .as_ref()
            .and_then(|pointer| pointer.position().ok())
    }

    async fn wait_after(&self, wait_ms: u64) {
        if wait_ms == 0 {
            return;
        }
        if self.options.dry_run {
            debug!(wait_ms, "[dry run] skipping wait");
            return;
        }
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    }

    fn set_current_index(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(context) = state.context.as_mut() {
            context.current_action_index = index;
        }
    }

    fn current_variables(&self) -> Map<String, Value> {
        let state = self.state.lock().unwrap();
        state
            .context
            .as_ref()
            .map(|context| context.variables.clone())
            .unwrap_or_default()
    }

    fn record_result(&self, index: usize, action: &str, result: Value, error: Option<String>) {
        let mut state = self.state.lock().unwrap();
        if let Some(context) = state.context.as_mut() {
            context.action_results.push(ActionRecord {
                index,
                action: action.to_string(),
                result,
                error,
                timestamp: now_iso8601(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Controls. Callable from any thread.
    // ------------------------------------------------------------------

    /// Requests a pause. Returns true only when a program is running and
    /// not already paused.
    pub fn pause(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.running && !self.pause_requested.load(Ordering::SeqCst) {
            self.pause_requested.store(true, Ordering::SeqCst);
            info!("execution paused");
            true
        } else {
            false
        }
    }

    /// Clears a pause request. Returns true only when a program is running
    /// and paused.
    pub fn resume(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.running && self.pause_requested.load(Ordering::SeqCst) {
            self.pause_requested.store(false, Ordering::SeqCst);
            info!("execution resumed");
            true
        } else {
            false
        }
    }

    /// Requests a stop, clearing any pause so the loop can wake and exit.
    /// Returns true iff a program was running.
    pub fn stop(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.running {
            self.stop_requested.store(true, Ordering::SeqCst);
            self.pause_requested.store(false, Ordering::SeqCst);
            info!("emergency stop requested");
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn status(&self) -> ExecutorStatus {
        let state = self.state.lock().unwrap();
        ExecutorStatus {
            running: state.running,
            paused: self.pause_requested.load(Ordering::SeqCst),
            current_index: state
                .context
                .as_ref()
                .map(|context| context.current_action_index)
                .unwrap_or(0),
            total_actions: state.total_actions,
            program_id: state.program_id.clone(),
            dry_run: self.options.dry_run,
        }
    }

    /// Copy of the live context, safe to serialize. External readers must
    /// treat it as immutable.
    pub fn context_snapshot(&self) -> Option<ContextSnapshot> {
        self.state.lock().unwrap().context.clone()
    }
}
