use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutopilotErr>;

#[derive(Error, Debug)]
pub enum AutopilotErr {
    /// The program did not pass parser checks and was never dispatched.
    #[error("program validation failed: {0}")]
    Validation(String),

    /// Another program is already running on this executor.
    #[error("another program is already running")]
    Busy,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("missing required parameter `{param}` for action `{action}`")]
    MissingParameter { action: String, param: String },

    #[error("unknown parameter `{param}` for action `{action}`")]
    UnknownParameter { action: String, param: String },

    /// A `{{...}}` token could not be resolved at substitution time. The
    /// message enumerates what *is* available so program authors can see
    /// which context variables exist at the point of failure.
    #[error(
        "missing required variables in context: {missing}; available: {available}. \
         Variables like `verified_x` and `verified_y` come from `verify_screen` results"
    )]
    MissingVariable { missing: String, available: String },

    #[error("macro `{0}` is not defined in the program")]
    UndefinedMacro(String),

    /// Caught at validation time; carried here for completeness of the
    /// taxonomy.
    #[error("circular macro dependency: {0}")]
    CircularDependency(String),

    /// Wraps whatever a capability or handler raised, preserving the
    /// underlying kind and message.
    #[error("action handler failed ({kind}): {message}")]
    HandlerFailed { kind: String, message: String },

    /// Pointer-drift detection fired: the user moved the mouse away from
    /// where automation last left it.
    #[error("execution interrupted: user moved the pointer")]
    UserInterrupted,

    /// Execution stopped cooperatively at a checkpoint.
    #[error("execution stopped by user")]
    Stopped,

    #[error("dangerous text blocked (matched deny pattern `{pattern}`)")]
    DangerousActionBlocked { pattern: String },

    /// Message bus read/write failure or a malformed message file.
    #[error("communication error: {0}")]
    Communication(String),

    /// The visual verifier returned an error or both models failed.
    #[error("visual verification failed: {0}")]
    VerificationFailed(String),

    /// A bounded wait expired (verifier call, `wait_for_*` actions).
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AutopilotErr {
    /// Stable snake_case identifier for this error, used in structured
    /// execution error records and on the status topic.
    pub fn kind(&self) -> &'static str {
        match self {
            AutopilotErr::Validation(_) => "validation_failed",
            AutopilotErr::Busy => "busy",
            AutopilotErr::UnknownAction(_) => "unknown_action",
            AutopilotErr::MissingParameter { .. } => "missing_parameter",
            AutopilotErr::UnknownParameter { .. } => "unknown_parameter",
            AutopilotErr::MissingVariable { .. } => "missing_variable",
            AutopilotErr::UndefinedMacro(_) => "undefined_macro",
            AutopilotErr::CircularDependency(_) => "circular_dependency",
            AutopilotErr::HandlerFailed { .. } => "handler_failed",
            AutopilotErr::UserInterrupted => "user_interrupted",
            AutopilotErr::Stopped => "stopped",
            AutopilotErr::DangerousActionBlocked { .. } => "dangerous_action_blocked",
            AutopilotErr::Communication(_) => "communication_error",
            AutopilotErr::VerificationFailed(_) => "verification_failed",
            AutopilotErr::Timeout(_) => "timeout",
            AutopilotErr::Io(_) => "io_error",
            AutopilotErr::Json(_) => "json_error",
            AutopilotErr::Http(_) => "http_error",
        }
    }
}
