//! Defines the instruction protocol exchanged between the planner and the
//! actuator.
//!
//! A [`Program`] is the complete instruction document: metadata, a table of
//! named macros, and an ordered list of [`ActionStep`]s. Programs travel
//! between the two processes wrapped in a [`Message`] envelope, one JSON file
//! per message, correlated by `id` for request/response topics.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use uuid::Uuid;

/// Reserved action name that expands a named macro instead of dispatching a
/// registered handler.
pub const MACRO_ACTION: &str = "macro";

/// Root document produced by the planner and executed by the actuator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Program {
    /// Schema version, e.g. `"1.0"`. Must be non-empty.
    pub version: String,
    pub metadata: Metadata,
    /// Named, parameterizable action sequences invoked via the reserved
    /// `macro` action. The call graph over this table must be acyclic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub macros: BTreeMap<String, Vec<ActionStep>>,
    /// Top-level program body. Must be non-empty.
    pub actions: Vec<ActionStep>,
}

impl Program {
    /// Stable identifier for a run of this program. The description is
    /// treated opaquely; it is never parsed.
    pub fn id(&self) -> &str {
        &self.metadata.description
    }
}

/// Program metadata.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Metadata {
    /// Human description of the program. Required, non-empty, and doubles as
    /// the program id on the status topic.
    pub description: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub uses_vision: bool,
    /// Rough wall-clock estimate supplied by the planner, checked against
    /// the declared waits by the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

/// One instruction inside a program.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionStep {
    /// A registered action name, or the reserved [`MACRO_ACTION`].
    pub action: String,
    /// Parameter bag. Leaf strings may contain `{{identifier}}` substitution
    /// tokens, resolved against the execution context right before dispatch.
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    /// Sleep applied after the handler returns successfully, in milliseconds.
    #[serde(default)]
    pub wait_after_ms: u64,
    /// Optional human label for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ActionStep {
    pub fn is_macro_call(&self) -> bool {
        self.action == MACRO_ACTION
    }

    /// Name of the macro this step invokes, when it is a `macro` action.
    pub fn macro_name(&self) -> Option<&str> {
        if !self.is_macro_call() {
            return None;
        }
        self.params.get("name").and_then(Value::as_str)
    }

    /// Call-site variable bindings of a `macro` action, when present and
    /// well-formed (an object).
    pub fn macro_vars(&self) -> Option<&serde_json::Map<String, Value>> {
        if !self.is_macro_call() {
            return None;
        }
        self.params.get("vars").and_then(Value::as_object)
    }
}

/// Terminal status of one program run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Stopped,
}

/// Structured record of the step that terminated a failed run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutionError {
    /// 0-based index into the top-level action list.
    pub action_index: usize,
    pub action_name: String,
    /// Stable snake_case error kind, e.g. `handler_failed`.
    pub error_kind: String,
    pub error_message: String,
    /// ISO-8601 timestamp of the failure.
    pub timestamp: String,
    /// Parameters the step was dispatched with, post-substitution where
    /// substitution succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Map<String, Value>>,
}

/// One entry in the execution context's append-only audit vector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionRecord {
    /// Top-level action index this record belongs to.
    pub index: usize,
    pub action: String,
    /// Whatever the handler returned; opaque to the executor.
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

/// Serializable snapshot of the per-run execution context.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ContextSnapshot {
    pub program_id: String,
    pub start_time: String,
    pub variables: serde_json::Map<String, Value>,
    pub action_results: Vec<ActionRecord>,
    pub current_action_index: usize,
}

/// Terminal record for one program run, published on the status topic.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutionResult {
    pub program_id: String,
    pub status: ExecutionStatus,
    /// Count of completed top-level actions; a macro invocation counts as
    /// one regardless of how many steps it expands to.
    pub actions_completed: usize,
    pub total_actions: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSnapshot>,
}

/// Structured verdict returned by the visual verifier.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VerificationResult {
    pub safe_to_proceed: bool,
    /// Clamped to `[0, 1]`. Preserved even when the threshold overrides
    /// `safe_to_proceed`.
    pub confidence: f64,
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_coordinates: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<Vec<String>>,
    pub model_used: String,
}

/// Screen position in pixels from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// One directory on the message bus dedicated to one message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    /// Planner → actuator program submission.
    Program,
    /// Actuator → planner terminal result, stored under the submission id.
    ProgramStatus,
    /// Executor pause-point asking the planner for a screen observation.
    VisionRequest,
    /// Actuator's screenshot + pointer state, stored under the request id.
    VisionResponse,
    /// Planner's decision derived from the observation.
    VisionAction,
    /// Outcome of the decided action, stored under the request id.
    VisionResult,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Program,
        Topic::ProgramStatus,
        Topic::VisionRequest,
        Topic::VisionResponse,
        Topic::VisionAction,
        Topic::VisionResult,
    ];

    /// Subdirectory backing this topic on the bus.
    pub fn dir_name(self) -> &'static str {
        match self {
            Topic::Program => "program",
            Topic::ProgramStatus => "program_status",
            Topic::VisionRequest => "vision_request",
            Topic::VisionResponse => "vision_response",
            Topic::VisionAction => "vision_action",
            Topic::VisionResult => "vision_result",
        }
    }
}

/// Envelope written to the bus, one JSON file per message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub topic: Topic,
    /// Unique message id; request/response pairs reuse the same id so the
    /// responder can store under it and the requester can poll for it.
    pub id: String,
    /// ISO-8601 creation timestamp.
    pub timestamp: String,
    pub payload: Value,
}

impl Message {
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self::with_id(topic, Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id(topic: Topic, id: String, payload: Value) -> Self {
        Self {
            topic,
            id,
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }
}

/// Payload of [`Topic::Program`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgramSubmission {
    pub program: Program,
}

/// Payload of [`Topic::VisionRequest`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VisionRequest {
    pub request_id: String,
    pub task_description: String,
    pub workflow_goal: String,
    pub iteration: u32,
    pub max_iterations: u32,
}

/// Payload of [`Topic::VisionResponse`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VisionResponse {
    pub request_id: String,
    /// JPEG screenshot, base64-encoded. Absent when the capture failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
    pub mouse_position: Point,
    pub screen_size: ScreenSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VisionActionKind {
    Click,
    DoubleClick,
    RightClick,
    Type,
}

/// Payload of [`Topic::VisionAction`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VisionAction {
    pub request_id: String,
    pub action: VisionActionKind,
    pub coordinates: Point,
    /// Text to type, for [`VisionActionKind::Type`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// When set, the result carries a fresh screenshot taken after the
    /// action.
    #[serde(default)]
    pub request_followup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VisionResultStatus {
    Success,
    Error,
    Timeout,
}

/// Payload of [`Topic::VisionResult`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VisionResult {
    pub request_id: String,
    pub status: VisionResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
    pub mouse_position: Point,
}
