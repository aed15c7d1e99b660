//! Central catalog of callable actions with strict parameter contracts.
//!
//! Each registered action carries a handler closure plus the metadata the
//! planner needs to write programs against it: category, description,
//! required/optional parameters with defaults, return hints, and JSON
//! examples. Handlers close over injected capability handles rather than
//! globals, so the whole catalog is deterministically testable against
//! mock surfaces. [`ActionRegistry::describe`] is the only public contract
//! between the planning prompt and the action surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use autopilot_protocol::catalog::ActionContracts;
use autopilot_protocol::catalog::ParamContract;
use futures::future::BoxFuture;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use strum_macros::Display;
use tracing::debug;

use crate::error::AutopilotErr;
use crate::error::Result;

pub type HandlerFuture = BoxFuture<'static, Result<Value>>;
pub type Handler = Arc<dyn Fn(Map<String, Value>) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ActionCategory {
    Keyboard,
    Mouse,
    Window,
    Browser,
    Clipboard,
    File,
    Screen,
    Timing,
    Vision,
    System,
    Edit,
    Macro,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 12] = [
        ActionCategory::Keyboard,
        ActionCategory::Mouse,
        ActionCategory::Window,
        ActionCategory::Browser,
        ActionCategory::Clipboard,
        ActionCategory::File,
        ActionCategory::Screen,
        ActionCategory::Timing,
        ActionCategory::Vision,
        ActionCategory::System,
        ActionCategory::Edit,
        ActionCategory::Macro,
    ];
}

/// A registered action: its contract plus the handler that implements it.
#[derive(Clone)]
pub struct ActionSpec {
    pub name: String,
    pub category: ActionCategory,
    pub description: String,
    pub required_params: Vec<String>,
    /// Optional parameter name -> default value, merged under the supplied
    /// params on dispatch.
    pub optional_params: Map<String, Value>,
    /// Field name -> type hint for handlers that return data.
    pub returns: Option<BTreeMap<String, String>>,
    pub examples: Vec<String>,
    handler: Handler,
}

impl ActionSpec {
    pub fn new(
        name: impl Into<String>,
        category: ActionCategory,
        description: impl Into<String>,
        handler: impl Fn(Map<String, Value>) -> HandlerFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            description: description.into(),
            required_params: Vec::new(),
            optional_params: Map::new(),
            returns: None,
            examples: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn required(mut self, params: &[&str]) -> Self {
        self.required_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn optional(mut self, params: &[(&str, Value)]) -> Self {
        self.optional_params = params
            .iter()
            .map(|(name, default)| (name.to_string(), default.clone()))
            .collect();
        self
    }

    pub fn returns(mut self, fields: &[(&str, &str)]) -> Self {
        self.returns = Some(
            fields
                .iter()
                .map(|(name, hint)| (name.to_string(), hint.to_string()))
                .collect(),
        );
        self
    }

    pub fn examples(mut self, examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Rendered call signature, e.g. `type(text, interval_ms=50)`.
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = self.required_params.clone();
        for (name, default) in &self.optional_params {
            parts.push(format!("{name}={default}"));
        }
        format!("{}({})", self.name, parts.join(", "))
    }
}

/// Registry mapping action names to handlers. Populated once at startup and
/// read-only thereafter.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    specs: BTreeMap<String, ActionSpec>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ActionSpec) {
        debug!(action = %spec.name, category = %spec.category, "registered action");
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Dispatches `name` with `params`.
    ///
    /// Fails with `unknown_action`, `missing_parameter`, or
    /// `unknown_parameter` before the handler runs; optional defaults are
    /// merged under the supplied params; any error raised by the handler is
    /// wrapped in `handler_failed` carrying the underlying kind and message.
    /// The handler's own return value is passed through unchanged.
    pub async fn execute(&self, name: &str, params: Map<String, Value>) -> Result<Value> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| AutopilotErr::UnknownAction(name.to_string()))?;

        for required in &spec.required_params {
            if !params.contains_key(required) {
                return Err(AutopilotErr::MissingParameter {
                    action: name.to_string(),
                    param: required.clone(),
                });
            }
        }
        for param in params.keys() {
            if !spec.required_params.iter().any(|p| p == param)
                && !spec.optional_params.contains_key(param)
            {
                return Err(AutopilotErr::UnknownParameter {
                    action: name.to_string(),
                    param: param.clone(),
                });
            }
        }

        let mut merged = spec.optional_params.clone();
        merged.extend(params);

        (spec.handler)(merged).await.map_err(|e| match e {
            already @ AutopilotErr::HandlerFailed { .. } => already,
            other => AutopilotErr::HandlerFailed {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        })
    }

    pub fn spec(&self, name: &str) -> Option<&ActionSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn list_actions(&self, category: Option<ActionCategory>) -> Vec<String> {
        self.specs
            .values()
            .filter(|spec| category.is_none_or(|c| spec.category == c))
            .map(|spec| spec.name.clone())
            .collect()
    }

    /// Parameter contracts in the shape the program validator consumes, so
    /// planner-side validation stays in sync with the live catalog.
    pub fn contracts(&self) -> ActionContracts {
        ActionContracts::from_entries(self.specs.values().map(|spec| {
            (
                spec.name.clone(),
                ParamContract {
                    required: spec.required_params.clone(),
                    optional: spec.optional_params.keys().cloned().collect(),
                },
            )
        }))
    }

    /// Machine-readable action library consumed by the planner's prompt.
    pub fn describe(&self) -> Value {
        let mut library = Map::new();
        for spec in self.specs.values() {
            let mut entry = Map::new();
            entry.insert("category".to_string(), json!(spec.category.to_string()));
            entry.insert("description".to_string(), json!(spec.description));
            entry.insert(
                "params".to_string(),
                json!({
                    "required": spec.required_params,
                    "optional": spec.optional_params,
                }),
            );
            if let Some(returns) = &spec.returns {
                entry.insert("returns".to_string(), json!(returns));
            }
            if !spec.examples.is_empty() {
                entry.insert("examples".to_string(), json!(spec.examples));
            }
            library.insert(spec.name.clone(), Value::Object(entry));
        }
        Value::Object(library)
    }

    /// Markdown documentation of the catalog, optionally for one category.
    pub fn generate_documentation(&self, category: Option<ActionCategory>) -> String {
        let mut lines = vec!["# Action Library".to_string()];

        let categories: Vec<ActionCategory> = match category {
            Some(c) => vec![c],
            None => ActionCategory::ALL.to_vec(),
        };

        for cat in categories {
            let actions = self.list_actions(Some(cat));
            if actions.is_empty() {
                continue;
            }
            lines.push(format!("\n## {} actions\n", cat.to_string().to_uppercase()));
            for name in actions {
                let Some(spec) = self.specs.get(&name) else {
                    continue;
                };
                lines.push(format!("### {name}"));
                lines.push(format!("\n{}\n", spec.description));
                lines.push(format!("Signature: `{}`\n", spec.signature()));
                if let Some(returns) = &spec.returns {
                    lines.push("Returns:".to_string());
                    for (field, hint) in returns {
                        lines.push(format!("- `{field}`: {hint}"));
                    }
                    lines.push(String::new());
                }
                for example in &spec.examples {
                    lines.push(format!("```json\n{example}\n```"));
                }
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    use super::*;

    fn echo_spec() -> ActionSpec {
        ActionSpec::new("echo", ActionCategory::System, "echo the params", |params| {
            async move { Ok(Value::Object(params)) }.boxed()
        })
        .required(&["text"])
        .optional(&[("volume", json!(5))])
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let registry = ActionRegistry::new();
        let err = registry.execute("missing", Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_action");
    }

    #[tokio::test]
    async fn missing_required_parameter_is_rejected() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_spec());
        let err = registry.execute("echo", Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), "missing_parameter");
        assert!(err.to_string().contains("text"));
    }

    #[tokio::test]
    async fn unknown_parameter_is_rejected() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_spec());
        let params = json!({"text": "hi", "loudness": 3})
            .as_object()
            .cloned()
            .unwrap();
        let err = registry.execute("echo", params).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_parameter");
        assert!(err.to_string().contains("loudness"));
    }

    #[tokio::test]
    async fn defaults_are_merged_under_supplied_params() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_spec());

        let params = json!({"text": "hi"}).as_object().cloned().unwrap();
        let seen = registry.execute("echo", params).await.unwrap();
        assert_eq!(seen["volume"], json!(5));

        // Supplying the optional explicitly is equivalent to relying on the
        // default merge.
        let explicit = json!({"text": "hi", "volume": 5})
            .as_object()
            .cloned()
            .unwrap();
        let seen_explicit = registry.execute("echo", explicit).await.unwrap();
        assert_eq!(seen, seen_explicit);
    }

    #[tokio::test]
    async fn handler_errors_are_wrapped_with_the_underlying_kind() {
        let mut registry = ActionRegistry::new();
        registry.register(ActionSpec::new(
            "explode",
            ActionCategory::System,
            "always fails",
            |_params| {
                async move { Err(std::io::Error::other("boom").into()) }.boxed()
            },
        ));

        let err = registry.execute("explode", Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), "handler_failed");
        let text = err.to_string();
        assert!(text.contains("io_error"), "missing kind: {text}");
        assert!(text.contains("boom"), "missing message: {text}");
    }

    #[tokio::test]
    async fn handler_return_value_passes_through_unchanged() {
        let mut registry = ActionRegistry::new();
        registry.register(ActionSpec::new(
            "position",
            ActionCategory::Mouse,
            "where is the pointer",
            |_params| async move { Ok(json!({"x": 3, "y": 4})) }.boxed(),
        ));

        let value = registry.execute("position", Map::new()).await.unwrap();
        assert_eq!(value, json!({"x": 3, "y": 4}));
    }

    #[test]
    fn describe_exposes_the_full_contract() {
        let mut registry = ActionRegistry::new();
        registry.register(
            echo_spec()
                .returns(&[("text", "string")])
                .examples(&[r#"{"action": "echo", "params": {"text": "hi"}}"#]),
        );

        let library = registry.describe();
        let entry = &library["echo"];
        assert_eq!(entry["category"], json!("system"));
        assert_eq!(entry["params"]["required"], json!(["text"]));
        assert_eq!(entry["params"]["optional"]["volume"], json!(5));
        assert_eq!(entry["returns"]["text"], json!("string"));
    }

    #[test]
    fn contracts_mirror_the_registered_specs() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_spec());
        let contracts = registry.contracts();
        let contract = contracts.get("echo").unwrap();
        assert_eq!(contract.required, vec!["text"]);
        assert_eq!(contract.optional, vec!["volume"]);
    }

    #[test]
    fn documentation_groups_by_category() {
        let mut registry = ActionRegistry::new();
        registry.register(echo_spec());
        let docs = registry.generate_documentation(None);
        assert!(docs.contains("## SYSTEM actions"));
        assert!(docs.contains("### echo"));
        assert!(docs.contains("`echo(text, volume=5)`"));
    }
}
