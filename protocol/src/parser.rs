//! Parser and layered validator for instruction programs.
//!
//! Parsing and validation are two separate surfaces: [`ProtocolParser::parse`]
//! only turns JSON into a [`Program`], while [`ProtocolParser::validate`]
//! runs the layered checks (structure, action contracts, macro references,
//! cycle detection, coordinate bounds, timing sanity) and reports *every*
//! discovered issue on a two-channel [`ValidationResult`]. Warnings coexist
//! with `is_valid == true`; callers decide whether to treat them as fatal.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::catalog::ActionContracts;
use crate::protocol::ActionStep;
use crate::protocol::Program;
use crate::tokens;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of validating one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ValidationResult {
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Validates programs against a parameter-contract catalog and the geometry
/// of the target screen.
#[derive(Debug, Clone)]
pub struct ProtocolParser {
    screen_width: u32,
    screen_height: u32,
    /// Pixels from each screen edge treated as out of bounds. Zero means the
    /// full screen is addressable.
    margin: u32,
    contracts: ActionContracts,
}

impl ProtocolParser {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            screen_width,
            screen_height,
            margin: 0,
            contracts: ActionContracts::builtin(),
        }
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Replaces the built-in catalog, typically with the live registry's
    /// contracts so planner and actuator validate identically.
    pub fn with_contracts(mut self, contracts: ActionContracts) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn parse(&self, json: &str) -> Result<Program, ParseError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn parse_value(&self, value: Value) -> Result<Program, ParseError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Runs every validation layer and accumulates all issues found.
    pub fn validate(&self, program: &Program) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.check_structure(program, &mut result);
        if !result.is_valid {
            // The remaining layers assume a structurally sound document.
            return result;
        }

        self.check_action_contracts(program, &mut result);
        self.check_macro_references(program, &mut result);
        self.check_macro_cycles(program, &mut result);
        self.check_coordinate_bounds(program, &mut result);
        self.check_timing(program, &mut result);

        debug!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validated program `{}`",
            program.id()
        );
        result
    }

    fn check_structure(&self, program: &Program, result: &mut ValidationResult) {
        if program.version.is_empty() {
            result.add_error("program version cannot be empty");
        }
        if program.metadata.description.is_empty() {
            result.add_error("metadata description cannot be empty");
        }
        if program.actions.is_empty() {
            result.add_error("program must have at least one action");
        }
        for (name, body) in &program.macros {
            if name.is_empty() {
                result.add_error("macro name cannot be empty");
            }
            if body.is_empty() {
                result.add_error(format!("macro `{name}` has no actions"));
            }
        }
        for (label, step) in all_steps(program) {
            if step.action.is_empty() {
                result.add_error(format!("{label}: action name cannot be empty"));
            }
        }
    }

    fn check_action_contracts(&self, program: &Program, result: &mut ValidationResult) {
        for (label, step) in all_steps(program) {
            let Some(contract) = self.contracts.get(&step.action) else {
                result.add_error(format!(
                    "{label}: unknown action `{}`; it is not in the registered catalog",
                    step.action
                ));
                continue;
            };

            // A substitution token anywhere in the parameter set defers the
            // required-presence check to substitution time.
            let has_token = step
                .params
                .values()
                .any(tokens::value_contains_token);
            if !has_token {
                for required in &contract.required {
                    if !step.params.contains_key(required) {
                        result.add_error(format!(
                            "{label}: missing required parameter `{required}` for action `{}`",
                            step.action
                        ));
                    }
                }
            }

            for param in step.params.keys() {
                if !contract.required.iter().any(|p| p == param)
                    && !contract.optional.iter().any(|p| p == param)
                {
                    result.add_warning(format!(
                        "{label}: unknown parameter `{param}` for action `{}`",
                        step.action
                    ));
                }
            }

            self.check_param_types(&label, step, result);
        }
    }

    fn check_param_types(&self, label: &str, step: &ActionStep, result: &mut ValidationResult) {
        let params = &step.params;

        if step.action == "shortcut"
            && let Some(keys) = params.get("keys")
            && !keys.is_array()
        {
            result.add_error(format!(
                "{label}: `keys` must be an array for the shortcut action"
            ));
        }

        if matches!(
            step.action.as_str(),
            "mouse_move" | "mouse_drag" | "capture_region" | "wait_for_color"
        ) {
            for coord in ["x", "y"] {
                if let Some(value) = params.get(coord)
                    && !value.is_i64()
                    && !value.is_u64()
                    && !value.is_string()
                {
                    result.add_error(format!(
                        "{label}: `{coord}` must be an integer or a substitution token"
                    ));
                }
            }
        }

        for timing in ["ms", "delay_ms", "interval_ms", "timeout_ms"] {
            if let Some(value) = params.get(timing)
                && let Some(n) = value.as_i64()
                && n < 0
            {
                result.add_error(format!("{label}: `{timing}` must be non-negative, got {n}"));
            }
        }

        if matches!(step.action.as_str(), "mouse_click" | "mouse_double_click")
            && let Some(button) = params.get("button").and_then(Value::as_str)
            && !matches!(button, "left" | "right" | "middle")
        {
            result.add_error(format!(
                "{label}: `button` must be one of left, right, middle; got `{button}`"
            ));
        }

        if step.action == "mouse_scroll"
            && let Some(direction) = params.get("direction").and_then(Value::as_str)
            && !matches!(direction, "up" | "down" | "left" | "right")
        {
            result.add_error(format!(
                "{label}: `direction` must be one of up, down, left, right; got `{direction}`"
            ));
        }
    }

    fn check_macro_references(&self, program: &Program, result: &mut ValidationResult) {
        for (label, step) in all_steps(program) {
            if !step.is_macro_call() {
                continue;
            }

            let Some(name) = step.params.get("name").and_then(Value::as_str) else {
                // A missing `name` is already reported by the contract layer;
                // a non-string one is not, so call it out here.
                if step.params.contains_key("name") {
                    result.add_error(format!("{label}: macro `name` must be a string"));
                }
                continue;
            };

            if !program.macros.contains_key(name) {
                result.add_error(format!("{label}: macro `{name}` is not defined"));
            }

            if let Some(vars) = step.params.get("vars") {
                if !vars.is_object() {
                    result.add_error(format!("{label}: macro `vars` must be a mapping"));
                } else if let Some(body) = program.macros.get(name) {
                    self.check_macro_vars(&label, name, vars, body, result);
                }
            }
        }
    }

    /// Warns on variables the macro body uses but the call does not supply,
    /// and on supplied variables the body never references. Both are
    /// warnings: the execution context may provide the former at runtime.
    fn check_macro_vars(
        &self,
        label: &str,
        macro_name: &str,
        vars: &Value,
        body: &[ActionStep],
        result: &mut ValidationResult,
    ) {
        let mut used: HashSet<String> = HashSet::new();
        for step in body {
            for value in step.params.values() {
                collect_tokens(value, &mut used);
            }
        }
        let provided: HashSet<String> = vars
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        let mut missing: Vec<&String> = used.difference(&provided).collect();
        missing.sort();
        if !missing.is_empty() {
            result.add_warning(format!(
                "{label}: macro `{macro_name}` uses variables not supplied by this call: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let mut unused: Vec<&String> = provided.difference(&used).collect();
        unused.sort();
        if !unused.is_empty() {
            result.add_warning(format!(
                "{label}: macro `{macro_name}` call supplies unused variables: {}",
                unused
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    /// Depth-first traversal over the macro-call graph with an explicit
    /// recursion stack, so the reported path names every macro on the cycle.
    fn check_macro_cycles(&self, program: &Program, result: &mut ValidationResult) {
        let mut visited: HashSet<String> = HashSet::new();
        for name in program.macros.keys() {
            if !visited.contains(name) {
                let mut path: Vec<String> = Vec::new();
                let mut on_stack: HashSet<String> = HashSet::new();
                visit_macro(program, name, &mut visited, &mut on_stack, &mut path, result);
            }
        }
    }

    fn check_coordinate_bounds(&self, program: &Program, result: &mut ValidationResult) {
        let (width, height) = (i64::from(self.screen_width), i64::from(self.screen_height));
        let margin = i64::from(self.margin);

        for (label, step) in all_steps(program) {
            if let Some(x) = step.params.get("x").and_then(Value::as_i64)
                && (x < margin || x > width - margin)
            {
                result.add_warning(format!(
                    "{label}: x coordinate {x} is outside screen bounds ({margin}-{})",
                    width - margin
                ));
            }
            if let Some(y) = step.params.get("y").and_then(Value::as_i64)
                && (y < margin || y > height - margin)
            {
                result.add_warning(format!(
                    "{label}: y coordinate {y} is outside screen bounds ({margin}-{})",
                    height - margin
                ));
            }

            if step.action == "capture_region" {
                if let (Some(x), Some(w)) = (
                    step.params.get("x").and_then(Value::as_i64),
                    step.params.get("width").and_then(Value::as_i64),
                ) && x + w > width
                {
                    result.add_warning(format!(
                        "{label}: capture region extends beyond screen width \
                         (x={x}, width={w}, screen_width={width})"
                    ));
                }
                if let (Some(y), Some(h)) = (
                    step.params.get("y").and_then(Value::as_i64),
                    step.params.get("height").and_then(Value::as_i64),
                ) && y + h > height
                {
                    result.add_warning(format!(
                        "{label}: capture region extends beyond screen height \
                         (y={y}, height={h}, screen_height={height})"
                    ));
                }
            }
        }
    }

    /// Sums declared waits over the top-level body and warns when the total
    /// falls outside ±20% of the planner's estimate.
    fn check_timing(&self, program: &Program, result: &mut ValidationResult) {
        let Some(estimated) = program
            .metadata
            .estimated_duration_seconds
            .filter(|e| *e > 0)
        else {
            return;
        };

        let mut total_ms: u64 = 0;
        for step in &program.actions {
            total_ms += step.wait_after_ms;
            if step.action == "delay"
                && let Some(ms) = step.params.get("ms").and_then(Value::as_u64)
            {
                total_ms += ms;
            }
        }

        let estimated_ms = estimated * 1000;
        let lower = estimated_ms * 8 / 10;
        let upper = estimated_ms * 12 / 10;
        if total_ms < lower || total_ms > upper {
            result.add_warning(format!(
                "timing inconsistency: declared waits total {total_ms}ms but the \
                 estimated duration is {estimated_ms}ms"
            ));
        }
    }
}

fn visit_macro(
    program: &Program,
    name: &str,
    visited: &mut HashSet<String>,
    on_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
    result: &mut ValidationResult,
) {
    visited.insert(name.to_string());
    on_stack.insert(name.to_string());
    path.push(name.to_string());

    if let Some(body) = program.macros.get(name) {
        for step in body {
            let Some(called) = step.macro_name() else {
                continue;
            };
            if on_stack.contains(called) {
                result.add_error(format!(
                    "circular_dependency: {} -> {called}",
                    path.join(" -> ")
                ));
            } else if !visited.contains(called) {
                visit_macro(program, called, visited, on_stack, path, result);
            }
        }
    }

    on_stack.remove(name);
    path.pop();
}

/// Yields every action in the program with a human-readable location label:
/// the top-level body first, then each macro body.
fn all_steps(program: &Program) -> impl Iterator<Item = (String, &ActionStep)> {
    let top = program
        .actions
        .iter()
        .enumerate()
        .map(|(i, step)| (format!("action {i}"), step));
    let nested = program.macros.iter().flat_map(|(name, body)| {
        body.iter()
            .enumerate()
            .map(move |(i, step)| (format!("macro `{name}` action {i}"), step))
    });
    top.chain(nested)
}

fn collect_tokens(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::String(s) => out.extend(tokens::scan(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        _ => {}
    }
}
