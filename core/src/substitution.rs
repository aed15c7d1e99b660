//! Variable substitution pass applied to action parameters right before
//! dispatch.
//!
//! A single recursive pass produces a fresh params value; handlers never see
//! `{{...}}` tokens. When an entire string is one token the raw variable is
//! substituted in place, preserving non-string types (integers for
//! coordinates). Otherwise each token is replaced by its string form.

use serde_json::Map;
use serde_json::Value;

use autopilot_protocol::tokens;

use crate::error::AutopilotErr;
use crate::error::Result;

pub(crate) fn substitute_params(
    params: &Map<String, Value>,
    variables: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (key, value) in params {
        out.insert(key.clone(), substitute_value(value, variables)?);
    }
    Ok(out)
}

fn substitute_value(value: &Value, variables: &Map<String, Value>) -> Result<Value> {
    match value {
        Value::String(text) => substitute_string(text, variables),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, variables))
            .collect::<Result<Vec<Value>>>()
            .map(Value::Array),
        Value::Object(map) => Ok(Value::Object(substitute_params(map, variables)?)),
        other => Ok(other.clone()),
    }
}

fn substitute_string(text: &str, variables: &Map<String, Value>) -> Result<Value> {
    let identifiers = tokens::scan(text);
    if identifiers.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    let mut missing: Vec<String> = Vec::new();
    for identifier in &identifiers {
        if !variables.contains_key(identifier) && !missing.contains(identifier) {
            missing.push(identifier.clone());
        }
    }
    if !missing.is_empty() {
        let available = if variables.is_empty() {
            "none".to_string()
        } else {
            variables.keys().cloned().collect::<Vec<_>>().join(", ")
        };
        return Err(AutopilotErr::MissingVariable {
            missing: missing.join(", "),
            available,
        });
    }

    if tokens::is_single_token(text) {
        return Ok(variables.get(&identifiers[0]).cloned().unwrap_or(Value::Null));
    }

    Ok(Value::String(tokens::expand(text, |name| {
        variables.get(name).map(display_value).unwrap_or_default()
    })))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
