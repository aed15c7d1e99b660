//! End-to-end program scenarios over the full default catalog, the mock
//! capability surfaces, and a scripted vision model.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use autopilot_protocol::parser::ProtocolParser;
use autopilot_protocol::protocol::ExecutionStatus;
use common::Harness;
use common::program;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn simple_program_succeeds_with_expected_timing() {
    let harness = Harness::new();
    let executor = harness.executor();
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "A", "complexity": "simple"},
        "actions": [
            {"action": "press_key", "params": {"key": "enter"}, "wait_after_ms": 100},
            {"action": "type", "params": {"text": "hello"}, "wait_after_ms": 50},
            {"action": "delay", "params": {"ms": 500}}
        ]
    }));

    let result = executor.execute(&program).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.actions_completed, 3);
    assert!(result.duration_ms >= 650, "duration {}", result.duration_ms);
    assert_eq!(result.error, None);

    // Handlers ran in declared order.
    let context = result.context.unwrap();
    let sequence: Vec<&str> = context
        .action_results
        .iter()
        .map(|record| record.action.as_str())
        .collect();
    assert_eq!(sequence, vec!["press_key", "type", "delay"]);
    assert_eq!(
        harness.surfaces.log(),
        vec!["press enter", "type hello @50ms"]
    );
}

#[tokio::test]
async fn macro_invocation_substitutes_and_counts_as_one() {
    let harness = Harness::new();
    let executor = harness.executor();
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "B"},
        "macros": {
            "search_in_browser": [
                {"action": "shortcut", "params": {"keys": ["ctrl", "l"]}, "wait_after_ms": 200},
                {"action": "type", "params": {"text": "{{query}}"}, "wait_after_ms": 100},
                {"action": "press_key", "params": {"key": "enter"}, "wait_after_ms": 500}
            ]
        },
        "actions": [
            {"action": "macro",
             "params": {"name": "search_in_browser", "vars": {"query": "elon musk"}}}
        ]
    }));

    let result = executor.execute(&program).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.actions_completed, 1);
    assert_eq!(
        harness.surfaces.log(),
        vec![
            "shortcut ctrl+l",
            "type elon musk @50ms",
            "press enter",
        ]
    );
}

#[tokio::test]
async fn mid_program_failure_captures_structured_details() {
    let harness = Harness::new();
    harness.surfaces.fail_on("type_text", "boom");
    let executor = harness.executor();
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "C"},
        "actions": [
            {"action": "press_key", "params": {"key": "a"}},
            {"action": "type", "params": {"text": "hello"}},
            {"action": "delay", "params": {"ms": 100}}
        ]
    }));

    let result = executor.execute(&program).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.actions_completed, 1);
    let error = result.error.unwrap();
    assert!(error.contains("type"), "error: {error}");
    assert!(error.contains("boom"), "error: {error}");

    let details = result.error_details.unwrap();
    assert_eq!(details.action_index, 1);
    assert_eq!(details.action_name, "type");
    assert!(details.error_message.contains("boom"));

    let context = result.context.unwrap();
    assert_eq!(context.action_results.len(), 2);
    assert_eq!(context.action_results[0].error, None);
    assert!(context.action_results[1].error.is_some());
}

#[tokio::test]
async fn verification_rebinds_coordinates_for_the_following_click() {
    let harness = Harness::new();
    harness.vision.set_reply(
        r#"{"safe_to_proceed": true, "confidence": 0.9,
            "analysis": "login button found",
            "coordinates": {"x": 640, "y": 360}}"#,
    );
    let executor = harness.executor();
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "D", "uses_vision": true},
        "actions": [
            {"action": "verify_screen",
             "params": {"context": "find login", "expected": "login button",
                        "confidence_threshold": 0.7}},
            {"action": "mouse_move",
             "params": {"x": "{{verified_x}}", "y": "{{verified_y}}"}},
            {"action": "mouse_click", "params": {"button": "left"}}
        ]
    }));

    let result = executor.execute(&program).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.actions_completed, 3);

    let log = harness.surfaces.log();
    assert!(log.contains(&"capture_full".to_string()));
    assert!(log.contains(&"move 640,360".to_string()));
    assert!(log.contains(&"click left x1".to_string()));

    let context = result.context.unwrap();
    assert_eq!(context.variables["verified_x"], json!(640));
    assert_eq!(context.variables["verified_y"], json!(360));
}

#[tokio::test]
async fn macro_cycles_are_rejected_at_validation() {
    let parser = ProtocolParser::new(1920, 1080);
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "E"},
        "macros": {
            "a": [{"action": "macro", "params": {"name": "b"}}],
            "b": [{"action": "macro", "params": {"name": "a"}}]
        },
        "actions": [{"action": "macro", "params": {"name": "a"}}]
    }));

    let result = parser.validate(&program);
    assert!(!result.is_valid);
    let cycle = result
        .errors
        .iter()
        .find(|e| e.contains("circular_dependency"))
        .expect("cycle error must be reported");
    assert!(cycle.contains('a') && cycle.contains('b'));
}

#[tokio::test]
async fn pause_during_the_final_wait_extends_the_run() {
    let harness = Harness::new();
    let executor = Arc::new(harness.executor());
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "F"},
        "actions": [{"action": "press_key", "params": {"key": "a"}, "wait_after_ms": 1000}]
    }));

    let started = Instant::now();
    let run = {
        let executor = executor.clone();
        let program = program.clone();
        tokio::spawn(async move { executor.execute(&program).await })
    };

    // Pause 100ms into the wait; the wait still runs to completion and the
    // pause interval is observed after it, before the loop exits.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(executor.pause());
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(executor.is_running());
    assert!(executor.resume());

    let result = run.await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.actions_completed, 1);
    assert!(result.duration_ms >= 1250, "duration {}", result.duration_ms);
    assert!(started.elapsed() >= Duration::from_millis(1250));
}

#[tokio::test]
async fn a_minimal_program_validates_clean_against_the_live_contracts() {
    let harness = Harness::new();
    let parser =
        ProtocolParser::new(1920, 1080).with_contracts(harness.registry.contracts());
    let program = program(json!({
        "version": "1.0",
        "metadata": {"description": "minimal"},
        "actions": [{"action": "press_key", "params": {"key": "enter"}}]
    }));

    let result = parser.validate(&program);
    assert!(result.is_valid);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!(result.warnings, Vec::<String>::new());
}
