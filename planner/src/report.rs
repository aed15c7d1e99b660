//! Rendering of terminal execution results for the command line.

use autopilot_protocol::protocol::ExecutionResult;

/// Renders one terminal result as an aligned table, with the error detail
/// block when present.
pub fn render_result(result: &ExecutionResult) -> String {
    let mut lines = vec![
        format!("program:          {}", result.program_id),
        format!("status:           {}", result.status),
        format!(
            "steps completed:  {}/{}",
            result.actions_completed, result.total_actions
        ),
        format!("duration:         {} ms", result.duration_ms),
    ];

    if let Some(error) = &result.error {
        lines.push(format!("error:            {error}"));
    }
    if let Some(details) = &result.error_details {
        lines.push("error details:".to_string());
        lines.push(format!("  action index:   {}", details.action_index));
        lines.push(format!("  action:         {}", details.action_name));
        lines.push(format!("  kind:           {}", details.error_kind));
        lines.push(format!("  message:        {}", details.error_message));
        lines.push(format!("  at:             {}", details.timestamp));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use autopilot_protocol::protocol::ExecutionError;
    use autopilot_protocol::protocol::ExecutionStatus;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn success_renders_without_an_error_block() {
        let result = ExecutionResult {
            program_id: "open a tab".to_string(),
            status: ExecutionStatus::Success,
            actions_completed: 3,
            total_actions: 3,
            duration_ms: 812,
            error: None,
            error_details: None,
            context: None,
        };
        let rendered = render_result(&result);
        assert!(rendered.contains("status:           success"));
        assert!(rendered.contains("steps completed:  3/3"));
        assert!(rendered.contains("duration:         812 ms"));
        assert_eq!(rendered.contains("error"), false);
    }

    #[test]
    fn failure_includes_the_detail_block() {
        let result = ExecutionResult {
            program_id: "fails".to_string(),
            status: ExecutionStatus::Failed,
            actions_completed: 1,
            total_actions: 3,
            duration_ms: 40,
            error: Some("action 1 (`type`) failed: boom".to_string()),
            error_details: Some(ExecutionError {
                action_index: 1,
                action_name: "type".to_string(),
                error_kind: "handler_failed".to_string(),
                error_message: "boom".to_string(),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                params: None,
            }),
            context: None,
        };
        let rendered = render_result(&result);
        assert!(rendered.contains("steps completed:  1/3"));
        assert!(rendered.contains("kind:           handler_failed"));
        assert!(rendered.contains("message:        boom"));
    }
}
