//! Actuator-side handler for the visual navigation loop.
//!
//! While a program is paused on a vision checkpoint, the planner drives
//! navigation over the bus: it asks for an observation (`vision_request` →
//! `vision_response` with a screenshot and pointer state), decides, and
//! sends back a concrete pointer/keyboard action (`vision_action` →
//! `vision_result`). This handler is the OS-facing half of that loop.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::info;
use tracing::warn;

use autopilot_protocol::protocol::Point;
use autopilot_protocol::protocol::ScreenSize;
use autopilot_protocol::protocol::Topic;
use autopilot_protocol::protocol::VisionAction;
use autopilot_protocol::protocol::VisionActionKind;
use autopilot_protocol::protocol::VisionRequest;
use autopilot_protocol::protocol::VisionResponse;
use autopilot_protocol::protocol::VisionResult;
use autopilot_protocol::protocol::VisionResultStatus;

use crate::bus::MessageBus;
use crate::capability::Keyboard;
use crate::capability::MouseButton;
use crate::capability::Pointer;
use crate::capability::PointerOptions;
use crate::capability::ScreenCapture;
use crate::error::Result;

/// Screenshot plus pointer state, as sent on `vision_response`.
#[derive(Debug, Clone)]
pub struct CurrentState {
    pub screenshot_base64: String,
    pub mouse_position: Point,
    pub screen_size: ScreenSize,
}

pub struct VisualNavigationHandler {
    screen: Arc<dyn ScreenCapture>,
    pointer: Arc<dyn Pointer>,
    keyboard: Arc<dyn Keyboard>,
    bus: Arc<MessageBus>,
    /// Pixels from each screen edge that vision-decided coordinates must
    /// keep clear of.
    margin: i32,
}

impl VisualNavigationHandler {
    pub fn new(
        screen: Arc<dyn ScreenCapture>,
        pointer: Arc<dyn Pointer>,
        keyboard: Arc<dyn Keyboard>,
        bus: Arc<MessageBus>,
        margin: u32,
    ) -> Self {
        Self {
            screen,
            pointer,
            keyboard,
            bus,
            margin: margin as i32,
        }
    }

    pub fn capture_current_state(&self) -> Result<CurrentState> {
        let screenshot = self.screen.capture_full()?;
        let mouse_position = self.pointer.position()?;
        let screen_size = self.screen.size()?;
        Ok(CurrentState {
            screenshot_base64: BASE64.encode(&screenshot.data),
            mouse_position,
            screen_size,
        })
    }

    /// Answers one observation request, publishing the response under the
    /// request id. Capture failures are reported inside the response rather
    /// than dropped.
    pub async fn handle_request(&self, request: &VisionRequest) -> Result<()> {
        info!(
            request_id = %request.request_id,
            iteration = request.iteration,
            "handling visual navigation request"
        );

        let response = match self.capture_current_state() {
            Ok(state) => VisionResponse {
                request_id: request.request_id.clone(),
                screenshot_base64: Some(state.screenshot_base64),
                mouse_position: state.mouse_position,
                screen_size: state.screen_size,
                error: None,
            },
            Err(e) => {
                warn!(request_id = %request.request_id, "state capture failed: {e}");
                VisionResponse {
                    request_id: request.request_id.clone(),
                    screenshot_base64: None,
                    mouse_position: Point { x: 0, y: 0 },
                    screen_size: ScreenSize {
                        width: 0,
                        height: 0,
                    },
                    error: Some(e.to_string()),
                }
            }
        };

        self.bus
            .send_with_id(Topic::VisionResponse, &request.request_id, &response)
            .await
    }

    /// Executes one vision-decided action and publishes its result under
    /// the request id.
    pub async fn handle_action(&self, command: &VisionAction) -> Result<()> {
        let result = self.execute_action(command);
        self.bus
            .send_with_id(Topic::VisionResult, &command.request_id, &result)
            .await
    }

    /// Runs the decided action against the input surfaces. Coordinates are
    /// bounds-checked before anything moves.
    pub fn execute_action(&self, command: &VisionAction) -> VisionResult {
        let Point { x, y } = command.coordinates;

        let screen_size = match self.screen.size() {
            Ok(size) => size,
            Err(e) => return self.error_result(command, format!("screen size unavailable: {e}")),
        };
        if let Err(message) = self.validate_coordinates(x, y, screen_size) {
            return self.error_result(command, format!("coordinate validation failed: {message}"));
        }

        let outcome = self.dispatch(command, x, y);
        if let Err(e) = outcome {
            return self.error_result(command, e.to_string());
        }

        let mouse_position = self.pointer.position().unwrap_or(Point { x, y });
        let screenshot_base64 = if command.request_followup {
            self.screen
                .capture_full()
                .ok()
                .map(|image| BASE64.encode(&image.data))
        } else {
            None
        };

        VisionResult {
            request_id: command.request_id.clone(),
            status: VisionResultStatus::Success,
            error: None,
            screenshot_base64,
            mouse_position,
        }
    }

    fn dispatch(&self, command: &VisionAction, x: i32, y: i32) -> Result<()> {
        let options = PointerOptions::default();
        match command.action {
            VisionActionKind::Click => {
                self.pointer.move_to(x, y, options)?;
                self.pointer.click(MouseButton::Left, 1)
            }
            VisionActionKind::DoubleClick => {
                self.pointer.move_to(x, y, options)?;
                self.pointer.click(MouseButton::Left, 2)
            }
            VisionActionKind::RightClick => {
                self.pointer.move_to(x, y, options)?;
                self.pointer.click(MouseButton::Right, 1)
            }
            VisionActionKind::Type => {
                self.pointer.move_to(x, y, options)?;
                if let Some(text) = &command.text {
                    self.keyboard.type_text(text, 0)?;
                }
                Ok(())
            }
        }
    }

    fn error_result(&self, command: &VisionAction, error: String) -> VisionResult {
        warn!(request_id = %command.request_id, "visual action failed: {error}");
        VisionResult {
            request_id: command.request_id.clone(),
            status: VisionResultStatus::Error,
            error: Some(error),
            screenshot_base64: None,
            mouse_position: self.pointer.position().unwrap_or(Point { x: 0, y: 0 }),
        }
    }

    /// Checks `(x, y)` against the screen bounds with the configured edge
    /// margin, building a per-edge error message on failure.
    fn validate_coordinates(
        &self,
        x: i32,
        y: i32,
        size: ScreenSize,
    ) -> std::result::Result<(), String> {
        let width = size.width as i32;
        let height = size.height as i32;
        let margin = self.margin;

        if margin <= x && x < width - margin && margin <= y && y < height - margin {
            return Ok(());
        }

        let mut errors: Vec<String> = Vec::new();
        if x < margin {
            errors.push(format!("x coordinate {x} is too close to the left edge (min {margin})"));
        } else if x >= width - margin {
            errors.push(format!(
                "x coordinate {x} is too close to the right edge (max {})",
                width - margin
            ));
        }
        if y < margin {
            errors.push(format!("y coordinate {y} is too close to the top edge (min {margin})"));
        } else if y >= height - margin {
            errors.push(format!(
                "y coordinate {y} is too close to the bottom edge (max {})",
                height - margin
            ));
        }
        Err(errors.join("; "))
    }
}
