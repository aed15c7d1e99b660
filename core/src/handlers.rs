//! Default action handler catalog.
//!
//! [`register_default_actions`] installs every built-in action family into a
//! registry. Handlers are closures over the injected capability handles in
//! [`Deps`]; several families (browser, clipboard, edit) are implemented as
//! keyboard shortcuts over the capability layer, matching how desktop
//! applications expose those operations.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::capability::Clipboard;
use crate::capability::Keyboard;
use crate::capability::MotionProfile;
use crate::capability::MouseButton;
use crate::capability::Pointer;
use crate::capability::PointerOptions;
use crate::capability::ScreenCapture;
use crate::capability::ScrollDirection;
use crate::capability::System;
use crate::error::AutopilotErr;
use crate::error::Result;
use crate::registry::ActionCategory;
use crate::registry::ActionRegistry;
use crate::registry::ActionSpec;
use crate::verifier::VisualVerifier;

/// How often the `wait_for_*` actions re-check their condition.
const WAIT_POLL_TICK: Duration = Duration::from_millis(100);

/// Capability handles injected into every handler closure.
#[derive(Clone)]
pub struct Deps {
    pub keyboard: Arc<dyn Keyboard>,
    pub pointer: Arc<dyn Pointer>,
    pub screen: Arc<dyn ScreenCapture>,
    pub clipboard: Arc<dyn Clipboard>,
    pub system: Arc<dyn System>,
    pub verifier: Arc<VisualVerifier>,
}

pub fn register_default_actions(registry: &mut ActionRegistry, deps: &Deps) {
    register_keyboard_actions(registry, deps);
    register_mouse_actions(registry, deps);
    register_window_actions(registry, deps);
    register_browser_actions(registry, deps);
    register_clipboard_actions(registry, deps);
    register_file_actions(registry, deps);
    register_screen_actions(registry, deps);
    register_timing_actions(registry, deps);
    register_vision_actions(registry, deps);
    register_system_actions(registry, deps);
    register_edit_actions(registry, deps);
    register_macro_action(registry);
}

fn invalid_param(name: &str, expected: &str) -> AutopilotErr {
    AutopilotErr::HandlerFailed {
        kind: "invalid_parameter".to_string(),
        message: format!("`{name}` must be {expected}"),
    }
}

fn str_param(params: &Map<String, Value>, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid_param(name, "a string"))
}

fn u64_param(params: &Map<String, Value>, name: &str) -> Result<u64> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid_param(name, "a non-negative integer"))
}

fn f64_param(params: &Map<String, Value>, name: &str) -> Result<f64> {
    params
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid_param(name, "a number"))
}

fn coord_param(params: &Map<String, Value>, name: &str) -> Result<i32> {
    params
        .get(name)
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .ok_or_else(|| invalid_param(name, "an integer"))
}

fn key_list_param(params: &Map<String, Value>, name: &str) -> Result<Vec<String>> {
    params
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect::<Vec<String>>()
        })
        .filter(|keys| !keys.is_empty())
        .ok_or_else(|| invalid_param(name, "a non-empty array of key names"))
}

fn button_param(params: &Map<String, Value>) -> Result<MouseButton> {
    let name = str_param(params, "button")?;
    MouseButton::from_str(&name).map_err(|e| invalid_param("button", &e))
}

fn pointer_options(params: &Map<String, Value>) -> PointerOptions {
    let smooth = params
        .get("smooth")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let speed = params.get("speed").and_then(Value::as_f64).unwrap_or(1.0);
    PointerOptions {
        profile: if smooth {
            MotionProfile::Bezier
        } else {
            MotionProfile::Straight
        },
        speed,
    }
}

fn register_keyboard_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "press_key",
            ActionCategory::Keyboard,
            "Press and release a SINGLE key",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let key = str_param(&params, "key")?;
                    keyboard.press(&key)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["key"])
        .examples(&[
            r#"{"action": "press_key", "params": {"key": "enter"}}"#,
            r#"{"action": "press_key", "params": {"key": "escape"}}"#,
        ]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "shortcut",
            ActionCategory::Keyboard,
            "Press MULTIPLE keys SIMULTANEOUSLY (Ctrl+T, Alt+F4, etc.)",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let keys = key_list_param(&params, "keys")?;
                    keyboard.shortcut(&keys)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["keys"])
        .examples(&[
            r#"{"action": "shortcut", "params": {"keys": ["ctrl", "t"]}}"#,
            r#"{"action": "shortcut", "params": {"keys": ["alt", "f4"]}}"#,
        ]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "type",
            ActionCategory::Keyboard,
            "Type text of ANY length (words, sentences, paragraphs, full posts)",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let text = str_param(&params, "text")?;
                    let interval_ms = u64_param(&params, "interval_ms")?;
                    keyboard.type_text(&text, interval_ms)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["text"])
        .optional(&[("interval_ms", json!(50))])
        .examples(&[r#"{"action": "type", "params": {"text": "Hello World"}}"#]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "type_with_delay",
            ActionCategory::Keyboard,
            "Type text with slower speed (for sensitive fields)",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let text = str_param(&params, "text")?;
                    let delay_ms = u64_param(&params, "delay_ms")?;
                    keyboard.type_text(&text, delay_ms)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["text", "delay_ms"])
        .examples(&[
            r#"{"action": "type_with_delay", "params": {"text": "password123", "delay_ms": 100}}"#,
        ]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "hold_key",
            ActionCategory::Keyboard,
            "Press and hold a key (release with release_key)",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let key = str_param(&params, "key")?;
                    keyboard.hold(&key)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["key"])
        .examples(&[r#"{"action": "hold_key", "params": {"key": "shift"}}"#]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "release_key",
            ActionCategory::Keyboard,
            "Release a held key",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let key = str_param(&params, "key")?;
                    keyboard.release(&key)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["key"]),
    );
}

fn register_mouse_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_move",
            ActionCategory::Mouse,
            "Move the mouse to screen coordinates along a smooth curved path",
            move |params| {
                let pointer = pointer.clone();
                async move {
                    let x = coord_param(&params, "x")?;
                    let y = coord_param(&params, "y")?;
                    pointer.move_to(x, y, pointer_options(&params))?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["x", "y"])
        .optional(&[("smooth", json!(true)), ("speed", json!(1.0))])
        .examples(&[r#"{"action": "mouse_move", "params": {"x": 640, "y": 360}}"#]),
    );

    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_click",
            ActionCategory::Mouse,
            "Click the mouse at the current position",
            move |params| {
                let pointer = pointer.clone();
                async move {
                    let button = button_param(&params)?;
                    let clicks = u64_param(&params, "clicks")? as u32;
                    pointer.click(button, clicks)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .optional(&[("button", json!("left")), ("clicks", json!(1))])
        .examples(&[r#"{"action": "mouse_click", "params": {"button": "left"}}"#]),
    );

    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_double_click",
            ActionCategory::Mouse,
            "Double-click the mouse at the current position",
            move |params| {
                let pointer = pointer.clone();
                async move {
                    let button = button_param(&params)?;
                    pointer.click(button, 2)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .optional(&[("button", json!("left"))]),
    );

    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_right_click",
            ActionCategory::Mouse,
            "Right-click the mouse at the current position",
            move |_params| {
                let pointer = pointer.clone();
                async move {
                    pointer.click(MouseButton::Right, 1)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ),
    );

    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_drag",
            ActionCategory::Mouse,
            "Drag from the current position to target coordinates",
            move |params| {
                let pointer = pointer.clone();
                async move {
                    let x = coord_param(&params, "x")?;
                    let y = coord_param(&params, "y")?;
                    pointer.drag(x, y, pointer_options(&params))?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["x", "y"])
        .optional(&[("smooth", json!(true))]),
    );

    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_scroll",
            ActionCategory::Mouse,
            "Scroll the mouse wheel in a direction",
            move |params| {
                let pointer = pointer.clone();
                async move {
                    let direction = str_param(&params, "direction")?;
                    let direction = ScrollDirection::from_str(&direction)
                        .map_err(|e| invalid_param("direction", &e))?;
                    let amount = u64_param(&params, "amount")? as i32;
                    pointer.scroll(direction, amount)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["direction", "amount"])
        .examples(&[r#"{"action": "mouse_scroll", "params": {"direction": "down", "amount": 3}}"#]),
    );

    let pointer = deps.pointer.clone();
    registry.register(
        ActionSpec::new(
            "mouse_position",
            ActionCategory::Mouse,
            "Report the current mouse position",
            move |_params| {
                let pointer = pointer.clone();
                async move {
                    let position = pointer.position()?;
                    Ok(json!({"x": position.x, "y": position.y}))
                }
                .boxed()
            },
        )
        .returns(&[("x", "int"), ("y", "int")]),
    );
}

fn register_window_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "open_app",
            ActionCategory::Window,
            "Open an application by name",
            move |params| {
                let system = system.clone();
                async move {
                    let app_name = str_param(&params, "app_name")?;
                    system.open_application(&app_name)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["app_name"])
        .examples(&[r#"{"action": "open_app", "params": {"app_name": "chrome"}}"#]),
    );

    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "close_app",
            ActionCategory::Window,
            "Close an application by name",
            move |params| {
                let system = system.clone();
                async move {
                    let app_name = str_param(&params, "app_name")?;
                    system.close_application(&app_name)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["app_name"]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "switch_window",
            ActionCategory::Window,
            "Switch to the next or previous window",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let direction = str_param(&params, "direction")?;
                    let keys: &[&str] = match direction.as_str() {
                        "previous" => &["alt", "shift", "tab"],
                        _ => &["alt", "tab"],
                    };
                    keyboard.shortcut(&keys.iter().map(|k| k.to_string()).collect::<Vec<_>>())?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .optional(&[("direction", json!("next"))]),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "minimize_window",
            ActionCategory::Window,
            "Minimize the active window",
            move |_params| {
                let keyboard = keyboard.clone();
                async move {
                    keyboard.shortcut(&["super".to_string(), "down".to_string()])?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "maximize_window",
            ActionCategory::Window,
            "Maximize the active window",
            move |_params| {
                let keyboard = keyboard.clone();
                async move {
                    keyboard.shortcut(&["super".to_string(), "up".to_string()])?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ),
    );

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "restore_window",
            ActionCategory::Window,
            "Restore the active window to its previous size",
            move |_params| {
                let keyboard = keyboard.clone();
                async move {
                    keyboard.shortcut(&[
                        "super".to_string(),
                        "shift".to_string(),
                        "up".to_string(),
                    ])?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ),
    );

    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "get_active_window",
            ActionCategory::Window,
            "Report the title of the active window",
            move |_params| {
                let system = system.clone();
                async move {
                    let title = system.active_window_title()?;
                    Ok(json!({"title": title}))
                }
                .boxed()
            },
        )
        .returns(&[("title", "string")]),
    );
}

fn register_browser_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "open_url",
            ActionCategory::Browser,
            "Open a URL in the default browser",
            move |params| {
                let system = system.clone();
                async move {
                    let url = str_param(&params, "url")?;
                    system.open_url(&url)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["url"])
        .examples(&[r#"{"action": "open_url", "params": {"url": "https://example.com"}}"#]),
    );

    // The remaining browser actions are standard shortcuts every major
    // browser honors.
    let shortcuts: &[(&str, &str, &[&str])] = &[
        ("browser_back", "Navigate back in browser history", &["alt", "left"]),
        ("browser_forward", "Navigate forward in browser history", &["alt", "right"]),
        ("browser_refresh", "Refresh the current page", &["ctrl", "r"]),
        ("browser_new_tab", "Open a new browser tab", &["ctrl", "t"]),
        ("browser_close_tab", "Close the current browser tab", &["ctrl", "w"]),
        ("browser_address_bar", "Focus the browser address bar", &["ctrl", "l"]),
        ("browser_bookmark", "Bookmark the current page", &["ctrl", "d"]),
        ("browser_find", "Open find-in-page", &["ctrl", "f"]),
    ];
    for (name, description, keys) in shortcuts {
        let keyboard = deps.keyboard.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        registry.register(ActionSpec::new(
            *name,
            ActionCategory::Browser,
            *description,
            move |_params| {
                let keyboard = keyboard.clone();
                let keys = keys.clone();
                async move {
                    keyboard.shortcut(&keys)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ));
    }

    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "browser_switch_tab",
            ActionCategory::Browser,
            "Switch to the next or previous browser tab",
            move |params| {
                let keyboard = keyboard.clone();
                async move {
                    let direction = str_param(&params, "direction")?;
                    let keys: &[&str] = match direction.as_str() {
                        "previous" => &["ctrl", "shift", "tab"],
                        _ => &["ctrl", "tab"],
                    };
                    keyboard.shortcut(&keys.iter().map(|k| k.to_string()).collect::<Vec<_>>())?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .optional(&[("direction", json!("next"))]),
    );
}

fn register_clipboard_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let shortcuts: &[(&str, &str, &[&str])] = &[
        ("copy", "Copy the selection to the clipboard", &["ctrl", "c"]),
        ("paste", "Paste the clipboard contents", &["ctrl", "v"]),
        ("cut", "Cut the selection to the clipboard", &["ctrl", "x"]),
    ];
    for (name, description, keys) in shortcuts {
        let keyboard = deps.keyboard.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        registry.register(ActionSpec::new(
            *name,
            ActionCategory::Clipboard,
            *description,
            move |_params| {
                let keyboard = keyboard.clone();
                let keys = keys.clone();
                async move {
                    keyboard.shortcut(&keys)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ));
    }

    let clipboard = deps.clipboard.clone();
    registry.register(
        ActionSpec::new(
            "get_clipboard",
            ActionCategory::Clipboard,
            "Read the clipboard contents",
            move |_params| {
                let clipboard = clipboard.clone();
                async move {
                    let text = clipboard.read()?;
                    Ok(json!({"text": text}))
                }
                .boxed()
            },
        )
        .returns(&[("text", "string")]),
    );

    let clipboard = deps.clipboard.clone();
    registry.register(
        ActionSpec::new(
            "set_clipboard",
            ActionCategory::Clipboard,
            "Write text to the clipboard",
            move |params| {
                let clipboard = clipboard.clone();
                async move {
                    let text = str_param(&params, "text")?;
                    clipboard.write(&text)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["text"]),
    );

    let clipboard = deps.clipboard.clone();
    let keyboard = deps.keyboard.clone();
    registry.register(
        ActionSpec::new(
            "paste_from_clipboard",
            ActionCategory::Clipboard,
            "Write text to the clipboard, then paste it (fast path for long text)",
            move |params| {
                let clipboard = clipboard.clone();
                let keyboard = keyboard.clone();
                async move {
                    let text = str_param(&params, "text")?;
                    clipboard.write(&text)?;
                    keyboard.shortcut(&["ctrl".to_string(), "v".to_string()])?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["text"]),
    );
}

fn register_file_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "open_file",
            ActionCategory::File,
            "Open a file with its default application",
            move |params| {
                let system = system.clone();
                async move {
                    let path = str_param(&params, "path")?;
                    system.open_path(&path)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["path"]),
    );

    let shortcuts: &[(&str, &str, &[&str])] = &[
        ("save_file", "Save the current document", &["ctrl", "s"]),
        ("save_as", "Save the current document under a new name", &["ctrl", "shift", "s"]),
        ("open_file_dialog", "Open the file-open dialog", &["ctrl", "o"]),
    ];
    for (name, description, keys) in shortcuts {
        let keyboard = deps.keyboard.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        registry.register(ActionSpec::new(
            *name,
            ActionCategory::File,
            *description,
            move |_params| {
                let keyboard = keyboard.clone();
                let keys = keys.clone();
                async move {
                    keyboard.shortcut(&keys)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ));
    }

    registry.register(
        ActionSpec::new(
            "create_folder",
            ActionCategory::File,
            "Create a folder (and any missing parents)",
            move |params| {
                async move {
                    let path = str_param(&params, "path")?;
                    tokio::fs::create_dir_all(&path).await?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["path"]),
    );

    registry.register(
        ActionSpec::new(
            "delete_file",
            ActionCategory::File,
            "Delete a file",
            move |params| {
                async move {
                    let path = str_param(&params, "path")?;
                    tokio::fs::remove_file(&path).await?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["path"]),
    );
}

fn register_screen_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let screen = deps.screen.clone();
    registry.register(
        ActionSpec::new(
            "capture_screen",
            ActionCategory::Screen,
            "Capture the full screen",
            move |_params| {
                let screen = screen.clone();
                async move {
                    let image = screen.capture_full()?;
                    Ok(json!({"width": image.width, "height": image.height}))
                }
                .boxed()
            },
        )
        .returns(&[("width", "int"), ("height", "int")]),
    );

    let screen = deps.screen.clone();
    registry.register(
        ActionSpec::new(
            "capture_region",
            ActionCategory::Screen,
            "Capture a rectangular region of the screen",
            move |params| {
                let screen = screen.clone();
                async move {
                    let x = coord_param(&params, "x")?;
                    let y = coord_param(&params, "y")?;
                    let width = u64_param(&params, "width")? as u32;
                    let height = u64_param(&params, "height")? as u32;
                    let image = screen.capture_region(x, y, width, height)?;
                    Ok(json!({"width": image.width, "height": image.height}))
                }
                .boxed()
            },
        )
        .required(&["x", "y", "width", "height"]),
    );

    let screen = deps.screen.clone();
    registry.register(
        ActionSpec::new(
            "capture_window",
            ActionCategory::Screen,
            "Capture the active window",
            move |_params| {
                let screen = screen.clone();
                async move {
                    let image = screen.capture_full()?;
                    Ok(json!({"width": image.width, "height": image.height}))
                }
                .boxed()
            },
        ),
    );

    let screen = deps.screen.clone();
    registry.register(
        ActionSpec::new(
            "save_screenshot",
            ActionCategory::Screen,
            "Capture the full screen and save it to a file",
            move |params| {
                let screen = screen.clone();
                async move {
                    let path = str_param(&params, "path")?;
                    let image = screen.capture_full()?;
                    tokio::fs::write(&path, &image.data).await?;
                    Ok(json!({"path": path}))
                }
                .boxed()
            },
        )
        .required(&["path"]),
    );
}

fn register_timing_actions(registry: &mut ActionRegistry, deps: &Deps) {
    registry.register(
        ActionSpec::new(
            "delay",
            ActionCategory::Timing,
            "Wait for a fixed number of milliseconds",
            move |params| {
                async move {
                    let ms = u64_param(&params, "ms")?;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .required(&["ms"])
        .examples(&[r#"{"action": "delay", "params": {"ms": 500}}"#]),
    );

    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "wait_for_window",
            ActionCategory::Timing,
            "Wait until a window whose title contains the given text is active",
            move |params| {
                let system = system.clone();
                async move {
                    let title = str_param(&params, "title")?;
                    let timeout = Duration::from_millis(u64_param(&params, "timeout_ms")?);
                    let wanted = title.to_lowercase();
                    let started = Instant::now();
                    loop {
                        let active = system.active_window_title()?;
                        if active.to_lowercase().contains(&wanted) {
                            return Ok(json!({"found": true, "title": active}));
                        }
                        if started.elapsed() >= timeout {
                            return Err(AutopilotErr::Timeout(timeout));
                        }
                        tokio::time::sleep(WAIT_POLL_TICK).await;
                    }
                }
                .boxed()
            },
        )
        .required(&["title"])
        .optional(&[("timeout_ms", json!(5000))])
        .returns(&[("found", "bool"), ("title", "string")]),
    );

    let screen = deps.screen.clone();
    registry.register(
        ActionSpec::new(
            "wait_for_image",
            ActionCategory::Timing,
            "Wait until a template image appears on screen",
            move |params| {
                let screen = screen.clone();
                async move {
                    let image_path = str_param(&params, "image_path")?;
                    let timeout = Duration::from_millis(u64_param(&params, "timeout_ms")?);
                    let confidence = f64_param(&params, "confidence")?;
                    let started = Instant::now();
                    loop {
                        if let Some(center) = screen.locate_image(&image_path, confidence)? {
                            return Ok(json!({"found": true, "x": center.x, "y": center.y}));
                        }
                        if started.elapsed() >= timeout {
                            return Err(AutopilotErr::Timeout(timeout));
                        }
                        tokio::time::sleep(WAIT_POLL_TICK).await;
                    }
                }
                .boxed()
            },
        )
        .required(&["image_path"])
        .optional(&[("timeout_ms", json!(5000)), ("confidence", json!(0.8))])
        .returns(&[("found", "bool"), ("x", "int"), ("y", "int")]),
    );

    let screen = deps.screen.clone();
    registry.register(
        ActionSpec::new(
            "wait_for_color",
            ActionCategory::Timing,
            "Wait until the pixel at (x, y) matches a color",
            move |params| {
                let screen = screen.clone();
                async move {
                    let x = coord_param(&params, "x")?;
                    let y = coord_param(&params, "y")?;
                    let color = str_param(&params, "color")?;
                    let timeout = Duration::from_millis(u64_param(&params, "timeout_ms")?);
                    let started = Instant::now();
                    loop {
                        let current = screen.pixel_color(x, y)?;
                        if current.eq_ignore_ascii_case(&color) {
                            return Ok(json!({"found": true, "color": current}));
                        }
                        if started.elapsed() >= timeout {
                            return Err(AutopilotErr::Timeout(timeout));
                        }
                        tokio::time::sleep(WAIT_POLL_TICK).await;
                    }
                }
                .boxed()
            },
        )
        .required(&["x", "y", "color"])
        .optional(&[("timeout_ms", json!(5000))]),
    );
}

fn register_vision_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let verifier = deps.verifier.clone();
    registry.register(
        ActionSpec::new(
            "verify_screen",
            ActionCategory::Vision,
            "Verify the screen state with the vision model before proceeding",
            move |params| {
                let verifier = verifier.clone();
                async move {
                    let context = str_param(&params, "context")?;
                    let expected = str_param(&params, "expected")?;
                    let threshold = f64_param(&params, "confidence_threshold")?;
                    let result = verifier.verify(&context, &expected, threshold, None).await;
                    Ok(serde_json::to_value(result)?)
                }
                .boxed()
            },
        )
        .required(&["context", "expected"])
        .optional(&[("confidence_threshold", json!(0.7))])
        .returns(&[
            ("safe_to_proceed", "bool"),
            ("confidence", "float"),
            ("analysis", "string"),
            ("updated_coordinates", "object?"),
        ])
        .examples(&[
            r#"{"action": "verify_screen", "params": {"context": "find login", "expected": "login button visible", "confidence_threshold": 0.7}}"#,
        ]),
    );

    let verifier = deps.verifier.clone();
    registry.register(
        ActionSpec::new(
            "verify_element",
            ActionCategory::Vision,
            "Verify that a described UI element is visible and interactable",
            move |params| {
                let verifier = verifier.clone();
                async move {
                    let description = str_param(&params, "element_description")?;
                    let result = verifier
                        .verify(
                            &format!("looking for: {description}"),
                            &format!("{description} is visible and interactable"),
                            0.7,
                            None,
                        )
                        .await;
                    Ok(serde_json::to_value(result)?)
                }
                .boxed()
            },
        )
        .required(&["element_description"]),
    );

    let verifier = deps.verifier.clone();
    registry.register(
        ActionSpec::new(
            "find_element",
            ActionCategory::Vision,
            "Locate a described UI element and report its coordinates",
            move |params| {
                let verifier = verifier.clone();
                async move {
                    let description = str_param(&params, "element_description")?;
                    let result = verifier
                        .verify(
                            &format!("locate: {description}"),
                            &format!("{description} with identifiable center coordinates"),
                            0.5,
                            None,
                        )
                        .await;
                    Ok(serde_json::to_value(result)?)
                }
                .boxed()
            },
        )
        .required(&["element_description"]),
    );

    let verifier = deps.verifier.clone();
    registry.register(
        ActionSpec::new(
            "verify_text",
            ActionCategory::Vision,
            "Verify that the given text is visible on screen",
            move |params| {
                let verifier = verifier.clone();
                async move {
                    let text = str_param(&params, "text")?;
                    let result = verifier
                        .verify(
                            "checking on-screen text",
                            &format!("the text \"{text}\" is visible"),
                            0.7,
                            None,
                        )
                        .await;
                    Ok(serde_json::to_value(result)?)
                }
                .boxed()
            },
        )
        .required(&["text"]),
    );
}

fn register_system_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let system = deps.system.clone();
    registry.register(ActionSpec::new(
        "lock_screen",
        ActionCategory::System,
        "Lock the screen",
        move |_params| {
            let system = system.clone();
            async move {
                system.lock_screen()?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));

    let system = deps.system.clone();
    registry.register(ActionSpec::new(
        "sleep_system",
        ActionCategory::System,
        "Put the system to sleep",
        move |_params| {
            let system = system.clone();
            async move {
                system.sleep_system()?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));

    let system = deps.system.clone();
    registry.register(ActionSpec::new(
        "shutdown_system",
        ActionCategory::System,
        "Shut the system down",
        move |_params| {
            let system = system.clone();
            async move {
                system.shutdown_system()?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));

    let system = deps.system.clone();
    registry.register(ActionSpec::new(
        "restart_system",
        ActionCategory::System,
        "Restart the system",
        move |_params| {
            let system = system.clone();
            async move {
                system.restart_system()?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));

    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "volume_up",
            ActionCategory::System,
            "Raise the system volume",
            move |params| {
                let system = system.clone();
                async move {
                    let amount = u64_param(&params, "amount")? as u32;
                    system.volume_up(amount)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .optional(&[("amount", json!(10))]),
    );

    let system = deps.system.clone();
    registry.register(
        ActionSpec::new(
            "volume_down",
            ActionCategory::System,
            "Lower the system volume",
            move |params| {
                let system = system.clone();
                async move {
                    let amount = u64_param(&params, "amount")? as u32;
                    system.volume_down(amount)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        )
        .optional(&[("amount", json!(10))]),
    );

    let system = deps.system.clone();
    registry.register(ActionSpec::new(
        "volume_mute",
        ActionCategory::System,
        "Mute or unmute the system volume",
        move |_params| {
            let system = system.clone();
            async move {
                system.volume_mute()?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));
}

fn register_edit_actions(registry: &mut ActionRegistry, deps: &Deps) {
    let shortcuts: &[(&str, &str, &[&str])] = &[
        ("select_all", "Select all content", &["ctrl", "a"]),
        ("undo", "Undo the last edit", &["ctrl", "z"]),
        ("redo", "Redo the last undone edit", &["ctrl", "y"]),
        ("find_replace", "Open find-and-replace", &["ctrl", "h"]),
    ];
    for (name, description, keys) in shortcuts {
        let keyboard = deps.keyboard.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        registry.register(ActionSpec::new(
            *name,
            ActionCategory::Edit,
            *description,
            move |_params| {
                let keyboard = keyboard.clone();
                let keys = keys.clone();
                async move {
                    keyboard.shortcut(&keys)?;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ));
    }

    let keyboard = deps.keyboard.clone();
    registry.register(ActionSpec::new(
        "delete_line",
        ActionCategory::Edit,
        "Delete the current line",
        move |_params| {
            let keyboard = keyboard.clone();
            async move {
                keyboard.press("home")?;
                keyboard.shortcut(&["shift".to_string(), "end".to_string()])?;
                keyboard.press("delete")?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));

    let keyboard = deps.keyboard.clone();
    registry.register(ActionSpec::new(
        "duplicate_line",
        ActionCategory::Edit,
        "Duplicate the current line below itself",
        move |_params| {
            let keyboard = keyboard.clone();
            async move {
                keyboard.press("home")?;
                keyboard.shortcut(&["shift".to_string(), "end".to_string()])?;
                keyboard.shortcut(&["ctrl".to_string(), "c".to_string()])?;
                keyboard.press("end")?;
                keyboard.press("enter")?;
                keyboard.shortcut(&["ctrl".to_string(), "v".to_string()])?;
                Ok(Value::Null)
            }
            .boxed()
        },
    ));
}

fn register_macro_action(registry: &mut ActionRegistry) {
    registry.register(
        ActionSpec::new(
            "macro",
            ActionCategory::Macro,
            "Execute a predefined macro (reusable action sequence)",
            move |_params| {
                async move {
                    Err(AutopilotErr::HandlerFailed {
                        kind: "invalid_dispatch".to_string(),
                        message: "macro actions are expanded by the executor, \
                                  not dispatched through the registry"
                            .to_string(),
                    })
                }
                .boxed()
            },
        )
        .required(&["name"])
        .optional(&[("vars", json!({}))])
        .examples(&[
            r#"{"action": "macro", "params": {"name": "search", "vars": {"query": "weather"}}}"#,
        ]),
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use crate::config::Config;
    use crate::mock::MockSurfaces;
    use crate::mock::MockVisionClient;

    use super::*;

    fn catalog() -> (MockSurfaces, ActionRegistry) {
        let surfaces = MockSurfaces::new();
        let config = Config::default();
        let verifier = Arc::new(VisualVerifier::new(
            surfaces.screen_capture(),
            MockVisionClient::new(),
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
        (surfaces, registry)
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn the_full_catalog_is_registered() {
        let (_surfaces, registry) = catalog();
        for name in [
            "press_key",
            "shortcut",
            "type",
            "type_with_delay",
            "hold_key",
            "release_key",
            "mouse_move",
            "mouse_click",
            "mouse_double_click",
            "mouse_right_click",
            "mouse_drag",
            "mouse_scroll",
            "mouse_position",
            "open_app",
            "close_app",
            "switch_window",
            "minimize_window",
            "maximize_window",
            "restore_window",
            "get_active_window",
            "open_url",
            "browser_back",
            "browser_forward",
            "browser_refresh",
            "browser_new_tab",
            "browser_close_tab",
            "browser_switch_tab",
            "browser_address_bar",
            "browser_bookmark",
            "browser_find",
            "copy",
            "paste",
            "cut",
            "get_clipboard",
            "set_clipboard",
            "paste_from_clipboard",
            "open_file",
            "save_file",
            "save_as",
            "open_file_dialog",
            "create_folder",
            "delete_file",
            "capture_screen",
            "capture_region",
            "capture_window",
            "save_screenshot",
            "delay",
            "wait_for_window",
            "wait_for_image",
            "wait_for_color",
            "verify_screen",
            "verify_element",
            "find_element",
            "verify_text",
            "lock_screen",
            "sleep_system",
            "shutdown_system",
            "restart_system",
            "volume_up",
            "volume_down",
            "volume_mute",
            "select_all",
            "undo",
            "redo",
            "find_replace",
            "delete_line",
            "duplicate_line",
            "macro",
        ] {
            assert!(registry.contains(name), "missing action {name}");
        }
    }

    #[tokio::test]
    async fn keyboard_actions_reach_the_capability_layer() {
        let (surfaces, registry) = catalog();
        registry
            .execute("press_key", params(json!({"key": "enter"})))
            .await
            .unwrap();
        registry
            .execute("type", params(json!({"text": "hello"})))
            .await
            .unwrap();
        registry
            .execute("shortcut", params(json!({"keys": ["ctrl", "l"]})))
            .await
            .unwrap();

        assert_eq!(
            surfaces.log(),
            vec!["press enter", "type hello @50ms", "shortcut ctrl+l"]
        );
    }

    #[tokio::test]
    async fn mouse_move_honors_the_motion_options() {
        let (surfaces, registry) = catalog();
        registry
            .execute(
                "mouse_move",
                params(json!({"x": 640, "y": 360, "smooth": false})),
            )
            .await
            .unwrap();
        assert_eq!(surfaces.log(), vec!["move 640,360"]);

        let position = registry
            .execute("mouse_position", Map::new())
            .await
            .unwrap();
        assert_eq!(position, json!({"x": 640, "y": 360}));
    }

    #[tokio::test]
    async fn clipboard_round_trip() {
        let (_surfaces, registry) = catalog();
        registry
            .execute("set_clipboard", params(json!({"text": "stash me"})))
            .await
            .unwrap();
        let read = registry.execute("get_clipboard", Map::new()).await.unwrap();
        assert_eq!(read, json!({"text": "stash me"}));
    }

    #[tokio::test]
    async fn browser_actions_are_shortcut_backed() {
        let (surfaces, registry) = catalog();
        registry
            .execute("browser_address_bar", Map::new())
            .await
            .unwrap();
        registry
            .execute(
                "browser_switch_tab",
                params(json!({"direction": "previous"})),
            )
            .await
            .unwrap();
        assert_eq!(
            surfaces.log(),
            vec!["shortcut ctrl+l", "shortcut ctrl+shift+tab"]
        );
    }

    #[tokio::test]
    async fn wait_for_window_finds_a_matching_title() {
        let (surfaces, registry) = catalog();
        surfaces.set_active_window("Mozilla Firefox");
        let result = registry
            .execute(
                "wait_for_window",
                params(json!({"title": "firefox", "timeout_ms": 500})),
            )
            .await
            .unwrap();
        assert_eq!(result["found"], json!(true));
    }

    #[tokio::test]
    async fn wait_for_window_times_out() {
        let (_surfaces, registry) = catalog();
        let err = registry
            .execute(
                "wait_for_window",
                params(json!({"title": "missing", "timeout_ms": 150})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "handler_failed");
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn verify_screen_returns_the_structured_verdict() {
        let (_surfaces, registry) = catalog();
        let result = registry
            .execute(
                "verify_screen",
                params(json!({"context": "find login", "expected": "login button"})),
            )
            .await
            .unwrap();
        assert_eq!(result["safe_to_proceed"], json!(true));
        assert_eq!(result["model_used"], json!("gemini-2.0-flash-exp"));
    }

    #[tokio::test]
    async fn macro_cannot_be_dispatched_directly() {
        let (_surfaces, registry) = catalog();
        let err = registry
            .execute("macro", params(json!({"name": "anything"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "handler_failed");
        assert!(err.to_string().contains("expanded by the executor"));
    }

    #[tokio::test]
    async fn delay_actually_waits() {
        let (_surfaces, registry) = catalog();
        let started = Instant::now();
        registry
            .execute("delay", params(json!({"ms": 120})))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(110));
    }
}
