//! Scriptable in-memory capability implementations.
//!
//! These surfaces simulate the behavior of the real OS drivers without
//! synthesizing input or touching the screen: every call is appended to a
//! shared execution log, the pointer position and clipboard are plain
//! state, and individual operations can be armed to fail on demand. Dry
//! runs and the test suites run entirely against these.

// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use autopilot_protocol::protocol::Point;
use autopilot_protocol::protocol::ScreenSize;

use crate::capability::CapturedImage;
use crate::capability::Clipboard;
use crate::capability::Keyboard;
use crate::capability::MouseButton;
use crate::capability::Pointer;
use crate::capability::PointerOptions;
use crate::capability::ScreenCapture;
use crate::capability::ScrollDirection;
use crate::capability::System;
use crate::error::Result;

/// Placeholder JPEG payload returned by the mock screen.
const FAKE_JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0xff, 0xd9];

#[derive(Debug)]
struct MockState {
    log: Mutex<Vec<String>>,
    pointer: Mutex<Point>,
    clipboard: Mutex<String>,
    screen: ScreenSize,
    active_window: Mutex<String>,
    located_image: Mutex<Option<Point>>,
    pixel_color: Mutex<String>,
    /// Operation name -> failure message. While armed, every call to that
    /// operation fails with an OS-style error.
    failures: Mutex<HashMap<String, String>>,
}

impl MockState {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn check(&self, op: &str) -> Result<()> {
        if let Some(message) = self.failures.lock().unwrap().get(op) {
            return Err(io::Error::other(message.clone()).into());
        }
        Ok(())
    }
}

/// Factory bundling one shared mock state behind every capability trait.
#[derive(Clone)]
pub struct MockSurfaces {
    state: Arc<MockState>,
}

impl Default for MockSurfaces {
    fn default() -> Self {
        Self::with_screen_size(1920, 1080)
    }
}

impl MockSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screen_size(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(MockState {
                log: Mutex::new(Vec::new()),
                pointer: Mutex::new(Point { x: 0, y: 0 }),
                clipboard: Mutex::new(String::new()),
                screen: ScreenSize { width, height },
                active_window: Mutex::new(String::new()),
                located_image: Mutex::new(None),
                pixel_color: Mutex::new("#000000".to_string()),
                failures: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn keyboard(&self) -> Arc<dyn Keyboard> {
        Arc::new(MockKeyboard(self.state.clone()))
    }

    pub fn pointer(&self) -> Arc<dyn Pointer> {
        Arc::new(MockPointer(self.state.clone()))
    }

    pub fn screen_capture(&self) -> Arc<dyn ScreenCapture> {
        Arc::new(MockScreen(self.state.clone()))
    }

    pub fn clipboard(&self) -> Arc<dyn Clipboard> {
        Arc::new(MockClipboard(self.state.clone()))
    }

    pub fn system(&self) -> Arc<dyn System> {
        Arc::new(MockSystem(self.state.clone()))
    }

    /// Everything the surfaces were asked to do, in call order.
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.state.log.lock().unwrap().clear();
    }

    /// Arms `op` (e.g. `"type_text"`, `"capture_full"`) to fail with an
    /// OS-style error carrying `message` until cleared.
    pub fn fail_on(&self, op: &str, message: &str) {
        self.state
            .failures
            .lock()
            .unwrap()
            .insert(op.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, op: &str) {
        self.state.failures.lock().unwrap().remove(op);
    }

    /// Simulates the user grabbing the mouse.
    pub fn set_pointer_position(&self, x: i32, y: i32) {
        *self.state.pointer.lock().unwrap() = Point { x, y };
    }

    pub fn set_active_window(&self, title: &str) {
        *self.state.active_window.lock().unwrap() = title.to_string();
    }

    pub fn clipboard_text(&self) -> String {
        self.state.clipboard.lock().unwrap().clone()
    }

    pub fn set_located_image(&self, point: Option<Point>) {
        *self.state.located_image.lock().unwrap() = point;
    }

    pub fn set_pixel_color(&self, color: &str) {
        *self.state.pixel_color.lock().unwrap() = color.to_string();
    }
}

struct MockKeyboard(Arc<MockState>);

impl Keyboard for MockKeyboard {
    fn press(&self, key: &str) -> Result<()> {
        self.0.check("press")?;
        self.0.record(format!("press {key}"));
        Ok(())
    }

    fn hold(&self, key: &str) -> Result<()> {
        self.0.check("hold")?;
        self.0.record(format!("hold {key}"));
        Ok(())
    }

    fn release(&self, key: &str) -> Result<()> {
        self.0.check("release")?;
        self.0.record(format!("release {key}"));
        Ok(())
    }

    fn type_text(&self, text: &str, inter_key_delay_ms: u64) -> Result<()> {
        self.0.check("type_text")?;
        self.0
            .record(format!("type {text} @{inter_key_delay_ms}ms"));
        Ok(())
    }

    fn shortcut(&self, keys: &[String]) -> Result<()> {
        self.0.check("shortcut")?;
        self.0.record(format!("shortcut {}", keys.join("+")));
        Ok(())
    }
}

struct MockPointer(Arc<MockState>);

impl Pointer for MockPointer {
    fn move_to(&self, x: i32, y: i32, _options: PointerOptions) -> Result<()> {
        self.0.check("move_to")?;
        self.0.record(format!("move {x},{y}"));
        *self.0.pointer.lock().unwrap() = Point { x, y };
        Ok(())
    }

    fn click(&self, button: MouseButton, clicks: u32) -> Result<()> {
        self.0.check("click")?;
        self.0.record(format!("click {button:?} x{clicks}").to_lowercase());
        Ok(())
    }

    fn drag(&self, x: i32, y: i32, _options: PointerOptions) -> Result<()> {
        self.0.check("drag")?;
        self.0.record(format!("drag {x},{y}"));
        *self.0.pointer.lock().unwrap() = Point { x, y };
        Ok(())
    }

    fn scroll(&self, direction: ScrollDirection, amount: i32) -> Result<()> {
        self.0.check("scroll")?;
        self.0
            .record(format!("scroll {direction:?} {amount}").to_lowercase());
        Ok(())
    }

    fn position(&self) -> Result<Point> {
        Ok(*self.0.pointer.lock().unwrap())
    }
}

struct MockScreen(Arc<MockState>);

impl ScreenCapture for MockScreen {
    fn capture_full(&self) -> Result<CapturedImage> {
        self.0.check("capture_full")?;
        self.0.record("capture_full".to_string());
        Ok(CapturedImage {
            width: self.0.screen.width,
            height: self.0.screen.height,
            data: FAKE_JPEG.to_vec(),
        })
    }

    fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<CapturedImage> {
        self.0.check("capture_region")?;
        self.0
            .record(format!("capture_region {x},{y} {width}x{height}"));
        Ok(CapturedImage {
            width,
            height,
            data: FAKE_JPEG.to_vec(),
        })
    }

    fn size(&self) -> Result<ScreenSize> {
        Ok(self.0.screen)
    }

    fn locate_image(&self, image_path: &str, _confidence: f64) -> Result<Option<Point>> {
        self.0.check("locate_image")?;
        self.0.record(format!("locate_image {image_path}"));
        Ok(*self.0.located_image.lock().unwrap())
    }

    fn pixel_color(&self, x: i32, y: i32) -> Result<String> {
        self.0.check("pixel_color")?;
        self.0.record(format!("pixel_color {x},{y}"));
        Ok(self.0.pixel_color.lock().unwrap().clone())
    }
}

struct MockClipboard(Arc<MockState>);

impl Clipboard for MockClipboard {
    fn read(&self) -> Result<String> {
        self.0.check("clipboard_read")?;
        self.0.record("clipboard_read".to_string());
        Ok(self.0.clipboard.lock().unwrap().clone())
    }

    fn write(&self, text: &str) -> Result<()> {
        self.0.check("clipboard_write")?;
        self.0.record(format!("clipboard_write {text}"));
        *self.0.clipboard.lock().unwrap() = text.to_string();
        Ok(())
    }
}

struct MockSystem(Arc<MockState>);

impl System for MockSystem {
    fn open_application(&self, name: &str) -> Result<()> {
        self.0.check("open_application")?;
        self.0.record(format!("open_app {name}"));
        *self.0.active_window.lock().unwrap() = name.to_string();
        Ok(())
    }

    fn close_application(&self, name: &str) -> Result<()> {
        self.0.check("close_application")?;
        self.0.record(format!("close_app {name}"));
        Ok(())
    }

    fn open_path(&self, path: &str) -> Result<()> {
        self.0.check("open_path")?;
        self.0.record(format!("open_path {path}"));
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<()> {
        self.0.check("open_url")?;
        self.0.record(format!("open_url {url}"));
        Ok(())
    }

    fn active_window_title(&self) -> Result<String> {
        Ok(self.0.active_window.lock().unwrap().clone())
    }

    fn lock_screen(&self) -> Result<()> {
        self.0.check("lock_screen")?;
        self.0.record("lock_screen".to_string());
        Ok(())
    }

    fn sleep_system(&self) -> Result<()> {
        self.0.check("sleep_system")?;
        self.0.record("sleep_system".to_string());
        Ok(())
    }

    fn shutdown_system(&self) -> Result<()> {
        self.0.check("shutdown_system")?;
        self.0.record("shutdown_system".to_string());
        Ok(())
    }

    fn restart_system(&self) -> Result<()> {
        self.0.check("restart_system")?;
        self.0.record("restart_system".to_string());
        Ok(())
    }

    fn volume_up(&self, amount: u32) -> Result<()> {
        self.0.check("volume_up")?;
        self.0.record(format!("volume_up {amount}"));
        Ok(())
    }

    fn volume_down(&self, amount: u32) -> Result<()> {
        self.0.check("volume_down")?;
        self.0.record(format!("volume_down {amount}"));
        Ok(())
    }

    fn volume_mute(&self) -> Result<()> {
        self.0.check("volume_mute")?;
        self.0.record("volume_mute".to_string());
        Ok(())
    }
}

/// Vision model stub returning one configurable reply for every call.
pub struct MockVisionClient {
    reply: Mutex<String>,
}

impl Default for MockVisionClient {
    fn default() -> Self {
        Self {
            reply: Mutex::new(
                r#"{"safe_to_proceed": true, "confidence": 0.95, "analysis": "mock verification"}"#
                    .to_string(),
            ),
        }
    }
}

impl MockVisionClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_reply(reply: &str) -> Arc<Self> {
        let client = Self::default();
        *client.reply.lock().unwrap() = reply.to_string();
        Arc::new(client)
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }
}

impl crate::vision_client::VisionModelClient for MockVisionClient {
    fn analyze(
        &self,
        _model: &str,
        _prompt: &str,
        _image: &CapturedImage,
    ) -> futures::future::BoxFuture<'static, Result<String>> {
        use futures::FutureExt;
        let reply = self.reply.lock().unwrap().clone();
        async move { Ok(reply) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn calls_are_logged_in_order() {
        let surfaces = MockSurfaces::new();
        let keyboard = surfaces.keyboard();
        let pointer = surfaces.pointer();

        keyboard.press("enter").unwrap();
        pointer.move_to(10, 20, PointerOptions::default()).unwrap();
        keyboard
            .shortcut(&["ctrl".to_string(), "t".to_string()])
            .unwrap();

        assert_eq!(
            surfaces.log(),
            vec!["press enter", "move 10,20", "shortcut ctrl+t"]
        );
        assert_eq!(pointer.position().unwrap(), Point { x: 10, y: 20 });
    }

    #[test]
    fn armed_failures_surface_as_os_errors() {
        let surfaces = MockSurfaces::new();
        surfaces.fail_on("type_text", "boom");
        let keyboard = surfaces.keyboard();

        let err = keyboard.type_text("hello", 50).unwrap_err();
        assert!(err.to_string().contains("boom"));

        surfaces.clear_failure("type_text");
        assert!(keyboard.type_text("hello", 50).is_ok());
    }

    #[test]
    fn screen_reports_configured_size() {
        let surfaces = MockSurfaces::with_screen_size(800, 600);
        let screen = surfaces.screen_capture();
        assert_eq!(screen.size().unwrap(), ScreenSize { width: 800, height: 600 });
        let image = screen.capture_full().unwrap();
        assert_eq!((image.width, image.height), (800, 600));
    }
}
