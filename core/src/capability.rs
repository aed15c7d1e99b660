//! Capability interfaces: the narrowest OS-facing surfaces the core depends
//! on.
//!
//! Everything behind these traits is implementation-swappable. The real
//! drivers (OS input synthesis, compositor capture) live outside this
//! repository; [`crate::mock`] provides scriptable in-memory implementations
//! used by dry runs and tests. All capabilities raise on OS error; the
//! executor captures that into its structured error record.

use std::str::FromStr;

use autopilot_protocol::protocol::Point;
use autopilot_protocol::protocol::ScreenSize;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl FromStr for MouseButton {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(format!("invalid mouse button `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(format!("invalid scroll direction `{other}`")),
        }
    }
}

/// Shape of the path the pointer takes to its target. The curve math itself
/// is a driver concern; the core only selects a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionProfile {
    Straight,
    #[default]
    Bezier,
    Arc,
    Wave,
}

/// Options carried by pointer movement operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerOptions {
    pub profile: MotionProfile,
    /// Movement speed multiplier; 1.0 is the driver's natural pace.
    pub speed: f64,
}

impl Default for PointerOptions {
    fn default() -> Self {
        Self {
            profile: MotionProfile::default(),
            speed: 1.0,
        }
    }
}

/// An encoded screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    /// JPEG-encoded bytes.
    pub data: Vec<u8>,
}

pub trait Keyboard: Send + Sync {
    /// Press and release a single key.
    fn press(&self, key: &str) -> Result<()>;
    fn hold(&self, key: &str) -> Result<()>;
    fn release(&self, key: &str) -> Result<()>;
    /// Type `text` with `inter_key_delay_ms` between keystrokes.
    fn type_text(&self, text: &str, inter_key_delay_ms: u64) -> Result<()>;
    /// Press several keys simultaneously, e.g. `["ctrl", "t"]`.
    fn shortcut(&self, keys: &[String]) -> Result<()>;
}

/// Pointer surface. Implementations must expose a fail-safe: moving the
/// pointer into a screen corner aborts the in-flight operation.
pub trait Pointer: Send + Sync {
    fn move_to(&self, x: i32, y: i32, options: PointerOptions) -> Result<()>;
    /// Click at the current position.
    fn click(&self, button: MouseButton, clicks: u32) -> Result<()>;
    /// Press at the current position, move to `(x, y)`, release.
    fn drag(&self, x: i32, y: i32, options: PointerOptions) -> Result<()>;
    fn scroll(&self, direction: ScrollDirection, amount: i32) -> Result<()>;
    fn position(&self) -> Result<Point>;
}

pub trait ScreenCapture: Send + Sync {
    fn capture_full(&self) -> Result<CapturedImage>;
    fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<CapturedImage>;
    fn size(&self) -> Result<ScreenSize>;
    /// Locate a template image on screen, returning its center when found
    /// with at least `confidence` similarity.
    fn locate_image(&self, image_path: &str, confidence: f64) -> Result<Option<Point>>;
    /// Color of the pixel at `(x, y)` as a `#rrggbb` hex string.
    fn pixel_color(&self, x: i32, y: i32) -> Result<String>;
}

pub trait Clipboard: Send + Sync {
    fn read(&self) -> Result<String>;
    fn write(&self, text: &str) -> Result<()>;
}

/// OS-specific operations exposed behind one uniformly callable surface.
pub trait System: Send + Sync {
    fn open_application(&self, name: &str) -> Result<()>;
    fn close_application(&self, name: &str) -> Result<()>;
    /// Open a file or directory with its default application.
    fn open_path(&self, path: &str) -> Result<()>;
    /// Open a URL in the default browser.
    fn open_url(&self, url: &str) -> Result<()>;
    fn active_window_title(&self) -> Result<String>;
    fn lock_screen(&self) -> Result<()>;
    fn sleep_system(&self) -> Result<()>;
    fn shutdown_system(&self) -> Result<()>;
    fn restart_system(&self) -> Result<()>;
    fn volume_up(&self, amount: u32) -> Result<()>;
    fn volume_down(&self, amount: u32) -> Result<()>;
    fn volume_mute(&self) -> Result<()>;
}
