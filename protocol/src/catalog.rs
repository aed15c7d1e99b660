//! Static catalog of action names and their parameter contracts.
//!
//! The actuator's registry is the authoritative runtime catalog; this table
//! is the planner-side mirror of it, so programs can be validated without a
//! live registry. The two are kept in sync by wiring
//! [`ActionContracts::from_entries`] with the registry's contracts where one
//! is available.

use std::collections::BTreeMap;

/// Required/optional parameter names for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamContract {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// name, required params, optional params.
type Row = (&'static str, &'static [&'static str], &'static [&'static str]);

const BUILTIN: &[Row] = &[
    // Keyboard
    ("press_key", &["key"], &[]),
    ("shortcut", &["keys"], &[]),
    ("type", &["text"], &["interval_ms"]),
    ("type_with_delay", &["text", "delay_ms"], &[]),
    ("hold_key", &["key"], &[]),
    ("release_key", &["key"], &[]),
    // Mouse
    ("mouse_move", &["x", "y"], &["smooth", "speed"]),
    ("mouse_click", &[], &["button", "clicks"]),
    ("mouse_double_click", &[], &["button"]),
    ("mouse_right_click", &[], &[]),
    ("mouse_drag", &["x", "y"], &["smooth"]),
    ("mouse_scroll", &["direction", "amount"], &[]),
    ("mouse_position", &[], &[]),
    // Window management
    ("open_app", &["app_name"], &[]),
    ("close_app", &["app_name"], &[]),
    ("switch_window", &[], &["direction"]),
    ("minimize_window", &[], &[]),
    ("maximize_window", &[], &[]),
    ("restore_window", &[], &[]),
    ("get_active_window", &[], &[]),
    // Browser
    ("open_url", &["url"], &[]),
    ("browser_back", &[], &[]),
    ("browser_forward", &[], &[]),
    ("browser_refresh", &[], &[]),
    ("browser_new_tab", &[], &[]),
    ("browser_close_tab", &[], &[]),
    ("browser_switch_tab", &[], &["direction"]),
    ("browser_address_bar", &[], &[]),
    ("browser_bookmark", &[], &[]),
    ("browser_find", &[], &[]),
    // Clipboard
    ("copy", &[], &[]),
    ("paste", &[], &[]),
    ("cut", &[], &[]),
    ("get_clipboard", &[], &[]),
    ("set_clipboard", &["text"], &[]),
    ("paste_from_clipboard", &["text"], &[]),
    // File system
    ("open_file", &["path"], &[]),
    ("save_file", &[], &[]),
    ("save_as", &[], &[]),
    ("open_file_dialog", &[], &[]),
    ("create_folder", &["path"], &[]),
    ("delete_file", &["path"], &[]),
    // Screen capture
    ("capture_screen", &[], &[]),
    ("capture_region", &["x", "y", "width", "height"], &[]),
    ("capture_window", &[], &[]),
    ("save_screenshot", &["path"], &[]),
    // Timing
    ("delay", &["ms"], &[]),
    ("wait_for_window", &["title"], &["timeout_ms"]),
    ("wait_for_image", &["image_path"], &["timeout_ms", "confidence"]),
    ("wait_for_color", &["x", "y", "color"], &["timeout_ms"]),
    // Visual verification
    (
        "verify_screen",
        &["context", "expected"],
        &["confidence_threshold"],
    ),
    ("verify_element", &["element_description"], &[]),
    ("find_element", &["element_description"], &[]),
    ("verify_text", &["text"], &[]),
    // System
    ("lock_screen", &[], &[]),
    ("sleep_system", &[], &[]),
    ("shutdown_system", &[], &[]),
    ("restart_system", &[], &[]),
    ("volume_up", &[], &["amount"]),
    ("volume_down", &[], &["amount"]),
    ("volume_mute", &[], &[]),
    // Text editing
    ("select_all", &[], &[]),
    ("undo", &[], &[]),
    ("redo", &[], &[]),
    ("find_replace", &[], &[]),
    ("delete_line", &[], &[]),
    ("duplicate_line", &[], &[]),
    // Macro expansion
    ("macro", &["name"], &["vars"]),
];

/// Lookup table from action name to its parameter contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionContracts {
    entries: BTreeMap<String, ParamContract>,
}

impl ActionContracts {
    /// The built-in catalog mirroring the actuator's default registry.
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN.iter().map(|(name, required, optional)| {
            (
                name.to_string(),
                ParamContract {
                    required: required.iter().map(|s| s.to_string()).collect(),
                    optional: optional.iter().map(|s| s.to_string()).collect(),
                },
            )
        }))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, ParamContract)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ParamContract> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builtin_catalog_covers_every_family() {
        let contracts = ActionContracts::builtin();
        for name in [
            "press_key",
            "mouse_move",
            "open_app",
            "open_url",
            "copy",
            "open_file",
            "capture_screen",
            "delay",
            "verify_screen",
            "lock_screen",
            "select_all",
            "macro",
        ] {
            assert!(contracts.contains(name), "missing {name}");
        }
        assert!(!contracts.contains("no_such_action"));
    }

    #[test]
    fn contracts_expose_required_and_optional() {
        let contracts = ActionContracts::builtin();
        let spec = contracts.get("type").unwrap();
        assert_eq!(spec.required, vec!["text"]);
        assert_eq!(spec.optional, vec!["interval_ms"]);
    }
}
