//! Deny-list policy for keyboard text the executor refuses to type.

/// Substrings that mark a text payload as destructive. Matching is
/// case-insensitive; any occurrence anywhere in the text counts.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "delete", "remove", "format", "shutdown", "restart", "kill", "terminate", "rm ", "del ",
    "rmdir",
];

#[derive(Debug, Clone)]
pub struct DangerousTextPolicy {
    patterns: Vec<String>,
}

impl Default for DangerousTextPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DENY_PATTERNS.iter().map(|p| p.to_string()))
    }
}

impl DangerousTextPolicy {
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// First deny pattern that occurs in `text`, if any.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| lowered.contains(pattern.as_str()))
            .map(String::as_str)
    }

    pub fn is_dangerous(&self, text: &str) -> bool {
        self.first_match(text).is_some()
    }
}
