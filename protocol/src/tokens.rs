//! Scanner for `{{identifier}}` substitution tokens inside leaf strings.

use std::sync::LazyLock;

use regex_lite::Regex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    let re = Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").expect("token regex is valid");
    re
});

/// Returns the identifiers of every `{{identifier}}` token in `text`, in
/// order of appearance. Duplicates are preserved.
pub fn scan(text: &str) -> Vec<String> {
    TOKEN_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// True when `text` consists of exactly one token and nothing else. Such
/// values substitute the raw variable, preserving its type.
pub fn is_single_token(text: &str) -> bool {
    TOKEN_RE
        .find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

/// Replaces every token in `text` with `replace(identifier)`. The caller is
/// responsible for having checked that every identifier resolves.
pub fn expand(text: &str, mut replace: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in TOKEN_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(name) = caps.get(1) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replace(name.as_str()));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// True when any value in `params` (recursively) contains a token. The
/// validator treats such parameter sets as satisfying required-presence;
/// the real check happens at substitution time.
pub fn value_contains_token(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => !scan(s).is_empty(),
        serde_json::Value::Array(items) => items.iter().any(value_contains_token),
        serde_json::Value::Object(map) => map.values().any(value_contains_token),
        _ => false,
    }
}
