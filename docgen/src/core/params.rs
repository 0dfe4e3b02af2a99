//! Naming and value conventions for parameters passed to agent processes.
//!
//! Every parameter reaches an agent as an environment variable named
//! `PARAM_<UPPER_SNAKE_NAME>`, so agents written in any language read the
//! same contract instead of positional flags.

use serde_json::Value;

pub const PARAM_PREFIX: &str = "PARAM_";

/// Parameter carrying the name of the tool being invoked.
pub const TOOL_PARAM: &str = "tool";

/// Convert `maxDepth`, `max-depth` or `max depth` into `MAX_DEPTH`.
pub fn to_upper_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (idx, &ch) in chars.iter().enumerate() {
        if !ch.is_ascii_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if ch.is_ascii_uppercase() && idx > 0 && !out.ends_with('_') {
            let prev = chars[idx - 1];
            let next_is_lower = chars.get(idx + 1).is_some_and(char::is_ascii_lowercase);
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower);
            if boundary {
                out.push('_');
            }
        }
        out.push(ch.to_ascii_uppercase());
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Environment variable name for a parameter.
pub fn param_env_name(name: &str) -> String {
    format!("{PARAM_PREFIX}{}", to_upper_snake(name))
}

/// String form of a parameter value: strings verbatim, everything else as JSON.
pub fn param_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Case-insensitive `true`/`false`; anything else is `None`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse an integer, falling back to `default` when missing or malformed.
pub fn parse_int_or(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a `key=value` override as given on the command line.
pub fn parse_override(raw: &str) -> Option<(String, String)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
