//! Sensitive-data redaction for captured requests.
//!
//! Header values on the denylist are never logged; everything else passes
//! through text sanitization so a stored record can be rendered later without
//! carrying executable markup or control characters.

use http::HeaderMap;
use std::collections::BTreeMap;

/// Headers whose values are replaced with [`REDACTED_PLACEHOLDER`].
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-woocommerce-signature",
    "x-wc-webhook-signature",
    "php-auth-pw",
];

/// Replacement value stored for sensitive headers.
pub const REDACTED_PLACEHOLDER: &str = "[redacted]";

/// Strip markup, drop control characters, and collapse whitespace runs.
pub fn sanitize_text(input: &str) -> String {
    let stripped = strip_tags(input);
    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;

    for c in stripped.chars() {
        if c.is_control() || c.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }

    out
}

/// Remove `<...>` tag spans from a string.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut inside_tag = false;

    for c in input.chars() {
        if c == '<' {
            inside_tag = true;
        } else if c == '>' {
            inside_tag = false;
        } else if !inside_tag {
            out.push(c);
        }
    }

    out
}

/// Recursively sanitize every scalar in a JSON value.
///
/// Strings are passed through [`sanitize_text`]; maps and sequences are
/// walked; numbers, booleans and nulls are returned as-is.
pub fn sanitize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(sanitize_text(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Capture request headers with denylisted values redacted.
///
/// Keys are lowercased; a denylisted header always maps to a single
/// `"[redacted]"` element regardless of how many values it carried.
pub fn sanitize_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut captured: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (name, value) in headers.iter() {
        let key = name.as_str().to_ascii_lowercase();

        if SENSITIVE_HEADERS.contains(&key.as_str()) {
            captured.insert(key, vec![REDACTED_PLACEHOLDER.to_string()]);
            continue;
        }

        if let Ok(text) = value.to_str() {
            captured.entry(key).or_default().push(sanitize_text(text));
        }
    }

    captured
}
