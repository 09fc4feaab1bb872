//! API key identity extraction and masking.
//!
//! The consumer key travels either as a query parameter or inside a Basic
//! Authorization header (username portion). The raw key is never persisted:
//! records carry only a masked display string and an opaque identity resolved
//! through [`ApiKeyResolver`].

use crate::redact::sanitize_text;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::HeaderMap;
use std::collections::HashMap;

/// Resolves a consumer key to an opaque key identity.
///
/// Implementations are expected to look the key up in a hashed key store on
/// the host side; the key itself must not be retained.
pub trait ApiKeyResolver: Send + Sync {
    /// Return the stored identity for `consumer_key`, if any.
    fn resolve(&self, consumer_key: &str) -> Option<i64>;
}

/// Resolver that never matches. Used when no key store is wired in.
pub struct NoKeyResolver;

impl ApiKeyResolver for NoKeyResolver {
    fn resolve(&self, _consumer_key: &str) -> Option<i64> {
        None
    }
}

/// Extract the consumer key from the `consumer_key` query parameter or, as a
/// fallback, from a Basic Authorization header.
pub fn extract_consumer_key(
    query_params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Option<String> {
    if let Some(key) = query_params.get("consumer_key") {
        let key = sanitize_text(key);
        if !key.is_empty() {
            return Some(key);
        }
    }

    let auth = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    basic_auth_username(auth)
}

/// Username portion of a `Basic` Authorization header value.
fn basic_auth_username(header_value: &str) -> Option<String> {
    let value = header_value.trim();
    value
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("basic"))?;

    let rest = &value[5..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let encoded = rest.trim_start();

    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, _) = decoded.split_once(':')?;

    let username = sanitize_text(username);
    if username.is_empty() {
        None
    } else {
        Some(username)
    }
}

/// Mask a consumer key for display.
///
/// Keys of 8 characters or fewer become all stars; longer keys keep the first
/// six and last two characters.
pub fn mask_key(key: &str) -> String {
    let length = key.chars().count();

    if length <= 8 {
        return "*".repeat(length);
    }

    let head: String = key.chars().take(6).collect();
    let tail: String = key.chars().skip(length - 2).collect();
    format!("{}{}{}", head, "*".repeat(length - 8), tail)
}
