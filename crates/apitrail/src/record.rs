//! Audit record types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP method of a captured request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// Anything else, preserved verbatim.
    Other(String),
}

impl HttpMethod {
    /// Canonical uppercase name.
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other(name) => name.as_str(),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for HttpMethod {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            other => HttpMethod::Other(other.to_string()),
        }
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl From<&http::Method> for HttpMethod {
    fn from(method: &http::Method) -> Self {
        HttpMethod::from(method.as_str().to_string())
    }
}

/// Sanitized request snapshot stored as the record's `request_payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// Sanitized query parameters.
    pub params: serde_json::Value,
    /// Sanitized request body, when it parsed as JSON.
    pub body: serde_json::Value,
    /// Captured headers, sensitive values redacted.
    pub headers: BTreeMap<String, Vec<String>>,
    /// Raw request body, possibly shortened.
    pub raw_body: String,
    /// Whether the raw body hit its fixed ceiling.
    pub raw_body_truncated: bool,
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            params: serde_json::Value::Object(serde_json::Map::new()),
            body: serde_json::Value::Object(serde_json::Map::new()),
            headers: BTreeMap::new(),
            raw_body: String::new(),
            raw_body_truncated: false,
        }
    }
}

/// A stored audit record. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Store-assigned monotonic identifier.
    pub id: u64,
    /// Capture time, unix seconds.
    pub timestamp: i64,
    /// HTTP method.
    pub method: HttpMethod,
    /// Normalized path plus raw query string.
    pub endpoint: String,
    /// Client address as observed at capture time.
    pub client_ip: String,
    /// Geolocation country, best effort.
    pub ip_country: String,
    /// Geolocation city, best effort.
    pub ip_city: String,
    /// Geolocation organization, best effort.
    pub ip_organization: String,
    /// Diagnostic message when the lookup degraded.
    pub ip_lookup_message: String,
    /// Request user agent.
    pub user_agent: String,
    /// Resolved key identity, when the key store knew the key.
    pub api_key_id: Option<i64>,
    /// Masked key for display. The raw key is never stored.
    pub api_key_display: Option<String>,
    /// Serialized [`RequestSnapshot`], bounded by the storage limit.
    pub request_payload: String,
    /// Raw request body, bounded by its fixed ceiling.
    pub raw_body: String,
    /// Response status code.
    pub response_code: u16,
    /// Serialized response body, bounded by the storage limit.
    pub response_body: String,
}

/// An audit record before the store assigns its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditRecord {
    /// Capture time, unix seconds.
    pub timestamp: i64,
    /// HTTP method.
    pub method: HttpMethod,
    /// Normalized path plus raw query string.
    pub endpoint: String,
    /// Client address as observed at capture time.
    pub client_ip: String,
    /// Geolocation country, best effort.
    pub ip_country: String,
    /// Geolocation city, best effort.
    pub ip_city: String,
    /// Geolocation organization, best effort.
    pub ip_organization: String,
    /// Diagnostic message when the lookup degraded.
    pub ip_lookup_message: String,
    /// Request user agent.
    pub user_agent: String,
    /// Resolved key identity.
    pub api_key_id: Option<i64>,
    /// Masked key for display.
    pub api_key_display: Option<String>,
    /// Serialized request snapshot.
    pub request_payload: String,
    /// Raw request body.
    pub raw_body: String,
    /// Response status code.
    pub response_code: u16,
    /// Serialized response body.
    pub response_body: String,
}

impl NewAuditRecord {
    /// Attach a store-assigned id.
    pub fn into_record(self, id: u64) -> AuditRecord {
        AuditRecord {
            id,
            timestamp: self.timestamp,
            method: self.method,
            endpoint: self.endpoint,
            client_ip: self.client_ip,
            ip_country: self.ip_country,
            ip_city: self.ip_city,
            ip_organization: self.ip_organization,
            ip_lookup_message: self.ip_lookup_message,
            user_agent: self.user_agent,
            api_key_id: self.api_key_id,
            api_key_display: self.api_key_display,
            request_payload: self.request_payload,
            raw_body: self.raw_body,
            response_code: self.response_code,
            response_body: self.response_body,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_new_record(timestamp: i64) -> NewAuditRecord {
    NewAuditRecord {
        timestamp,
        method: HttpMethod::Get,
        endpoint: "/wc/v3/orders/".to_string(),
        client_ip: "203.0.113.9".to_string(),
        ip_country: String::new(),
        ip_city: String::new(),
        ip_organization: String::new(),
        ip_lookup_message: String::new(),
        user_agent: "test-agent".to_string(),
        api_key_id: None,
        api_key_display: None,
        request_payload: "{}".to_string(),
        raw_body: String::new(),
        response_code: 200,
        response_body: "{}".to_string(),
    }
}
