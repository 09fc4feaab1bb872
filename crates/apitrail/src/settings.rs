//! Capture settings and the cache-aside service that owns them.
//!
//! Settings live in a host-provided key-value backend and are cached in
//! memory; a save writes through and invalidates, so readers see at most one
//! in-flight request of staleness.

use crate::limit::{DEFAULT_STORAGE_LIMIT, MIN_STORAGE_LIMIT};
use crate::redact::sanitize_text;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Backend key under which the settings document is stored.
pub const SETTINGS_KEY: &str = "apitrail_settings";

/// Process-wide capture configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Capture every non-blocked route instead of only the configured
    /// namespaces.
    pub capture_all: bool,
    /// Enable extended capture: extra namespaces and the fallback
    /// interception point.
    pub capture_extended: bool,
    /// Additional captured path prefixes (normalized, deduplicated).
    pub extra_namespaces: Vec<String>,
    /// Storage ceiling for stored payloads and response bodies, in code
    /// points.
    pub payload_max_length: usize,
    /// Operator-managed block patterns.
    pub blocked_endpoints: Vec<String>,
    /// Suggested block patterns, merged with the operator list.
    pub blocked_endpoints_suggested: Vec<String>,
    /// Age-based retention in days; 0 disables the rule.
    pub retention_days: u32,
    /// Count-based retention cap; 0 disables the rule.
    pub retention_max_records: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            capture_all: false,
            capture_extended: false,
            extra_namespaces: Vec::new(),
            payload_max_length: DEFAULT_STORAGE_LIMIT,
            blocked_endpoints: Vec::new(),
            blocked_endpoints_suggested: Vec::new(),
            retention_days: 0,
            retention_max_records: 0,
        }
    }
}

impl AuditSettings {
    /// Return a copy with every list sanitized and the storage limit clamped.
    pub fn normalized(mut self) -> Self {
        self.extra_namespaces = normalize_namespaces(&self.extra_namespaces);
        self.blocked_endpoints = normalize_patterns(&self.blocked_endpoints);
        self.blocked_endpoints_suggested = normalize_patterns(&self.blocked_endpoints_suggested);

        self.payload_max_length = if self.payload_max_length == 0 {
            DEFAULT_STORAGE_LIMIT
        } else {
            self.payload_max_length.max(MIN_STORAGE_LIMIT)
        };

        self
    }

    /// Operator and suggested block patterns merged into one deduplicated
    /// list.
    pub fn blocked_patterns(&self) -> Vec<String> {
        let mut merged = Vec::new();

        for pattern in self
            .blocked_endpoints
            .iter()
            .chain(self.blocked_endpoints_suggested.iter())
        {
            let pattern = sanitize_text(pattern);
            if !pattern.is_empty() && !merged.contains(&pattern) {
                merged.push(pattern);
            }
        }

        merged
    }
}

/// Split a free-form pattern list on newlines and commas, then normalize it.
pub fn parse_pattern_list(input: &str) -> Vec<String> {
    let items: Vec<String> = input
        .split(['\r', '\n', ','])
        .map(|s| s.to_string())
        .collect();
    normalize_patterns(&items)
}

fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    let mut clean = Vec::new();

    for pattern in patterns {
        let pattern = sanitize_text(pattern);
        if !pattern.is_empty() && !clean.contains(&pattern) {
            clean.push(pattern);
        }
    }

    clean
}

fn normalize_namespaces(namespaces: &[String]) -> Vec<String> {
    let mut clean = Vec::new();

    for namespace in namespaces {
        let namespace = sanitize_text(namespace);
        if namespace.is_empty() {
            continue;
        }

        let normalized = format!("/{}", namespace.trim_start_matches('/'));
        let normalized = normalized.trim_end_matches('/').to_string();

        if !normalized.is_empty() && !clean.contains(&normalized) {
            clean.push(normalized);
        }
    }

    clean
}

/// Error surfaced by settings persistence.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The backend rejected the write.
    #[error("failed to persist settings: {0}")]
    Backend(String),
}

/// Key-value storage for named JSON documents.
pub trait SettingsBackend: Send + Sync {
    /// Read a stored document by name.
    fn read(&self, name: &str) -> Option<serde_json::Value>;

    /// Write a document under a name.
    fn write(&self, name: &str, value: serde_json::Value) -> Result<(), SettingsError>;
}

/// In-memory settings backend.
#[derive(Default)]
pub struct MemorySettingsBackend {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySettingsBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsBackend for MemorySettingsBackend {
    fn read(&self, name: &str) -> Option<serde_json::Value> {
        self.entries.read().ok()?.get(name).cloned()
    }

    fn write(&self, name: &str, value: serde_json::Value) -> Result<(), SettingsError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| SettingsError::Backend(format!("lock poisoned: {}", e)))?;
        entries.insert(name.to_string(), value);
        Ok(())
    }
}

/// Cache-aside settings service.
///
/// Reads return a shared snapshot; the cache is filled lazily from the
/// backend and dropped explicitly on save. Callers hold one snapshot for the
/// duration of a request so every decision in that request sees consistent
/// values.
pub struct SettingsService {
    backend: Arc<dyn SettingsBackend>,
    cached: RwLock<Option<Arc<AuditSettings>>>,
}

impl SettingsService {
    /// Create a service over the given backend.
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        Self {
            backend,
            cached: RwLock::new(None),
        }
    }

    /// Current settings snapshot, loading from the backend on a cache miss.
    ///
    /// A missing or unreadable document falls back to defaults.
    pub fn get(&self) -> Arc<AuditSettings> {
        if let Ok(cached) = self.cached.read() {
            if let Some(settings) = cached.as_ref() {
                return Arc::clone(settings);
            }
        }

        let loaded = self
            .backend
            .read(SETTINGS_KEY)
            .and_then(|value| match serde_json::from_value::<AuditSettings>(value) {
                Ok(settings) => Some(settings),
                Err(err) => {
                    tracing::warn!(error = %err, "stored settings unreadable, using defaults");
                    None
                }
            })
            .unwrap_or_default()
            .normalized();

        let snapshot = Arc::new(loaded);
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(Arc::clone(&snapshot));
        }
        snapshot
    }

    /// Normalize, persist, and invalidate the cache.
    pub fn save(&self, settings: AuditSettings) -> Result<(), SettingsError> {
        let normalized = settings.normalized();
        let value = serde_json::to_value(&normalized)
            .map_err(|e| SettingsError::Backend(e.to_string()))?;

        self.backend.write(SETTINGS_KEY, value)?;
        self.invalidate();
        Ok(())
    }

    /// Drop the cached snapshot; the next read reloads from the backend.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SettingsService {
        SettingsService::new(Arc::new(MemorySettingsBackend::new()))
    }

    #[test]
    fn defaults_apply_when_backend_is_empty() {
        let service = service();
        let settings = service.get();

        assert!(!settings.capture_all);
        assert_eq!(settings.payload_max_length, DEFAULT_STORAGE_LIMIT);
        assert_eq!(settings.retention_days, 0);
    }

    #[test]
    fn save_normalizes_and_round_trips() {
        let service = service();

        service
            .save(AuditSettings {
                extra_namespaces: vec!["custom/v1/".to_string(), "/custom/v1".to_string()],
                blocked_endpoints: vec!["  /wp/v2/users/*  ".to_string(), String::new()],
                payload_max_length: 10,
                ..AuditSettings::default()
            })
            .unwrap();

        let settings = service.get();
        assert_eq!(settings.extra_namespaces, vec!["/custom/v1".to_string()]);
        assert_eq!(settings.blocked_endpoints, vec!["/wp/v2/users/*".to_string()]);
        assert_eq!(settings.payload_max_length, MIN_STORAGE_LIMIT);
    }

    #[test]
    fn zero_payload_limit_falls_back_to_default() {
        let normalized = AuditSettings {
            payload_max_length: 0,
            ..AuditSettings::default()
        }
        .normalized();

        assert_eq!(normalized.payload_max_length, DEFAULT_STORAGE_LIMIT);
    }

    #[test]
    fn save_invalidates_the_cached_snapshot() {
        let backend = Arc::new(MemorySettingsBackend::new());
        let service = SettingsService::new(backend);

        let before = service.get();
        assert!(!before.capture_all);

        service
            .save(AuditSettings {
                capture_all: true,
                ..AuditSettings::default()
            })
            .unwrap();

        assert!(service.get().capture_all);
    }

    #[test]
    fn snapshots_are_shared_until_invalidated() {
        let service = service();

        let first = service.get();
        let second = service.get();
        assert!(Arc::ptr_eq(&first, &second));

        service.invalidate();
        let third = service.get();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn blocked_patterns_merges_and_deduplicates() {
        let settings = AuditSettings {
            blocked_endpoints: vec!["/wp/v2/users/*".to_string(), "/a".to_string()],
            blocked_endpoints_suggested: vec!["/a".to_string(), "/b".to_string()],
            ..AuditSettings::default()
        };

        assert_eq!(
            settings.blocked_patterns(),
            vec!["/wp/v2/users/*".to_string(), "/a".to_string(), "/b".to_string()]
        );
    }

    #[test]
    fn pattern_list_parses_newlines_and_commas() {
        let parsed = parse_pattern_list("/a/*\n/b,  /c \r\n/a/*");
        assert_eq!(
            parsed,
            vec!["/a/*".to_string(), "/b".to_string(), "/c".to_string()]
        );
    }

    #[test]
    fn unreadable_document_degrades_to_defaults() {
        let backend = Arc::new(MemorySettingsBackend::new());
        backend
            .write(
                SETTINGS_KEY,
                serde_json::Value::String("not-an-object".to_string()),
            )
            .unwrap();
        let service = SettingsService::new(backend);

        assert_eq!(*service.get(), AuditSettings::default());
    }
}
