//! # apitrail
//!
//! Audit-logging middleware for REST APIs.
//!
//! The pipeline intercepts inbound requests and their responses, decides
//! whether each request is in scope, redacts sensitive data, truncates
//! oversized bodies with an integrity hash, persists a structured record,
//! and enforces a retention policy over the accumulated records. Logging is
//! best-effort: nothing in the capture path ever fails or blocks the
//! original request.
//!
//! ## Example
//!
//! ```rust,no_run
//! use apitrail::{
//!     AuditLayer, CapturePipeline, FallbackCaptureLayer, InMemoryAuditStore,
//!     LayerStack, MemorySettingsBackend, RetentionScheduler, SettingsService,
//! };
//! use std::sync::Arc;
//!
//! let settings = Arc::new(SettingsService::new(Arc::new(MemorySettingsBackend::new())));
//! let store = Arc::new(InMemoryAuditStore::new());
//! let pipeline = Arc::new(CapturePipeline::new(settings.clone(), store.clone()));
//!
//! let mut stack = LayerStack::new();
//! stack.push(Box::new(FallbackCaptureLayer::new(pipeline.clone())));
//! stack.push(Box::new(AuditLayer::new(pipeline)));
//!
//! // Retention runs twice daily, independent of request traffic.
//! let _retention = RetentionScheduler::spawn(store, settings);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Request/response capture pipeline
pub mod capture;

// IP geolocation enrichment
pub mod enrich;

// CSV projection for the admin surface
pub mod export;

// API key identity extraction
pub mod keys;

// Storage ceilings and truncation
pub mod limit;

// Middleware chain and interception points
pub mod middleware;

// Record types
pub mod record;

// Sensitive-data redaction
pub mod redact;

// Retention policy enforcement
pub mod retention;

// Route scope decisions
pub mod scope;

// Capture settings
pub mod settings;

// Record storage backends
pub mod store;

// Re-exports for convenience
pub use capture::{CapturePipeline, CorrelationToken};
pub use enrich::{IpEnricher, IpEnrichment};
pub use export::records_to_csv;
pub use keys::{mask_key, ApiKeyResolver, NoKeyResolver};
pub use limit::{prepare_for_storage, prepare_raw_body};
pub use middleware::{
    AuditLayer, BoxedNext, FallbackCaptureLayer, LayerStack, MiddlewareLayer, Request, Response,
};
pub use record::{AuditRecord, HttpMethod, NewAuditRecord, RequestSnapshot};
pub use redact::{sanitize_headers, sanitize_text, sanitize_value, strip_tags};
pub use retention::{run_retention_cleanup, CleanupOutcome, CleanupStatus, RetentionScheduler};
pub use scope::{is_in_scope, matches_pattern, RouteScope};
pub use settings::{
    AuditSettings, MemorySettingsBackend, SettingsBackend, SettingsError, SettingsService,
};
pub use store::{
    AuditStore, FileAuditStore, FileAuditStoreConfig, InMemoryAuditStore, LogQuery,
    LogQueryBuilder, StoreError, StoreResult,
};
