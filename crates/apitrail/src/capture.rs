//! Request/response capture pipeline.
//!
//! Each in-scope request is snapshotted at the pre-handler interception
//! point, held under a correlation token, and resolved exactly once: either
//! by the normal post-handler completion or by the fallback interception
//! point. Entries whose response is never observed are abandoned in memory.

use crate::enrich::{IpEnricher, IpEnrichment};
use crate::keys::{self, ApiKeyResolver, NoKeyResolver};
use crate::limit;
use crate::middleware::Request;
use crate::record::{HttpMethod, NewAuditRecord, RequestSnapshot};
use crate::redact::{self, sanitize_text};
use crate::scope;
use crate::settings::SettingsService;
use crate::store::AuditStore;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Upper bound on remembered completed tokens.
const COMPLETED_CAPACITY: usize = 4_096;

/// Fixed status recorded for legacy (non-intercepted) API calls.
const LEGACY_RESPONSE_CODE: u16 = 200;

/// Per-request identifier linking the capture interception points.
///
/// Generated at request entry and threaded through the chain in the request's
/// extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(u128);

impl CorrelationToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(u128::from_be_bytes(bytes))
    }

    /// Fetch the token already attached to a request, or attach a new one.
    pub fn attach(req: &mut Request) -> Self {
        if let Some(token) = req.extensions().get::<CorrelationToken>() {
            return *token;
        }

        let token = Self::generate();
        req.extensions_mut().insert(token);
        token
    }
}

/// Snapshot taken at the pre-handler interception point.
#[derive(Debug, Clone)]
struct PendingCapture {
    timestamp: i64,
    method: HttpMethod,
    endpoint: String,
    request_payload: String,
    raw_body: String,
    api_key_id: Option<i64>,
    api_key_display: Option<String>,
    client_ip: String,
    enrichment: IpEnrichment,
    user_agent: String,
}

/// Bounded FIFO of resolved tokens; keeps fallback capture from producing a
/// second record for a request the normal path already stored.
#[derive(Default)]
struct CompletedTokens {
    order: VecDeque<CorrelationToken>,
    seen: HashSet<CorrelationToken>,
}

impl CompletedTokens {
    fn insert(&mut self, token: CorrelationToken) {
        if !self.seen.insert(token) {
            return;
        }

        self.order.push_back(token);
        while self.order.len() > COMPLETED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    fn contains(&self, token: &CorrelationToken) -> bool {
        self.seen.contains(token)
    }
}

/// Correlates request and response snapshots and writes audit records.
///
/// The pipeline never propagates an error back into the request path: store
/// failures are logged and swallowed, enrichment and serialization degrade to
/// empty fields.
pub struct CapturePipeline {
    settings: Arc<SettingsService>,
    store: Arc<dyn AuditStore>,
    enricher: Arc<IpEnricher>,
    resolver: Arc<dyn ApiKeyResolver>,
    pending: DashMap<CorrelationToken, PendingCapture>,
    completed: Mutex<CompletedTokens>,
}

impl CapturePipeline {
    /// Create a pipeline over the given settings and store.
    pub fn new(settings: Arc<SettingsService>, store: Arc<dyn AuditStore>) -> Self {
        Self {
            settings,
            store,
            enricher: Arc::new(IpEnricher::new()),
            resolver: Arc::new(NoKeyResolver),
            pending: DashMap::new(),
            completed: Mutex::new(CompletedTokens::default()),
        }
    }

    /// Use a custom IP enricher.
    pub fn with_enricher(mut self, enricher: Arc<IpEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Use a custom API key resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ApiKeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Whether the fallback interception point is active.
    pub fn extended_capture_enabled(&self) -> bool {
        self.settings.get().capture_extended
    }

    /// Pre-handler interception: snapshot an in-scope request.
    ///
    /// Returns whether a pending entry was registered; out-of-scope requests
    /// are ignored.
    pub async fn observe_request(&self, token: CorrelationToken, req: &Request) -> bool {
        let settings = self.settings.get();

        if !scope::is_in_scope(req.uri().path(), &settings) {
            return false;
        }

        let capture = self.build_capture(req).await;
        self.pending.insert(token, capture);
        true
    }

    /// Post-handler interception: resolve a pending snapshot into a record.
    pub fn complete(&self, token: CorrelationToken, status: u16, body: Option<String>) {
        let Some((_, capture)) = self.pending.remove(&token) else {
            return;
        };

        self.insert_record(capture, status, body.unwrap_or_default());
        self.mark_completed(token);
    }

    /// Fallback interception: capture responses that bypassed the normal
    /// completion path.
    ///
    /// Active only when extended capture is on. A token the normal path
    /// already resolved is skipped, so each request yields at most one
    /// record. When no snapshot exists (the response was produced before the
    /// pre-handler point ran) one is synthesized from the request.
    pub async fn complete_fallback(
        &self,
        token: CorrelationToken,
        req: &Request,
        status: u16,
        body: Option<String>,
    ) {
        let settings = self.settings.get();

        if !settings.capture_extended {
            return;
        }

        if !scope::is_in_scope(req.uri().path(), &settings) {
            return;
        }

        if self.is_completed(&token) {
            return;
        }

        let capture = match self.pending.remove(&token) {
            Some((_, capture)) => capture,
            None => self.build_capture(req).await,
        };

        self.insert_record(capture, status, body.unwrap_or_default());
        self.mark_completed(token);
    }

    /// Record a legacy (non-intercepted) API call immediately.
    ///
    /// No correlation entry is created: the record is synthesized from the
    /// few fields the legacy surface exposes and stored with a fixed success
    /// status.
    pub fn record_legacy(&self, api: &str, method: HttpMethod, endpoint: &str, query: Option<&str>) {
        let mut endpoint = sanitize_text(endpoint);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            endpoint = format!("{}?{}", endpoint, query);
        }

        let snapshot = RequestSnapshot::default();
        let request_payload =
            serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());

        let capture = PendingCapture {
            timestamp: chrono::Utc::now().timestamp(),
            method,
            endpoint,
            request_payload,
            raw_body: String::new(),
            api_key_id: None,
            api_key_display: None,
            client_ip: String::new(),
            enrichment: IpEnrichment::default(),
            user_agent: String::new(),
        };

        let body = serde_json::json!({ "api": sanitize_text(api) }).to_string();
        self.insert_record(capture, LEGACY_RESPONSE_CODE, body);
    }

    /// Number of unresolved pending entries.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    async fn build_capture(&self, req: &Request) -> PendingCapture {
        let query_params = parse_query_params(req.uri());
        let headers = redact::sanitize_headers(req.headers());

        let raw = String::from_utf8_lossy(req.body());
        let (raw_body, raw_body_truncated) = limit::prepare_raw_body(&raw);

        let body = serde_json::from_slice::<serde_json::Value>(req.body())
            .map(|value| redact::sanitize_value(&value))
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

        let params = serde_json::Value::Object(
            query_params
                .iter()
                .map(|(k, v)| {
                    (
                        sanitize_text(k),
                        serde_json::Value::String(sanitize_text(v)),
                    )
                })
                .collect(),
        );

        let snapshot = RequestSnapshot {
            params,
            body,
            headers,
            raw_body: raw_body.clone(),
            raw_body_truncated,
        };
        let request_payload =
            serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());

        let consumer_key = keys::extract_consumer_key(&query_params, req.headers());
        let api_key_id = consumer_key
            .as_deref()
            .and_then(|key| self.resolver.resolve(key));
        let api_key_display = consumer_key.as_deref().map(keys::mask_key);

        let client_ip = client_ip_from_headers(req.headers());
        let enrichment = self.enricher.enrich(&client_ip).await;

        PendingCapture {
            timestamp: chrono::Utc::now().timestamp(),
            method: HttpMethod::from(req.method()),
            endpoint: endpoint_path(req.uri()),
            request_payload,
            raw_body,
            api_key_id,
            api_key_display,
            client_ip,
            enrichment,
            user_agent: user_agent_from_headers(req.headers()),
        }
    }

    fn insert_record(&self, capture: PendingCapture, status: u16, body: String) {
        let storage_limit = self.settings.get().payload_max_length;

        let record = NewAuditRecord {
            timestamp: capture.timestamp,
            method: capture.method,
            endpoint: capture.endpoint,
            client_ip: capture.client_ip,
            ip_country: capture.enrichment.country,
            ip_city: capture.enrichment.city,
            ip_organization: capture.enrichment.organization,
            ip_lookup_message: capture.enrichment.message,
            user_agent: capture.user_agent,
            api_key_id: capture.api_key_id,
            api_key_display: capture.api_key_display,
            request_payload: limit::prepare_for_storage(&capture.request_payload, storage_limit),
            raw_body: capture.raw_body,
            response_code: status,
            response_body: limit::prepare_for_storage(&body, storage_limit),
        };

        if let Err(err) = self.store.insert(record) {
            tracing::warn!(error = %err, "audit record insert failed");
        }
    }

    fn mark_completed(&self, token: CorrelationToken) {
        if let Ok(mut completed) = self.completed.lock() {
            completed.insert(token);
        }
    }

    fn is_completed(&self, token: &CorrelationToken) -> bool {
        self.completed
            .lock()
            .map(|completed| completed.contains(token))
            .unwrap_or(false)
    }
}

/// Trailing-slash-normalized path plus the raw query string.
pub fn endpoint_path(uri: &http::Uri) -> String {
    let path = scope::with_trailing_slash(uri.path());

    match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path,
    }
}

/// Decode query parameters into a map.
pub fn parse_query_params(uri: &http::Uri) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            let mut parts = pair.splitn(2, '=');
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                params.insert(
                    urlencoding::decode(key).unwrap_or_default().into_owned(),
                    urlencoding::decode(value).unwrap_or_default().into_owned(),
                );
            }
        }
    }

    params
}

/// Client address from proxy headers, first parseable hop wins.
pub fn client_ip_from_headers(headers: &http::HeaderMap) -> String {
    for name in ["cf-connecting-ip", "client-ip", "x-forwarded-for", "x-real-ip"] {
        if let Some(value) = headers.get(name) {
            if let Ok(text) = value.to_str() {
                let first = text.split(',').next().unwrap_or_default().trim();
                if first.parse::<IpAddr>().is_ok() {
                    return first.to_string();
                }
            }
        }
    }

    String::new()
}

fn user_agent_from_headers(headers: &http::HeaderMap) -> String {
    headers
        .get(http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(sanitize_text)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AuditRecord;
    use crate::settings::{AuditSettings, MemorySettingsBackend};
    use crate::store::{AuditStore, InMemoryAuditStore, LogQuery};
    use bytes::Bytes;

    fn service_with(settings: AuditSettings) -> Arc<SettingsService> {
        let service = SettingsService::new(Arc::new(MemorySettingsBackend::new()));
        service.save(settings).unwrap();
        Arc::new(service)
    }

    fn pipeline_with(
        settings: AuditSettings,
    ) -> (CapturePipeline, Arc<InMemoryAuditStore>) {
        let store = Arc::new(InMemoryAuditStore::new());
        let pipeline = CapturePipeline::new(service_with(settings), store.clone())
            .with_enricher(Arc::new(IpEnricher::with_base_url("http://127.0.0.1:9")));
        (pipeline, store)
    }

    fn request(method: &str, uri: &str, body: &str) -> Request {
        let mut req = Request::new(Bytes::from(body.to_string()));
        *req.method_mut() = method.parse().unwrap();
        *req.uri_mut() = uri.parse().unwrap();
        req
    }

    fn stored_records(store: &InMemoryAuditStore) -> Vec<AuditRecord> {
        store.query(&LogQuery::new()).unwrap()
    }

    #[tokio::test]
    async fn in_scope_request_is_captured_and_completed() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());
        let req = request("POST", "/wc/v3/orders?status=processing", r#"{"total":"10"}"#);

        let token = CorrelationToken::generate();
        assert!(pipeline.observe_request(token, &req).await);
        assert_eq!(pipeline.pending_len(), 1);

        pipeline.complete(token, 201, Some(r#"{"id":55}"#.to_string()));
        assert_eq!(pipeline.pending_len(), 0);

        let records = stored_records(&store);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.method, HttpMethod::Post);
        assert_eq!(record.endpoint, "/wc/v3/orders/?status=processing");
        assert_eq!(record.response_code, 201);
        assert_eq!(record.response_body, r#"{"id":55}"#);
        assert!(record.request_payload.contains("processing"));
    }

    #[tokio::test]
    async fn out_of_scope_request_is_ignored() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());
        let req = request("GET", "/wp/v2/posts", "");

        let token = CorrelationToken::generate();
        assert!(!pipeline.observe_request(token, &req).await);

        pipeline.complete(token, 200, None);
        assert!(stored_records(&store).is_empty());
    }

    #[tokio::test]
    async fn completion_without_snapshot_is_a_no_op() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());

        pipeline.complete(CorrelationToken::generate(), 200, None);
        assert!(stored_records(&store).is_empty());
    }

    #[tokio::test]
    async fn fallback_never_duplicates_a_completed_request() {
        let settings = AuditSettings {
            capture_extended: true,
            ..AuditSettings::default()
        };
        let (pipeline, store) = pipeline_with(settings);
        let req = request("GET", "/wc/v3/products", "");

        let token = CorrelationToken::generate();
        pipeline.observe_request(token, &req).await;
        pipeline.complete(token, 200, Some("{}".to_string()));

        pipeline
            .complete_fallback(token, &req, 200, Some("{}".to_string()))
            .await;

        assert_eq!(stored_records(&store).len(), 1);
    }

    #[tokio::test]
    async fn fallback_synthesizes_a_snapshot_when_none_exists() {
        let settings = AuditSettings {
            capture_extended: true,
            ..AuditSettings::default()
        };
        let (pipeline, store) = pipeline_with(settings);
        let req = request("GET", "/wc/v3/orders", "");

        let token = CorrelationToken::generate();
        pipeline
            .complete_fallback(token, &req, 401, Some(r#"{"code":"unauthorized"}"#.to_string()))
            .await;

        let records = stored_records(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response_code, 401);
    }

    #[tokio::test]
    async fn fallback_is_inert_without_extended_capture() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());
        let req = request("GET", "/wc/v3/orders", "");

        pipeline
            .complete_fallback(CorrelationToken::generate(), &req, 500, None)
            .await;

        assert!(stored_records(&store).is_empty());
    }

    #[tokio::test]
    async fn basic_auth_key_is_masked_and_never_stored_raw() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());

        let raw_key = "ck_1234567890abcdef";
        let encoded = {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine as _;
            STANDARD.encode(format!("{}:cs_secret", raw_key))
        };

        let mut req = request("GET", "/wc/v3/orders", "");
        req.headers_mut().insert(
            http::header::AUTHORIZATION,
            format!("Basic {}", encoded).parse().unwrap(),
        );

        let token = CorrelationToken::generate();
        pipeline.observe_request(token, &req).await;
        pipeline.complete(token, 200, Some("{}".to_string()));

        let records = stored_records(&store);
        let record = &records[0];

        assert_eq!(record.api_key_display.as_deref(), Some("ck_123***********ef"));

        let serialized = serde_json::to_string(record).unwrap();
        assert!(!serialized.contains(raw_key));
        assert!(!serialized.contains("cs_secret"));
        assert!(!serialized.contains(&encoded));
    }

    #[tokio::test]
    async fn oversized_response_body_is_truncated_with_annotation() {
        let settings = AuditSettings {
            payload_max_length: crate::limit::MIN_STORAGE_LIMIT,
            ..AuditSettings::default()
        };
        let (pipeline, store) = pipeline_with(settings);
        let req = request("GET", "/wc/v3/orders", "");

        let token = CorrelationToken::generate();
        pipeline.observe_request(token, &req).await;

        let big_body = "x".repeat(crate::limit::MIN_STORAGE_LIMIT * 3);
        pipeline.complete(token, 200, Some(big_body));

        let records = stored_records(&store);
        assert!(records[0]
            .response_body
            .contains(crate::limit::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn legacy_call_inserts_immediately_with_fixed_status() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());

        pipeline.record_legacy(
            "orders",
            HttpMethod::Get,
            "/legacy/orders",
            Some("page=2"),
        );

        let records = stored_records(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response_code, 200);
        assert_eq!(records[0].endpoint, "/legacy/orders?page=2");
        assert_eq!(records[0].response_body, r#"{"api":"orders"}"#);
        assert_eq!(pipeline.pending_len(), 0);
    }

    #[tokio::test]
    async fn raw_body_flag_is_set_for_oversized_bodies() {
        let (pipeline, store) = pipeline_with(AuditSettings::default());

        let body = "b".repeat(crate::limit::RAW_BODY_MAX_LENGTH + 10);
        let req = request("POST", "/wc/v3/orders", &body);

        let token = CorrelationToken::generate();
        pipeline.observe_request(token, &req).await;
        pipeline.complete(token, 200, None);

        let records = stored_records(&store);
        assert!(records[0].request_payload.contains("\"raw_body_truncated\":true"));
        assert_eq!(
            records[0].raw_body.chars().count(),
            crate::limit::RAW_BODY_MAX_LENGTH
        );
    }

    #[test]
    fn tokens_are_unique_and_attach_once() {
        let mut req = request("GET", "/wc/v3/orders", "");

        let first = CorrelationToken::attach(&mut req);
        let second = CorrelationToken::attach(&mut req);
        assert_eq!(first, second);

        assert_ne!(CorrelationToken::generate(), CorrelationToken::generate());
    }

    #[test]
    fn completed_set_is_bounded() {
        let mut completed = CompletedTokens::default();
        let first = CorrelationToken::generate();
        completed.insert(first);

        for _ in 0..COMPLETED_CAPACITY {
            completed.insert(CorrelationToken::generate());
        }

        assert!(!completed.contains(&first));
        assert!(completed.order.len() <= COMPLETED_CAPACITY);
    }

    #[test]
    fn client_ip_prefers_earlier_headers_and_validates() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());
        headers.insert("cf-connecting-ip", "not-an-ip".parse().unwrap());

        assert_eq!(client_ip_from_headers(&headers), "198.51.100.7");

        let mut headers = http::HeaderMap::new();
        headers.insert("cf-connecting-ip", "203.0.113.1".parse().unwrap());
        headers.insert("x-forwarded-for", "198.51.100.7".parse().unwrap());

        assert_eq!(client_ip_from_headers(&headers), "203.0.113.1");
        assert_eq!(client_ip_from_headers(&http::HeaderMap::new()), "");
    }

    #[test]
    fn endpoint_path_normalizes_and_keeps_query() {
        let uri: http::Uri = "/wc/v3/orders?page=1&per_page=5".parse().unwrap();
        assert_eq!(endpoint_path(&uri), "/wc/v3/orders/?page=1&per_page=5");

        let uri: http::Uri = "/wc/v3/orders/".parse().unwrap();
        assert_eq!(endpoint_path(&uri), "/wc/v3/orders/");
    }

    #[test]
    fn query_params_are_url_decoded() {
        let uri: http::Uri = "/wc/v3/orders?status=on%20hold&page=2".parse().unwrap();
        let params = parse_query_params(&uri);

        assert_eq!(params.get("status"), Some(&"on hold".to_string()));
        assert_eq!(params.get("page"), Some(&"2".to_string()));
    }
}
