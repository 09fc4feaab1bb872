//! Best-effort IP geolocation enrichment.
//!
//! Lookups go to an ip-api.com-style provider with a short timeout and are
//! cached per IP for a day to bound outbound call volume. Every failure mode
//! degrades to empty fields plus a diagnostic message; enrichment never fails
//! the capture path.

use crate::redact::sanitize_text;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How long a lookup result is reused before the provider is asked again.
pub const ENRICHMENT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on a single provider call.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default geolocation provider.
pub const DEFAULT_PROVIDER_URL: &str = "http://ip-api.com";

/// Geolocation fields attached to an audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpEnrichment {
    /// Country name, empty when unknown.
    pub country: String,
    /// City name, empty when unknown.
    pub city: String,
    /// Owning organization, empty when unknown.
    pub organization: String,
    /// Diagnostic message when the lookup degraded.
    pub message: String,
}

impl IpEnrichment {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
struct ProviderResponse {
    status: Option<String>,
    message: Option<String>,
    country: Option<String>,
    city: Option<String>,
    org: Option<String>,
}

struct CachedLookup {
    fields: IpEnrichment,
    fetched_at: Instant,
}

/// Geolocation lookup client with a per-IP TTL cache.
pub struct IpEnricher {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<String, CachedLookup>,
    ttl: Duration,
}

impl IpEnricher {
    /// Create an enricher against the default provider.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_PROVIDER_URL)
    }

    /// Create an enricher against a custom provider base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: DashMap::new(),
            ttl: ENRICHMENT_CACHE_TTL,
        }
    }

    /// Override the cache TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enrich an IP address, consulting the cache first.
    ///
    /// An empty address short-circuits to empty fields. Only the first
    /// request for a given IP inside the TTL window pays the lookup latency.
    pub async fn enrich(&self, ip: &str) -> IpEnrichment {
        let ip = sanitize_text(ip);

        if ip.is_empty() {
            return IpEnrichment::default();
        }

        if let Some(hit) = self.cache.get(&ip) {
            if hit.fetched_at.elapsed() < self.ttl {
                return hit.fields.clone();
            }
            drop(hit);
            self.cache.remove(&ip);
        }

        let fields = self.lookup(&ip).await;
        self.cache.insert(
            ip,
            CachedLookup {
                fields: fields.clone(),
                fetched_at: Instant::now(),
            },
        );

        fields
    }

    async fn lookup(&self, ip: &str) -> IpEnrichment {
        let url = format!(
            "{}/json/{}?fields=status,message,country,city,org",
            self.base_url,
            urlencoding::encode(ip)
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(ip, error = %err, "ip lookup transport failure");
                return IpEnrichment::failure(format!("IP lookup failed: {}", err));
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return IpEnrichment::failure(format!(
                "IP lookup returned status {}.",
                status.as_u16()
            ));
        }

        let body = match response.json::<ProviderResponse>().await {
            Ok(body) => body,
            Err(_) => return IpEnrichment::failure("IP lookup returned an invalid response."),
        };

        if body.status.as_deref() == Some("success") {
            return IpEnrichment {
                country: sanitize_text(body.country.as_deref().unwrap_or_default()),
                city: sanitize_text(body.city.as_deref().unwrap_or_default()),
                organization: sanitize_text(body.org.as_deref().unwrap_or_default()),
                message: String::new(),
            };
        }

        let message = sanitize_text(body.message.as_deref().unwrap_or_default());
        if message.is_empty() {
            IpEnrichment::failure("IP information unavailable.")
        } else {
            IpEnrichment::failure(format!("IP lookup unavailable: {}", message))
        }
    }

    /// Number of cached lookups.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Default for IpEnricher {
    fn default() -> Self {
        Self::new()
    }
}
