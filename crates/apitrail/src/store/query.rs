//! Query filters for stored audit records.

use super::{AuditStore, StoreResult};
use crate::record::{AuditRecord, HttpMethod};

/// Filter set for querying audit records.
///
/// All filters are conjunctive. Results are ordered by timestamp, newest
/// first by default.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Inclusive lower timestamp bound.
    pub from_timestamp: Option<i64>,
    /// Inclusive upper timestamp bound.
    pub to_timestamp: Option<i64>,
    /// Exact method match.
    pub method: Option<HttpMethod>,
    /// Matches a substring of the masked key display, or the exact key id
    /// when the filter parses as an integer.
    pub api_key: Option<String>,
    /// Substring match on the endpoint.
    pub endpoint_contains: Option<String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of leading results to skip.
    pub offset: Option<usize>,
    /// Sort order; true = newest first.
    pub newest_first: bool,
}

impl LogQuery {
    /// Create an empty query sorted newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Check whether a record matches every configured filter.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(from) = self.from_timestamp {
            if record.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.to_timestamp {
            if record.timestamp > to {
                return false;
            }
        }

        if let Some(ref method) = self.method {
            if &record.method != method {
                return false;
            }
        }

        if let Some(ref filter) = self.api_key {
            if !api_key_matches(record, filter) {
                return false;
            }
        }

        if let Some(ref needle) = self.endpoint_contains {
            let needle = needle.to_lowercase();
            if !record.endpoint.to_lowercase().contains(&needle) {
                return false;
            }
        }

        true
    }
}

fn api_key_matches(record: &AuditRecord, filter: &str) -> bool {
    let needle = filter.to_lowercase();
    let display_hit = record
        .api_key_display
        .as_deref()
        .map(|display| display.to_lowercase().contains(&needle))
        .unwrap_or(false);

    let id_hit = match (filter.parse::<i64>(), record.api_key_id) {
        (Ok(wanted), Some(id)) => wanted == id,
        _ => false,
    };

    display_hit || id_hit
}

/// Builder for constructing and executing log queries.
pub struct LogQueryBuilder<'a> {
    store: &'a dyn AuditStore,
    query: LogQuery,
}

impl<'a> LogQueryBuilder<'a> {
    /// Create a builder bound to a store.
    pub fn new(store: &'a dyn AuditStore) -> Self {
        Self {
            store,
            query: LogQuery::new(),
        }
    }

    /// Filter by inclusive timestamp range.
    pub fn time_range(mut self, from: i64, to: i64) -> Self {
        self.query.from_timestamp = Some(from);
        self.query.to_timestamp = Some(to);
        self
    }

    /// Filter records at or after a timestamp.
    pub fn from_timestamp(mut self, from: i64) -> Self {
        self.query.from_timestamp = Some(from);
        self
    }

    /// Filter records at or before a timestamp.
    pub fn to_timestamp(mut self, to: i64) -> Self {
        self.query.to_timestamp = Some(to);
        self
    }

    /// Filter by method.
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.query.method = Some(method);
        self
    }

    /// Filter by key display substring or exact key id.
    pub fn api_key(mut self, filter: impl Into<String>) -> Self {
        self.query.api_key = Some(filter.into());
        self
    }

    /// Filter by endpoint substring.
    pub fn endpoint_contains(mut self, needle: impl Into<String>) -> Self {
        self.query.endpoint_contains = Some(needle.into());
        self
    }

    /// Paginate with 1-indexed pages.
    pub fn page(mut self, page: usize, per_page: usize) -> Self {
        self.query.offset = Some(page.saturating_sub(1) * per_page);
        self.query.limit = Some(per_page);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Skip leading results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Sort oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.query.newest_first = false;
        self
    }

    /// Execute the query.
    pub fn execute(self) -> StoreResult<Vec<AuditRecord>> {
        self.store.query(&self.query)
    }

    /// Count matching records, ignoring pagination.
    pub fn count(self) -> StoreResult<u64> {
        self.store.count(&self.query)
    }

    /// Return the built query without executing it.
    pub fn build(self) -> LogQuery {
        self.query
    }
}
