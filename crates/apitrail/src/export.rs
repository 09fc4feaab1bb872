//! CSV projection of audit records for the external admin surface.

use crate::record::AuditRecord;

const CSV_COLUMNS: &[&str] = &[
    "timestamp",
    "method",
    "endpoint",
    "api_key_display",
    "ip_address",
    "ip_country",
    "ip_city",
    "ip_organization",
    "ip_lookup_message",
    "response_code",
    "request_payload",
    "response_body",
    "raw_body",
];

/// Render records as RFC 4180 CSV with a header row.
///
/// Fields are projected 1:1 from the record; JSON sub-fields are
/// re-serialized compactly when they parse as JSON objects or arrays.
pub fn records_to_csv(records: &[AuditRecord]) -> String {
    let mut out = String::new();

    out.push_str(&csv_line(CSV_COLUMNS.iter().map(|c| c.to_string())));

    for record in records {
        let fields = [
            format_timestamp(record.timestamp),
            record.method.to_string(),
            record.endpoint.clone(),
            record.api_key_display.clone().unwrap_or_default(),
            record.client_ip.clone(),
            record.ip_country.clone(),
            record.ip_city.clone(),
            record.ip_organization.clone(),
            record.ip_lookup_message.clone(),
            record.response_code.to_string(),
            normalize_json_value(&record.request_payload),
            normalize_json_value(&record.response_body),
            normalize_json_value(&record.raw_body),
        ];

        out.push_str(&csv_line(fields.into_iter()));
    }

    out
}

fn csv_line(fields: impl Iterator<Item = String>) -> String {
    let escaped: Vec<String> = fields.map(|f| csv_escape(&f)).collect();
    format!("{}\n", escaped.join(","))
}

/// Quote a field per RFC 4180 when it contains a delimiter, quote, or line
/// break.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Compact re-serialization for values that parse as JSON containers.
fn normalize_json_value(value: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(parsed) if parsed.is_object() || parsed.is_array() => parsed.to_string(),
        _ => value.to_string(),
    }
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
