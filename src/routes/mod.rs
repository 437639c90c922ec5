//! HTTP routes for Usher

pub mod admin;
pub mod allocate;
pub mod availability;
pub mod health;

use std::collections::HashMap;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::UsherError;

pub use admin::{handle_closures_request, handle_overrides_request};
pub use allocate::{handle_allocate_hint, handle_allocate_request};
pub use availability::{handle_earliest_request, handle_schedule_request};
pub use health::{health_check, readiness_check, version_info};

/// Build a successful JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let encoded = serde_json::to_vec(body)
        .unwrap_or_else(|_| br#"{"error":"Internal","detail":"serialization failed"}"#.to_vec());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-cache")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(encoded)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(r#"{"error":"Internal"}"#)))
                .unwrap()
        })
}

/// JSON error body: a stable kind, a human-readable detail, and field
/// reasons for validation failures. Never backend internals.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<crate::types::FieldErrors>,
}

/// Map a service error onto its HTTP response
pub fn error_response(err: &UsherError) -> Response<Full<Bytes>> {
    let fields = match err {
        UsherError::Validation(fields) => Some(fields.clone()),
        _ => None,
    };
    let body = ErrorBody {
        error: err.kind(),
        detail: match err {
            UsherError::Validation(_) => "validation failed".to_string(),
            other => other.detail(),
        },
        fields,
    };
    json_response(err.status_code(), &body)
}

/// 404 for unknown paths
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    error_response(&UsherError::NotFound(format!("no route for {}", path)))
}

/// CORS preflight response
pub fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Parse a query string into a key-value map, percent-decoding values
pub fn parse_query_params(query: &str) -> HashMap<String, String> {
    if query.is_empty() {
        return HashMap::new();
    }

    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((key.to_string(), percent_decode(&value.replace('+', " "))))
        })
        .collect()
}

/// Decode `%XX` escapes; malformed escapes pass through untouched
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(hex) = raw.get(i + 1..i + 3) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
