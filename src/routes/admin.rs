//! Admin API for office closures and capacity overrides
//!
//! ## Endpoints
//!
//! - `GET /closures` - list closures
//! - `POST /closures` - create a closure
//! - `PUT /closures/{id}` - update a closure
//! - `DELETE /closures/{id}` - delete a closure
//! - `GET/POST /capacity_overrides`, `PUT/DELETE /capacity_overrides/{id}`
//!
//! Validation failures return 400 with a field-keyed reason map. Writes are
//! visible to the very next capacity run; nothing here is cached.

use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::routes::{error_response, json_response, not_found_response};
use crate::server::AppState;
use crate::store::{CapacityOverride, ClosureScope, OfficeClosure};
use crate::types::{FieldErrors, UsherError};

const MAX_TAG_LEN: usize = 32;

#[derive(Serialize)]
struct ClosureList {
    count: usize,
    closures: Vec<OfficeClosure>,
}

#[derive(Serialize)]
struct OverrideList {
    count: usize,
    capacity_overrides: Vec<CapacityOverride>,
}

#[derive(Serialize)]
struct Deleted {
    ok: bool,
}

// ============================================================================
// Closures
// ============================================================================

/// Route `/closures` and `/closures/{id}`
pub async fn handle_closures_request(
    state: Arc<AppState>,
    method: Method,
    path: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let item_id = path.strip_prefix("/closures/").filter(|rest| !rest.is_empty());

    let result = match (method, item_id) {
        (Method::GET, None) => list_closures(&state).await,
        (Method::POST, None) => create_closure(&state, &body).await,
        (Method::PUT, Some(id)) => update_closure(&state, id, &body).await,
        (Method::DELETE, Some(id)) => delete_closure(&state, id).await,
        _ => return not_found_response(path),
    };

    result.unwrap_or_else(|err| error_response(&err))
}

async fn list_closures(state: &AppState) -> Result<Response<Full<Bytes>>, UsherError> {
    let closures = state.store.list_closures().await?;
    Ok(json_response(
        StatusCode::OK,
        &ClosureList {
            count: closures.len(),
            closures,
        },
    ))
}

async fn create_closure(state: &AppState, body: &Bytes) -> Result<Response<Full<Bytes>>, UsherError> {
    let closure = parse_closure_payload(body)?;
    let created = state.store.create_closure(closure).await?;
    info!(closure_id = %created.id, "Created office closure");
    Ok(json_response(StatusCode::CREATED, &created))
}

async fn update_closure(
    state: &AppState,
    id: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>, UsherError> {
    let closure = parse_closure_payload(body)?;
    let updated = state.store.update_closure(id, closure).await?;
    info!(closure_id = %id, "Updated office closure");
    Ok(json_response(StatusCode::OK, &updated))
}

async fn delete_closure(state: &AppState, id: &str) -> Result<Response<Full<Bytes>>, UsherError> {
    state.store.delete_closure(id).await?;
    info!(closure_id = %id, "Deleted office closure");
    Ok(json_response(StatusCode::OK, &Deleted { ok: true }))
}

/// Parse and validate a closure payload.
///
/// Accepts tags as an array or a comma-separated string, and the legacy
/// `reason` key as an alias for `description`.
fn parse_closure_payload(body: &Bytes) -> Result<OfficeClosure, UsherError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| UsherError::InvalidInput(format!("malformed JSON: {}", e)))?;

    let mut errors = FieldErrors::new();

    let start_date = parse_date_field(&value, "start_date", &mut errors);
    let end_date = match value.get("end_date").and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => parse_date_str(raw, "end_date", &mut errors),
        _ => start_date,
    };

    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            errors.insert(
                "end_date".to_string(),
                "end_date must not be before start_date".to_string(),
            );
        }
    }

    let description = value
        .get("description")
        .or_else(|| value.get("reason"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if description.is_empty() {
        errors.insert(
            "description".to_string(),
            "description must not be empty".to_string(),
        );
    }

    let tags = normalize_tags(value.get("tags"), &mut errors);
    let scope = parse_scope(value.get("scope"), &mut errors);

    match (start_date, end_date) {
        (Some(start_date), Some(end_date)) if errors.is_empty() => Ok(OfficeClosure {
            id: String::new(),
            start_date,
            end_date,
            description: description.to_string(),
            tags,
            scope,
        }),
        _ => Err(UsherError::Validation(errors)),
    }
}

fn parse_date_field(value: &Value, field: &str, errors: &mut FieldErrors) -> Option<NaiveDate> {
    match value.get(field).and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => parse_date_str(raw, field, errors),
        _ => {
            errors.insert(
                field.to_string(),
                format!("{} is required (YYYY-MM-DD)", field),
            );
            None
        }
    }
}

fn parse_date_str(raw: &str, field: &str, errors: &mut FieldErrors) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.insert(
                field.to_string(),
                "invalid date format; use YYYY-MM-DD".to_string(),
            );
            None
        }
    }
}

/// Tags arrive as an array or a comma-separated string; they must be
/// unique and each at most 32 characters
fn normalize_tags(raw: Option<&Value>, errors: &mut FieldErrors) -> Vec<String> {
    let parts: Vec<String> = match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in parts {
        if tag.len() > MAX_TAG_LEN {
            errors.insert(
                "tags".to_string(),
                format!("tag '{}' exceeds {} characters", tag, MAX_TAG_LEN),
            );
        } else if tags.contains(&tag) {
            errors.insert("tags".to_string(), format!("duplicate tag '{}'", tag));
        } else {
            tags.push(tag);
        }
    }
    tags
}

fn parse_scope(raw: Option<&Value>, errors: &mut FieldErrors) -> ClosureScope {
    match raw {
        None | Some(Value::Null) => ClosureScope::Global,
        Some(value) => match value.get("type").and_then(Value::as_str) {
            Some("global") => ClosureScope::Global,
            Some("adviser") => match value.get("email").and_then(Value::as_str) {
                Some(email) if !email.trim().is_empty() => {
                    ClosureScope::adviser(email.trim().to_ascii_lowercase())
                }
                _ => {
                    errors.insert(
                        "scope".to_string(),
                        "adviser scope requires an email".to_string(),
                    );
                    ClosureScope::Global
                }
            },
            _ => {
                errors.insert(
                    "scope".to_string(),
                    "scope.type must be 'global' or 'adviser'".to_string(),
                );
                ClosureScope::Global
            }
        },
    }
}

// ============================================================================
// Capacity overrides
// ============================================================================

/// Route `/capacity_overrides` and `/capacity_overrides/{id}`
pub async fn handle_overrides_request(
    state: Arc<AppState>,
    method: Method,
    path: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let item_id = path
        .strip_prefix("/capacity_overrides/")
        .filter(|rest| !rest.is_empty());

    let result = match (method, item_id) {
        (Method::GET, None) => list_overrides(&state).await,
        (Method::POST, None) => create_override(&state, &body).await,
        (Method::PUT, Some(id)) => update_override(&state, id, &body).await,
        (Method::DELETE, Some(id)) => delete_override(&state, id).await,
        _ => return not_found_response(path),
    };

    result.unwrap_or_else(|err| error_response(&err))
}

async fn list_overrides(state: &AppState) -> Result<Response<Full<Bytes>>, UsherError> {
    let overrides = state.store.list_capacity_overrides(None).await?;
    Ok(json_response(
        StatusCode::OK,
        &OverrideList {
            count: overrides.len(),
            capacity_overrides: overrides,
        },
    ))
}

async fn create_override(state: &AppState, body: &Bytes) -> Result<Response<Full<Bytes>>, UsherError> {
    let value = parse_override_payload(state, body).await?;
    let created = state.store.create_capacity_override(value).await?;
    info!(override_id = %created.id, adviser = %created.adviser_email, "Created capacity override");
    Ok(json_response(StatusCode::CREATED, &created))
}

async fn update_override(
    state: &AppState,
    id: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>, UsherError> {
    let value = parse_override_payload(state, body).await?;
    let updated = state.store.update_capacity_override(id, value).await?;
    info!(override_id = %id, "Updated capacity override");
    Ok(json_response(StatusCode::OK, &updated))
}

async fn delete_override(state: &AppState, id: &str) -> Result<Response<Full<Bytes>>, UsherError> {
    state.store.delete_capacity_override(id).await?;
    info!(override_id = %id, "Deleted capacity override");
    Ok(json_response(StatusCode::OK, &Deleted { ok: true }))
}

/// Parse and validate an override payload. The adviser must be known to
/// the store; the limit must be a non-negative integer.
async fn parse_override_payload(
    state: &AppState,
    body: &Bytes,
) -> Result<CapacityOverride, UsherError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| UsherError::InvalidInput(format!("malformed JSON: {}", e)))?;

    let mut errors = FieldErrors::new();

    let adviser_email = value
        .get("adviser_email")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if adviser_email.is_empty() {
        errors.insert(
            "adviser_email".to_string(),
            "adviser_email is required".to_string(),
        );
    } else if state.store.find_adviser_by_email(adviser_email).await?.is_none() {
        errors.insert(
            "adviser_email".to_string(),
            format!("no adviser with email {}", adviser_email),
        );
    }

    let effective_date = parse_date_field(&value, "effective_date", &mut errors);

    let client_limit_monthly = match value.get("client_limit_monthly") {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(limit) => Some(limit as u32),
            None => {
                errors.insert(
                    "client_limit_monthly".to_string(),
                    "client_limit_monthly must be a non-negative integer".to_string(),
                );
                None
            }
        },
        _ => {
            errors.insert(
                "client_limit_monthly".to_string(),
                "client_limit_monthly is required".to_string(),
            );
            None
        }
    };

    match (effective_date, client_limit_monthly) {
        (Some(effective_date), Some(client_limit_monthly)) if errors.is_empty() => {
            Ok(CapacityOverride {
                id: String::new(),
                adviser_email: adviser_email.to_ascii_lowercase(),
                effective_date,
                client_limit_monthly,
                pod_type: value
                    .get("pod_type")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                notes: value
                    .get("notes")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            })
        }
        _ => Err(UsherError::Validation(errors)),
    }
}
