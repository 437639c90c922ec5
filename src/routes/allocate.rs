//! Allocation webhook
//!
//! `POST /post/allocate` receives the CRM workflow payload and runs one
//! allocation end to end. Success returns the chosen adviser and their
//! earliest available week; failures map to the error taxonomy.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::allocation::{AllocationRequest, RequesterMeta};
use crate::calendar::today_sydney;
use crate::routes::{error_response, json_response};
use crate::server::AppState;
use crate::types::UsherError;

#[derive(Debug, Default, Deserialize)]
struct AllocatePayload {
    #[serde(default)]
    fields: AllocateFields,
    #[serde(default)]
    requester: RequesterPayload,
}

#[derive(Debug, Default, Deserialize)]
struct AllocateFields {
    service_package: Option<String>,
    hs_deal_record_id: Option<String>,
    household_type: Option<String>,
    #[allow(dead_code)]
    agreement_start_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RequesterPayload {
    ip: Option<String>,
    user_agent: Option<String>,
}

#[derive(Serialize)]
struct AllocateResponse {
    status: &'static str,
    allocation: AllocationBody,
}

#[derive(Serialize)]
struct AllocationBody {
    deal_id: String,
    adviser_email: String,
    /// Monday of the earliest available week, `YYYY-MM-DD`
    earliest_available_week: String,
}

/// Handle `POST /post/allocate`
pub async fn handle_allocate_request(
    state: Arc<AppState>,
    body: Bytes,
    remote_addr: Option<IpAddr>,
) -> Response<Full<Bytes>> {
    let payload: AllocatePayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(&UsherError::InvalidInput(format!(
                "malformed allocation payload: {}",
                err
            )));
        }
    };

    let deal_id = match payload.fields.hs_deal_record_id {
        Some(ref id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            return error_response(&UsherError::InvalidInput(
                "fields.hs_deal_record_id is required".to_string(),
            ));
        }
    };

    info!(deal_id = %deal_id, "Received allocation webhook");

    let request = AllocationRequest {
        deal_id: deal_id.clone(),
        service_package: payload
            .fields
            .service_package
            .filter(|s| !s.trim().is_empty()),
        household_type: payload
            .fields
            .household_type
            .filter(|s| !s.trim().is_empty()),
        requester: RequesterMeta {
            ip: payload
                .requester
                .ip
                .or_else(|| remote_addr.map(|a| a.to_string())),
            user_agent: payload.requester.user_agent,
        },
    };

    match state.allocator.allocate(request, today_sydney()).await {
        Ok(outcome) => json_response(
            StatusCode::OK,
            &AllocateResponse {
                status: "success",
                allocation: AllocationBody {
                    deal_id,
                    adviser_email: outcome.adviser_email,
                    earliest_available_week: outcome.earliest_week.to_string(),
                },
            },
        ),
        Err(err) => error_response(&err),
    }
}

/// Handle `GET /post/allocate` with a hint, matching what CRM operators
/// expect when they poke the URL in a browser
pub fn handle_allocate_hint() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({"message": "Hi, please use POST request."}),
    )
}
