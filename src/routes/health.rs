//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - liveness (is the service running?)
//! - /ready, /readyz - readiness (can it serve allocations?)
//!
//! Liveness always returns 200. Readiness requires the store's backing
//! database unless dev mode runs memory-only.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' or 'degraded' for dashboard display
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since process start
    pub uptime: u64,
    pub timestamp: String,
    pub mode: String,
    pub node_id: String,
    pub store: StoreHealth,
}

#[derive(Serialize)]
pub struct StoreHealth {
    /// True when MongoDB backs the store; false in memory-only dev mode
    pub mongo_connected: bool,
    pub crm_configured: bool,
    pub hr_configured: bool,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let args = &state.args;
    let mongo_connected = state.store.has_mongo();

    let status = if mongo_connected || args.dev_mode {
        "online"
    } else {
        "degraded"
    };

    HealthResponse {
        healthy: true,
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        node_id: args.node_id.to_string(),
        store: StoreHealth {
            mongo_connected,
            crm_configured: args.crm_token.is_some(),
            hr_configured: args.hr_token.is_some(),
        },
    }
}

/// Handle liveness probe (/health, /healthz)
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);
    json_response(StatusCode::OK, &response)
}

/// Handle readiness probe (/ready, /readyz)
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);
    let is_ready = response.store.mongo_connected || state.args.dev_mode;

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "usher",
    };
    json_response(StatusCode::OK, &response)
}
