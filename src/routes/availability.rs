//! Availability read views
//!
//! - `GET /availability/earliest` - one row per adviser with their earliest
//!   available week, for the operator overview table
//! - `GET /availability/schedule?email=...` - the full weekly capacity table
//!   for one adviser, with the earliest available week flagged

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::calendar::{iso_week_label, monday_of, today_sydney};
use crate::capacity::{
    earliest_available_week, CapacityEngine, CapacityProjection, EngineConfig, SelectorConfig,
};
use crate::crm::Adviser;
use crate::routes::{error_response, json_response, parse_query_params};
use crate::server::AppState;
use crate::store::AdviserFilter;
use crate::types::UsherError;

/// Concurrent projections for the overview table
const VIEW_FANOUT: usize = 16;

/// Most pre-baseline context the schedule view will show
const MAX_LEAD_WEEKS: u32 = 8;

#[derive(Serialize)]
struct EarliestRow {
    email: String,
    service_packages: Vec<String>,
    household_types: Vec<String>,
    pod_type: String,
    client_limit_monthly: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    earliest_week_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    earliest_week_monday: Option<NaiveDate>,
}

#[derive(Serialize)]
struct EarliestView {
    as_of: NaiveDate,
    count: usize,
    advisers: Vec<EarliestRow>,
}

#[derive(Serialize)]
struct ScheduleRow {
    anchor: NaiveDate,
    label: String,
    clarify_count: u32,
    kickoff_count: u32,
    deal_no_clarify_count: u32,
    ooo: String,
    target: u32,
    actual: u32,
    difference: i32,
    earliest_available: bool,
}

#[derive(Serialize)]
struct ScheduleView {
    email: String,
    baseline: NaiveDate,
    initial_backlog: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    earliest_week_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    earliest_week_monday: Option<NaiveDate>,
    rows: Vec<ScheduleRow>,
}

/// Handle `GET /availability/earliest`
pub async fn handle_earliest_request(
    state: Arc<AppState>,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    let params = parse_query_params(query.unwrap_or(""));
    let filter = AdviserFilter {
        service_package: params.get("service_package").cloned(),
        household_type: params.get("household_type").cloned(),
        include_not_taking: false,
    };

    match build_earliest_view(state, filter).await {
        Ok(view) => json_response(StatusCode::OK, &view),
        Err(err) => error_response(&err),
    }
}

async fn build_earliest_view(
    state: Arc<AppState>,
    filter: AdviserFilter,
) -> Result<EarliestView, UsherError> {
    let now = today_sydney();
    let baseline = monday_of(now);
    let advisers = state.store.list_advisers(&filter).await?;
    let settings = state.store.get_settings().await?;

    let engine = Arc::new(CapacityEngine::new(
        Arc::clone(&state.store),
        EngineConfig {
            horizon_weeks: state.args.horizon_weeks,
            prestart_weeks: settings.prestart_weeks,
            lead_weeks: 0,
        },
    ));
    let selector = SelectorConfig {
        horizon_weeks: state.args.horizon_weeks,
        prestart_weeks: settings.prestart_weeks,
        ..Default::default()
    };
    let semaphore = Arc::new(Semaphore::new(VIEW_FANOUT));

    let mut join_set: JoinSet<Result<EarliestRow, UsherError>> = JoinSet::new();
    for adviser in advisers {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| UsherError::Internal("view semaphore closed".to_string()))?;

            let projection = engine.project(&adviser, baseline).await?;
            let earliest =
                earliest_available_week(&projection, now, adviser.adviser_start_date, &selector);

            Ok(adviser_row(&adviser, earliest))
        });
    }

    let mut rows = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(row)) => rows.push(row),
            Ok(Err(err)) => {
                join_set.abort_all();
                return Err(err);
            }
            Err(join_err) => {
                join_set.abort_all();
                return Err(UsherError::Internal(format!(
                    "availability task failed: {}",
                    join_err
                )));
            }
        }
    }
    rows.sort_by(|a, b| a.email.cmp(&b.email));

    Ok(EarliestView {
        as_of: now,
        count: rows.len(),
        advisers: rows,
    })
}

fn adviser_row(adviser: &Adviser, earliest: Option<NaiveDate>) -> EarliestRow {
    EarliestRow {
        email: adviser.email.clone(),
        service_packages: adviser.service_packages.iter().cloned().collect(),
        household_types: adviser.household_types.iter().cloned().collect(),
        pod_type: adviser.pod_type.label().to_string(),
        client_limit_monthly: adviser.client_limit_monthly,
        earliest_week_label: earliest.map(iso_week_label),
        earliest_week_monday: earliest,
    }
}

/// Handle `GET /availability/schedule?email=...&lead_weeks=...`
pub async fn handle_schedule_request(
    state: Arc<AppState>,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    let params = parse_query_params(query.unwrap_or(""));

    let email = match params.get("email").map(String::as_str) {
        Some(email) if !email.trim().is_empty() => email.trim().to_string(),
        _ => {
            return error_response(&UsherError::InvalidInput(
                "email query parameter is required".to_string(),
            ));
        }
    };

    match build_schedule_view(state, &email, &params).await {
        Ok(view) => json_response(StatusCode::OK, &view),
        Err(err) => error_response(&err),
    }
}

async fn build_schedule_view(
    state: Arc<AppState>,
    email: &str,
    params: &HashMap<String, String>,
) -> Result<ScheduleView, UsherError> {
    let adviser = state
        .store
        .find_adviser_by_email(email)
        .await?
        .ok_or_else(|| UsherError::NotFound(format!("no adviser with email {}", email)))?;

    let now = today_sydney();
    let baseline = monday_of(now);
    let settings = state.store.get_settings().await?;
    let lead_weeks = params
        .get("lead_weeks")
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(MAX_LEAD_WEEKS)
        .min(MAX_LEAD_WEEKS);

    let engine = CapacityEngine::new(
        Arc::clone(&state.store),
        EngineConfig {
            horizon_weeks: state.args.horizon_weeks,
            prestart_weeks: settings.prestart_weeks,
            lead_weeks,
        },
    );
    let projection = engine.project(&adviser, baseline).await?;
    let selector = SelectorConfig {
        horizon_weeks: state.args.horizon_weeks,
        prestart_weeks: settings.prestart_weeks,
        ..Default::default()
    };
    let earliest = earliest_available_week(&projection, now, adviser.adviser_start_date, &selector);

    Ok(schedule_view(&adviser.email, &projection, earliest))
}

fn schedule_view(
    email: &str,
    projection: &CapacityProjection,
    earliest: Option<NaiveDate>,
) -> ScheduleView {
    ScheduleView {
        email: email.to_string(),
        baseline: projection.baseline,
        initial_backlog: projection.initial_backlog,
        earliest_week_label: earliest.map(iso_week_label),
        earliest_week_monday: earliest,
        rows: projection
            .rows
            .iter()
            .map(|row| ScheduleRow {
                anchor: row.anchor,
                label: row.label.clone(),
                clarify_count: row.clarify_count,
                kickoff_count: row.kickoff_count,
                deal_no_clarify_count: row.deal_no_clarify_count,
                ooo: row.ooo.label(),
                target: row.target,
                actual: row.actual,
                difference: row.difference,
                earliest_available: earliest == Some(row.anchor),
            })
            .collect(),
    }
}
