//! Allocator
//!
//! One deal in, one adviser out. Eligible advisers are projected
//! concurrently (bounded fan-out), ranked by earliest available week, and
//! the winner becomes the deal owner in the CRM before an idempotent audit
//! record is written.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::{iso_week_label, monday_of};
use crate::capacity::{
    earliest_available_week, utilisation_ratio, CapacityEngine, EngineConfig, SelectorConfig,
};
use crate::crm::{Adviser, CrmApi, CrmError};
use crate::store::{AdviserFilter, AllocationRecord, Store};
use crate::types::{Result, UsherError};

use super::notify::{format_tag_list, AllocationAlert, Notifier};

/// Hard cap on concurrent per-adviser projections
const MAX_FANOUT: usize = 16;

/// Allocator knobs
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    pub horizon_weeks: u32,
    /// Outer deadline for one allocation end to end
    pub outer_deadline: Duration,
    /// Deadline for the point CRM calls the allocator makes itself
    pub call_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            horizon_weeks: 52,
            outer_deadline: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Requester metadata captured into the audit record
#[derive(Debug, Clone, Default)]
pub struct RequesterMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One allocation request
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub deal_id: String,
    /// Falls back to the deal's own service package when omitted
    pub service_package: Option<String>,
    pub household_type: Option<String>,
    pub requester: RequesterMeta,
}

/// Per-adviser outcome of the capacity fan-out
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    pub adviser_id: String,
    pub adviser_email: String,
    pub service_packages: Vec<String>,
    pub household_types: Vec<String>,
    pub earliest_week: Option<NaiveDate>,
    pub earliest_week_label: Option<String>,
    /// Utilisation in the earliest week; lower wins ties
    pub ratio: f64,
}

/// Result of a successful allocation
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub record: AllocationRecord,
    pub adviser_email: String,
    pub earliest_week: NaiveDate,
    pub candidates: Vec<CandidateSummary>,
}

pub struct Allocator {
    store: Arc<Store>,
    crm: Arc<dyn CrmApi>,
    notifier: Arc<dyn Notifier>,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(
        store: Arc<Store>,
        crm: Arc<dyn CrmApi>,
        notifier: Arc<dyn Notifier>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            store,
            crm,
            notifier,
            config,
        }
    }

    /// Allocate one deal as of the civil date `now`
    pub async fn allocate(
        &self,
        request: AllocationRequest,
        now: NaiveDate,
    ) -> Result<AllocationOutcome> {
        let deadline = Instant::now() + self.config.outer_deadline;
        let baseline = monday_of(now);

        // Fetch the deal; a missing deal ends the request here
        let deal = tokio::time::timeout(self.config.call_timeout, self.crm.get_deal(&request.deal_id))
            .await
            .map_err(|_| UsherError::CrmUnavailable("deal fetch timed out".to_string()))?
            .map_err(map_crm_read_err)?
            .ok_or_else(|| UsherError::DealNotFound(request.deal_id.clone()))?;

        let service_package = request
            .service_package
            .clone()
            .or(deal.service_package.clone())
            .ok_or_else(|| {
                UsherError::InvalidInput("service_package missing from request and deal".to_string())
            })?;
        let household_type = request.household_type.clone().or(deal.household_type.clone());

        // Eligibility filter
        let filter = AdviserFilter {
            service_package: Some(service_package.clone()),
            household_type: household_type.clone(),
            include_not_taking: false,
        };
        let advisers = self.store.list_advisers(&filter).await?;
        if advisers.is_empty() {
            return Err(UsherError::NoEligibleAdvisers(format!(
                "no adviser taking on clients supports {}",
                service_package
            )));
        }

        let settings = self.store.get_settings().await?;
        let candidates = self
            .fan_out(advisers, baseline, now, settings.prestart_weeks, deadline)
            .await?;

        let best = pick_best(&candidates).ok_or_else(|| {
            let detail: Vec<String> = candidates
                .iter()
                .map(|c| format!("{}: no availability within {} weeks", c.adviser_email, self.config.horizon_weeks))
                .collect();
            UsherError::NoAvailability(detail.join("; "))
        })?;
        let Some(earliest_week) = best.earliest_week else {
            return Err(UsherError::Internal(
                "ranked candidate missing earliest week".to_string(),
            ));
        };

        info!(
            deal_id = %request.deal_id,
            adviser = %best.adviser_email,
            week = %iso_week_label(earliest_week),
            "Assigning deal"
        );

        // CRM owner update; the client has already retried transient errors
        if Instant::now() >= deadline {
            return Err(UsherError::StoreUnavailable(
                "allocation deadline exceeded before owner update".to_string(),
            ));
        }
        self.crm
            .set_deal_owner(&request.deal_id, &best.adviser_id)
            .await
            .map_err(|err| match err {
                CrmError::Transient(msg) => UsherError::CrmUnavailable(msg),
                CrmError::Permanent(msg) | CrmError::NotFound(msg) => {
                    UsherError::CrmUpdateFailed(msg)
                }
            })?;

        // Audit record, idempotent per deal. Failing here leaves the CRM
        // updated with no record; flag it loudly so reconciliation can catch up.
        let record = AllocationRecord {
            id: Uuid::new_v4().to_string(),
            deal_id: request.deal_id.clone(),
            adviser_id: best.adviser_id.clone(),
            adviser_email: best.adviser_email.clone(),
            service_package: service_package.clone(),
            household_type: household_type.clone(),
            earliest_week_anchor: earliest_week,
            decided_at: Utc::now(),
            requester_ip: request.requester.ip.clone(),
            requester_user_agent: request.requester.user_agent.clone(),
            extra: BTreeMap::new(),
        };
        let record = match self.store.put_allocation_record(record).await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(
                    deal_id = %request.deal_id,
                    adviser_id = %best.adviser_id,
                    "INCONSISTENCY: CRM owner updated but allocation record write failed: {}",
                    err
                );
                return Err(UsherError::StoreUnavailable(err.to_string()));
            }
        };

        // Notification hook: failures are logged, never fatal
        let alert = AllocationAlert {
            deal_id: request.deal_id.clone(),
            service_package,
            household_type,
            selected: best.clone(),
            candidates: candidates.clone(),
        };
        if let Err(err) = self.notifier.notify(&alert).await {
            warn!(deal_id = %request.deal_id, "Allocation alert failed: {}", err);
        }

        Ok(AllocationOutcome {
            adviser_email: best.adviser_email.clone(),
            earliest_week,
            record,
            candidates,
        })
    }

    /// Project every eligible adviser concurrently under the outer deadline
    async fn fan_out(
        &self,
        advisers: Vec<Adviser>,
        baseline: NaiveDate,
        now: NaiveDate,
        prestart_weeks: u32,
        deadline: Instant,
    ) -> Result<Vec<CandidateSummary>> {
        let engine = Arc::new(CapacityEngine::new(
            Arc::clone(&self.store),
            EngineConfig {
                horizon_weeks: self.config.horizon_weeks,
                prestart_weeks,
                lead_weeks: 0,
            },
        ));
        let selector = SelectorConfig {
            horizon_weeks: self.config.horizon_weeks,
            prestart_weeks,
            ..Default::default()
        };
        let semaphore = Arc::new(Semaphore::new(MAX_FANOUT.min(advisers.len().max(1))));

        let mut join_set: JoinSet<Result<CandidateSummary>> = JoinSet::new();
        for adviser in advisers {
            let engine = Arc::clone(&engine);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| UsherError::Internal("fan-out semaphore closed".to_string()))?;

                let projection = engine.project(&adviser, baseline).await?;
                let earliest =
                    earliest_available_week(&projection, now, adviser.adviser_start_date, &selector);
                let ratio = earliest
                    .map(|week| utilisation_ratio(&projection, week))
                    .unwrap_or(f64::INFINITY);

                Ok(CandidateSummary {
                    adviser_id: adviser.id.clone(),
                    adviser_email: adviser.email.clone(),
                    service_packages: format_tag_list(
                        &adviser.service_packages.iter().cloned().collect::<Vec<_>>().join(";"),
                    ),
                    household_types: format_tag_list(
                        &adviser.household_types.iter().cloned().collect::<Vec<_>>().join(";"),
                    ),
                    earliest_week: earliest,
                    earliest_week_label: earliest.map(iso_week_label),
                    ratio,
                })
            });
        }

        let mut candidates = Vec::new();
        loop {
            let joined = match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Deadline expired: cancel the in-flight projections.
                    // Nothing has been written yet.
                    join_set.abort_all();
                    return Err(UsherError::StoreUnavailable(
                        "allocation deadline exceeded during capacity fan-out".to_string(),
                    ));
                }
            };
            match joined {
                None => break,
                Some(Ok(Ok(candidate))) => candidates.push(candidate),
                Some(Ok(Err(err))) => {
                    join_set.abort_all();
                    return Err(err);
                }
                Some(Err(join_err)) => {
                    join_set.abort_all();
                    return Err(UsherError::Internal(format!(
                        "capacity fan-out task failed: {}",
                        join_err
                    )));
                }
            }
        }

        // Deterministic presentation order regardless of completion order
        candidates.sort_by(|a, b| a.adviser_email.cmp(&b.adviser_email));
        Ok(candidates)
    }
}

fn map_crm_read_err(err: CrmError) -> UsherError {
    match err {
        CrmError::NotFound(msg) => UsherError::DealNotFound(msg),
        CrmError::Transient(msg) | CrmError::Permanent(msg) => UsherError::CrmUnavailable(msg),
    }
}

/// Rank candidates: earliest week, then lowest utilisation ratio, then
/// email. The final key makes selection a fixed total order, so repeating
/// an allocation over unchanged inputs picks the same adviser.
pub fn pick_best(candidates: &[CandidateSummary]) -> Option<&CandidateSummary> {
    candidates
        .iter()
        .filter(|c| c.earliest_week.is_some())
        .min_by(|a, b| {
            a.earliest_week
                .cmp(&b.earliest_week)
                .then_with(|| a.ratio.partial_cmp(&b.ratio).unwrap_or(Ordering::Equal))
                .then_with(|| a.adviser_email.cmp(&b.adviser_email))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(email: &str, week: Option<&str>, ratio: f64) -> CandidateSummary {
        CandidateSummary {
            adviser_id: email.to_string(),
            adviser_email: email.to_string(),
            service_packages: Vec::new(),
            household_types: Vec::new(),
            earliest_week: week.map(|w| NaiveDate::parse_from_str(w, "%Y-%m-%d").unwrap()),
            earliest_week_label: None,
            ratio,
        }
    }

    #[test]
    fn test_pick_best_prefers_earliest_week() {
        let candidates = vec![
            candidate("a@example.com", Some("2026-02-02"), 0.0),
            candidate("b@example.com", Some("2026-01-26"), 0.9),
        ];
        assert_eq!(pick_best(&candidates).unwrap().adviser_email, "b@example.com");
    }

    #[test]
    fn test_pick_best_breaks_week_tie_by_ratio() {
        let candidates = vec![
            candidate("a@example.com", Some("2026-01-26"), 0.5),
            candidate("b@example.com", Some("2026-01-26"), 0.0),
        ];
        assert_eq!(pick_best(&candidates).unwrap().adviser_email, "b@example.com");
    }

    #[test]
    fn test_pick_best_final_tie_break_is_email() {
        let candidates = vec![
            candidate("b@example.com", Some("2026-01-26"), 0.5),
            candidate("a@example.com", Some("2026-01-26"), 0.5),
        ];
        assert_eq!(pick_best(&candidates).unwrap().adviser_email, "a@example.com");
    }

    #[test]
    fn test_pick_best_skips_unavailable() {
        let candidates = vec![
            candidate("a@example.com", None, f64::INFINITY),
            candidate("b@example.com", Some("2026-03-02"), 1.0),
        ];
        assert_eq!(pick_best(&candidates).unwrap().adviser_email, "b@example.com");

        let none = vec![candidate("a@example.com", None, f64::INFINITY)];
        assert!(pick_best(&none).is_none());
    }
}
