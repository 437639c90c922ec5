//! Capacity engine
//!
//! Folds an adviser's booked onboarding meetings, their backlog of deals
//! still waiting on a first Clarify, and every source of out-of-office time
//! into one ordered sequence of week rows: occupancy against a weekly
//! target, projected a year ahead.
//!
//! Backlog is consumed at fortnight pace: each two-week block (aligned to
//! the baseline, not to ISO fortnights) drains as much backlog as its spare
//! target allows, and the drained amount lands in the block's weeks as
//! carry-forward occupancy.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::calendar::{fortnight_blocks, iso_week_label, monday_of};
use crate::crm::{Adviser, MeetingKind};
use crate::store::{CapacityOverride, Store};
use crate::types::{Result, StoreError, StoreErrorKind};

/// How many weeks of meetings before the baseline are fetched for display
const MEETING_LOOKBACK_WEEKS: i64 = 8;

/// Engine knobs
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Weeks projected forward from the baseline
    pub horizon_weeks: u32,
    /// Weeks before their start date a future starter may already take work
    pub prestart_weeks: u32,
    /// Informational weeks emitted before the baseline (display only)
    pub lead_weeks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_weeks: 52,
            prestart_weeks: 3,
            lead_weeks: 0,
        }
    }
}

/// Out-of-office state of one week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OooState {
    None,
    /// 1-4 business days covered
    Partial(u8),
    /// All 5 business days covered
    Full,
}

impl OooState {
    pub fn from_business_days(days: u32) -> Self {
        match days {
            0 => Self::None,
            5.. => Self::Full,
            n => Self::Partial(n as u8),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Operator-table label
    pub fn label(&self) -> String {
        match self {
            Self::None => "No".to_string(),
            Self::Partial(n) => format!("Partial: {}", n),
            Self::Full => "Full".to_string(),
        }
    }
}

/// One week of an adviser's capacity table
#[derive(Debug, Clone, Serialize)]
pub struct WeekRow {
    /// Monday of the week
    pub anchor: NaiveDate,
    /// ISO `YYYY-Www`
    pub label: String,
    pub clarify_count: u32,
    /// Reported for table parity; does not count toward occupancy
    pub kickoff_count: u32,
    pub deal_no_clarify_count: u32,
    pub ooo: OooState,
    pub target: u32,
    /// `clarify_count` plus backlog carry-forward
    pub actual: u32,
    /// `actual - target`; negative means spare capacity
    pub difference: i32,
}

/// Backlog accounting for one fortnight block
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FortnightSummary {
    /// Monday of the block's first week
    pub start: NaiveDate,
    /// New deals whose agreement start fell inside the block
    pub added: u32,
    /// Backlog consumed by the block's spare target
    pub drained: u32,
    /// Backlog still queued after this block
    pub backlog_after: u32,
}

/// Full projection for one adviser from a baseline Monday
#[derive(Debug, Clone, Serialize)]
pub struct CapacityProjection {
    pub baseline: NaiveDate,
    /// Deals without a Clarify queued before the baseline
    pub initial_backlog: u32,
    /// Week rows in strict ascending order; the first `lead` rows (if any)
    /// precede the baseline and are informational only
    pub rows: Vec<WeekRow>,
    /// Index of the baseline week within `rows`
    pub baseline_index: usize,
    pub blocks: Vec<FortnightSummary>,
}

impl CapacityProjection {
    /// Rows from the baseline forward
    pub fn horizon_rows(&self) -> &[WeekRow] {
        &self.rows[self.baseline_index..]
    }

    pub fn row_at(&self, anchor: NaiveDate) -> Option<&WeekRow> {
        self.rows.iter().find(|r| r.anchor == anchor)
    }
}

/// Raw per-adviser inputs, already scoped to the projection window
#[derive(Debug, Clone, Default)]
pub struct CapacityInputs {
    /// (meeting kind, start date)
    pub meetings: Vec<(MeetingKind, NaiveDate)>,
    /// Agreement start dates of open deals without a Clarify; deals with no
    /// agreement date never enter the backlog
    pub deal_starts: Vec<NaiveDate>,
    /// Inclusive OOO date ranges: approved leave plus global and
    /// adviser-scoped closures
    pub ooo_ranges: Vec<(NaiveDate, NaiveDate)>,
    /// Capacity overrides for this adviser, any order
    pub overrides: Vec<CapacityOverride>,
}

fn ceil_div(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

/// Base weekly target from a monthly client limit: the limit maps to a
/// fortnight target of `ceil(L/2)`, spread over the fortnight's two weeks.
fn base_weekly_target(monthly_limit: u32) -> u32 {
    ceil_div(ceil_div(monthly_limit, 2), 2)
}

/// Effective monthly limit for a week: the override with the greatest
/// effective date at or before the week wins, else the profile limit.
fn effective_limit(adviser: &Adviser, overrides: &[CapacityOverride], week: NaiveDate) -> u32 {
    overrides
        .iter()
        .filter(|o| o.effective_date <= week)
        .max_by_key(|o| o.effective_date)
        .map(|o| o.client_limit_monthly)
        .unwrap_or(adviser.client_limit_monthly)
}

/// Business days of the week `[monday, monday+4]` covered by the union of
/// the given inclusive ranges
fn ooo_days_in_week(ranges: &[(NaiveDate, NaiveDate)], monday: NaiveDate) -> u32 {
    let mut covered = [false; 5];
    for &(start, end) in ranges {
        for (i, slot) in covered.iter_mut().enumerate() {
            let day = monday + Duration::days(i as i64);
            if day >= start && day <= end {
                *slot = true;
            }
        }
    }
    covered.iter().filter(|c| **c).count() as u32
}

/// Compute the full projection. Pure: all I/O happens in the caller.
pub fn compute_projection(
    adviser: &Adviser,
    inputs: &CapacityInputs,
    baseline: NaiveDate,
    config: &EngineConfig,
) -> CapacityProjection {
    let baseline = monday_of(baseline);
    let lead = config.lead_weeks as i64;
    let horizon = config.horizon_weeks.max(1);
    let first_anchor = baseline - Duration::weeks(lead);
    let total_weeks = config.lead_weeks + horizon;

    let prestart_cutoff = adviser
        .adviser_start_date
        .map(|start| monday_of(start) - Duration::weeks(config.prestart_weeks as i64));

    let mut rows: Vec<WeekRow> = (0..total_weeks as i64)
        .map(|i| {
            let anchor = first_anchor + Duration::weeks(i);
            let week_end = anchor + Duration::days(6);

            let clarify_count = inputs
                .meetings
                .iter()
                .filter(|(kind, date)| *kind == MeetingKind::Clarify && monday_of(*date) == anchor)
                .count() as u32;
            let kickoff_count = inputs
                .meetings
                .iter()
                .filter(|(kind, date)| *kind == MeetingKind::KickOff && monday_of(*date) == anchor)
                .count() as u32;
            let deal_no_clarify_count = inputs
                .deal_starts
                .iter()
                .filter(|d| **d >= anchor && **d <= week_end)
                .count() as u32;

            let ooo = OooState::from_business_days(ooo_days_in_week(&inputs.ooo_ranges, anchor));

            let limit = effective_limit(adviser, &inputs.overrides, anchor);
            let base = base_weekly_target(limit);
            let target = if prestart_cutoff.map(|cutoff| anchor < cutoff).unwrap_or(false) {
                0
            } else {
                match ooo {
                    OooState::Full => 0,
                    OooState::Partial(n) => ceil_div(base * (5 - n as u32), 5),
                    OooState::None => base,
                }
            };

            WeekRow {
                anchor,
                label: iso_week_label(anchor),
                clarify_count,
                kickoff_count,
                deal_no_clarify_count,
                ooo,
                target,
                actual: clarify_count,
                difference: clarify_count as i32 - target as i32,
            }
        })
        .collect();

    let baseline_index = config.lead_weeks as usize;

    // Fortnight-paced backlog consumption, starting at the baseline.
    // Pre-baseline rows never participate.
    let initial_backlog = inputs.deal_starts.iter().filter(|d| **d < baseline).count() as u32;
    let mut backlog = initial_backlog;
    let block_count = (horizon as usize).div_ceil(2);
    let mut blocks = Vec::with_capacity(block_count);

    for (w0_anchor, w1_anchor) in fortnight_blocks(baseline, block_count) {
        let w0 = baseline_index + ((w0_anchor - baseline).num_days() / 7) as usize;
        let w1 = w0 + 1;
        let has_w1 = w1 < rows.len() && rows[w1].anchor == w1_anchor;

        let added = rows[w0].deal_no_clarify_count
            + if has_w1 { rows[w1].deal_no_clarify_count } else { 0 };
        backlog += added;

        let fortnight_target = rows[w0].target + if has_w1 { rows[w1].target } else { 0 };
        let fortnight_clarifies =
            rows[w0].clarify_count + if has_w1 { rows[w1].clarify_count } else { 0 };
        let spare = fortnight_target.saturating_sub(fortnight_clarifies);
        let drained = backlog.min(spare);
        backlog -= drained;

        // Distribute the drained backlog across the block in week order
        let carry_first = drained.min(rows[w0].target);
        rows[w0].actual += carry_first;
        rows[w0].difference = rows[w0].actual as i32 - rows[w0].target as i32;
        if has_w1 {
            rows[w1].actual += drained - carry_first;
            rows[w1].difference = rows[w1].actual as i32 - rows[w1].target as i32;
        }

        blocks.push(FortnightSummary {
            start: w0_anchor,
            added,
            drained,
            backlog_after: backlog,
        });
    }

    CapacityProjection {
        baseline,
        initial_backlog,
        rows,
        baseline_index,
        blocks,
    }
}

/// Store-fed wrapper around [`compute_projection`]
pub struct CapacityEngine {
    store: Arc<Store>,
    config: EngineConfig,
}

impl CapacityEngine {
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Gather one adviser's inputs and project from `baseline`
    pub async fn project(
        &self,
        adviser: &Adviser,
        baseline: NaiveDate,
    ) -> Result<CapacityProjection> {
        let baseline = monday_of(baseline);
        let window_start = baseline - Duration::weeks(MEETING_LOOKBACK_WEEKS.max(self.config.lead_weeks as i64));
        let window_end = baseline + Duration::weeks(self.config.horizon_weeks as i64);

        let meetings = self
            .store
            .get_meetings(&adviser.id, window_start, window_end)
            .await?;
        let deals = self
            .store
            .get_deals_without_clarify(&adviser.id, window_end)
            .await?;
        let leave = optional(
            self.store
                .get_leave_for_adviser(&adviser.email, window_start, window_end)
                .await,
        )?;
        let mut closures = optional(
            self.store
                .get_global_closures(window_start, window_end)
                .await,
        )?;
        closures.extend(optional(
            self.store
                .get_adviser_closures(&adviser.email, window_start, window_end)
                .await,
        )?);
        let overrides = optional(self.store.list_capacity_overrides(Some(&adviser.email)).await)?;

        let inputs = CapacityInputs {
            meetings: meetings.into_iter().map(|m| (m.kind, m.start_date)).collect(),
            deal_starts: deals
                .into_iter()
                .filter_map(|d| d.agreement_start_date)
                .collect(),
            ooo_ranges: leave
                .into_iter()
                .map(|l| (l.start_date, l.end_date))
                .chain(closures.into_iter().map(|c| (c.start_date, c.end_date)))
                .collect(),
            overrides,
        };

        Ok(compute_projection(adviser, &inputs, baseline, &self.config))
    }
}

/// Absent-but-optional reads come back empty rather than failing the run
fn optional<T>(result: std::result::Result<Vec<T>, StoreError>) -> Result<Vec<T>> {
    match result {
        Ok(items) => Ok(items),
        Err(err) if err.kind == StoreErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}
