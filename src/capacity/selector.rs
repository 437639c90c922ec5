//! Earliest-available-week search
//!
//! Walks the projection's fortnight blocks and returns the first Monday
//! where the adviser could actually take a new client: the backlog has
//! drained, the week is not fully out of office, and occupancy sits below
//! target. A two-week buffer from "now" always applies, and future
//! starters are held back until their prestart window opens.

use chrono::{Duration, NaiveDate};

use crate::calendar::monday_of;
use crate::capacity::engine::CapacityProjection;

/// Minimum lead time between now and any selectable week
pub const BUFFER_WEEKS: u32 = 2;

/// Selector knobs
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    pub buffer_weeks: u32,
    pub horizon_weeks: u32,
    pub prestart_weeks: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            buffer_weeks: BUFFER_WEEKS,
            horizon_weeks: 52,
            prestart_weeks: 3,
        }
    }
}

/// Find the earliest selectable Monday, or `None` when nothing inside the
/// horizon qualifies.
pub fn earliest_available_week(
    projection: &CapacityProjection,
    now: NaiveDate,
    adviser_start_date: Option<NaiveDate>,
    config: &SelectorConfig,
) -> Option<NaiveDate> {
    let now_monday = monday_of(now);

    // Buffer, clamped so the first candidate is never behind the baseline
    let mut first_candidate =
        (now_monday + Duration::weeks(config.buffer_weeks as i64)).max(projection.baseline);

    // Future starters wait for their prestart window
    if let Some(start) = adviser_start_date {
        let start_monday = monday_of(start);
        if start_monday > now_monday {
            first_candidate =
                first_candidate.max(start_monday - Duration::weeks(config.prestart_weeks as i64));
        }
    }

    let horizon_end = now_monday + Duration::weeks(config.horizon_weeks as i64);

    for block in &projection.blocks {
        // A block still carrying backlog cannot host a new client
        if block.backlog_after > 0 {
            continue;
        }
        let block_weeks = [block.start, block.start + Duration::weeks(1)];
        for anchor in block_weeks {
            if anchor < first_candidate || anchor > horizon_end {
                continue;
            }
            let Some(row) = projection.row_at(anchor) else {
                continue;
            };
            if row.ooo.is_full() {
                continue;
            }
            if row.actual < row.target {
                return Some(anchor);
            }
        }
    }

    None
}

/// Utilisation of the candidate week, for tie-breaking between advisers:
/// clarifies booked from the baseline through that week, relative to the
/// week's target.
pub fn utilisation_ratio(projection: &CapacityProjection, week: NaiveDate) -> f64 {
    let booked: u32 = projection
        .horizon_rows()
        .iter()
        .filter(|r| r.anchor <= week)
        .map(|r| r.clarify_count)
        .sum();
    let target = projection.row_at(week).map(|r| r.target).unwrap_or(0);
    booked as f64 / target.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::engine::{compute_projection, CapacityInputs, EngineConfig};
    use crate::crm::{Adviser, MeetingKind, PodType};
    use std::collections::BTreeSet;

    fn d(s: &str) -> NaiveDate {
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn adviser(limit: u32) -> Adviser {
        Adviser {
            id: "a1".to_string(),
            email: "a@example.com".to_string(),
            service_packages: BTreeSet::from(["Series A".to_string()]),
            household_types: BTreeSet::new(),
            pod_type: PodType::Team,
            client_limit_monthly: limit,
            adviser_start_date: None,
            taking_on_clients: true,
        }
    }

    const NOW: &str = "2026-01-12";

    fn engine_config() -> EngineConfig {
        EngineConfig {
            horizon_weeks: 52,
            prestart_weeks: 3,
            lead_weeks: 0,
        }
    }

    fn selector_config() -> SelectorConfig {
        SelectorConfig::default()
    }

    fn project(adviser: &Adviser, inputs: &CapacityInputs) -> crate::capacity::CapacityProjection {
        compute_projection(adviser, inputs, d(NOW), &engine_config())
    }

    #[test]
    fn test_buffer_applies_with_empty_schedule() {
        let projection = project(&adviser(8), &CapacityInputs::default());
        let week = earliest_available_week(&projection, d(NOW), None, &selector_config());
        // Two weeks out from Monday 2026-01-12
        assert_eq!(week, Some(d("2026-01-26")));
    }

    #[test]
    fn test_full_week_closure_pushes_to_next_week() {
        let projection = project(
            &adviser(8),
            &CapacityInputs {
                ooo_ranges: vec![(d("2026-01-26"), d("2026-01-30"))],
                ..Default::default()
            },
        );
        let week = earliest_available_week(&projection, d(NOW), None, &selector_config());
        assert_eq!(week, Some(d("2026-02-02")));
    }

    #[test]
    fn test_backlog_defers_selection_across_fortnights() {
        // Six queued deals against a fortnight target of 4: backlog clears
        // inside the second block, whose first week is fully carried
        let projection = project(
            &adviser(8),
            &CapacityInputs {
                deal_starts: vec![d("2026-01-05"); 6],
                ..Default::default()
            },
        );
        let week = earliest_available_week(&projection, d(NOW), None, &selector_config());
        assert_eq!(week, Some(d("2026-02-02")));
    }

    #[test]
    fn test_partial_ooo_week_still_selectable() {
        // Two leave days reduce the target but leave room
        let projection = project(
            &adviser(16),
            &CapacityInputs {
                ooo_ranges: vec![(d("2026-01-28"), d("2026-01-29"))],
                ..Default::default()
            },
        );
        let week = earliest_available_week(&projection, d(NOW), None, &selector_config());
        assert_eq!(week, Some(d("2026-01-26")));
        assert_eq!(projection.row_at(d("2026-01-26")).unwrap().target, 3);
    }

    #[test]
    fn test_future_starter_waits_for_prestart_window() {
        let mut future_starter = adviser(8);
        future_starter.adviser_start_date = Some(d("2026-03-02"));
        let projection = project(&future_starter, &CapacityInputs::default());

        let week = earliest_available_week(
            &projection,
            d(NOW),
            future_starter.adviser_start_date,
            &selector_config(),
        );
        assert_eq!(week, Some(d("2026-02-09")));
    }

    #[test]
    fn test_past_start_date_does_not_push_candidate() {
        let mut veteran = adviser(8);
        veteran.adviser_start_date = Some(d("2024-06-03"));
        let projection = project(&veteran, &CapacityInputs::default());

        let week = earliest_available_week(
            &projection,
            d(NOW),
            veteran.adviser_start_date,
            &selector_config(),
        );
        assert_eq!(week, Some(d("2026-01-26")));
    }

    #[test]
    fn test_no_availability_inside_horizon() {
        // A zero-limit adviser never has spare target
        let projection = project(&adviser(0), &CapacityInputs::default());
        let week = earliest_available_week(&projection, d(NOW), None, &selector_config());
        assert_eq!(week, None);
    }

    #[test]
    fn test_result_respects_buffer_and_horizon_bounds() {
        let projection = project(
            &adviser(8),
            &CapacityInputs {
                deal_starts: vec![d("2026-01-05"); 20],
                ..Default::default()
            },
        );
        if let Some(week) =
            earliest_available_week(&projection, d(NOW), None, &selector_config())
        {
            assert!(week >= d(NOW) + Duration::weeks(2));
            assert!(week <= d(NOW) + Duration::weeks(52));
        }
    }

    #[test]
    fn test_utilisation_ratio_counts_booked_clarifies() {
        // One clarify before the candidate week: ratio 1/2
        let projection = project(
            &adviser(8),
            &CapacityInputs {
                meetings: vec![(MeetingKind::Clarify, d("2026-01-21"))],
                ..Default::default()
            },
        );
        let week = earliest_available_week(&projection, d(NOW), None, &selector_config()).unwrap();
        assert_eq!(week, d("2026-01-26"));
        assert!((utilisation_ratio(&projection, week) - 0.5).abs() < f64::EPSILON);

        let idle = project(&adviser(8), &CapacityInputs::default());
        assert_eq!(utilisation_ratio(&idle, week), 0.0);
    }
}
