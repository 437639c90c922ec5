//! Capacity projection and earliest-week scenario tests
//!
//! Exercises the engine and selector together over the operator scenarios
//! the capacity tables were designed around: buffers, full and partial
//! out-of-office weeks, fortnight-paced backlog draining and future
//! starters. All dates pivot on Monday 2026-01-12 (ISO week 2026-W03).

use std::collections::BTreeSet;

use chrono::NaiveDate;
use usher::calendar::{iso_week_label, monday_of};
use usher::capacity::{
    compute_projection, earliest_available_week, utilisation_ratio, CapacityInputs, EngineConfig,
    OooState, SelectorConfig,
};
use usher::crm::{Adviser, MeetingKind, PodType};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

const NOW: &str = "2026-01-12";

fn adviser(email: &str, limit: u32) -> Adviser {
    Adviser {
        id: format!("id-{}", email),
        email: email.to_string(),
        service_packages: BTreeSet::from(["Series A".to_string()]),
        household_types: BTreeSet::new(),
        pod_type: PodType::Team,
        client_limit_monthly: limit,
        adviser_start_date: None,
        taking_on_clients: true,
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        horizon_weeks: 52,
        prestart_weeks: 3,
        lead_weeks: 0,
    }
}

fn selector_config() -> SelectorConfig {
    SelectorConfig {
        buffer_weeks: 2,
        horizon_weeks: 52,
        prestart_weeks: 3,
    }
}

fn earliest(adviser: &Adviser, inputs: &CapacityInputs) -> Option<NaiveDate> {
    let projection = compute_projection(adviser, inputs, d(NOW), &engine_config());
    earliest_available_week(&projection, d(NOW), adviser.adviser_start_date, &selector_config())
}

// ============================================================================
// Happy path and tie-break inputs
// ============================================================================

#[test]
fn test_empty_schedule_respects_two_week_buffer() {
    // Both advisers on limit 8 (weekly target 2), no load at all:
    // earliest week is now + buffer = 2026-01-26 (W05)
    let a = adviser("a@example.com", 8);
    let b = adviser("b@example.com", 8);

    let a_inputs = CapacityInputs {
        meetings: vec![(MeetingKind::Clarify, d("2026-01-21"))],
        ..Default::default()
    };
    let b_inputs = CapacityInputs::default();

    assert_eq!(earliest(&a, &a_inputs), Some(d("2026-01-26")));
    assert_eq!(earliest(&b, &b_inputs), Some(d("2026-01-26")));
    assert_eq!(iso_week_label(d("2026-01-26")), "2026-W05");

    // The tie would go to B: one booked clarify puts A at ratio 0.5
    let a_projection = compute_projection(&a, &a_inputs, d(NOW), &engine_config());
    let b_projection = compute_projection(&b, &b_inputs, d(NOW), &engine_config());
    let ratio_a = utilisation_ratio(&a_projection, d("2026-01-26"));
    let ratio_b = utilisation_ratio(&b_projection, d("2026-01-26"));
    assert!((ratio_a - 0.5).abs() < f64::EPSILON);
    assert_eq!(ratio_b, 0.0);
}

// ============================================================================
// Out-of-office handling
// ============================================================================

#[test]
fn test_full_week_office_closure_is_skipped() {
    // Mon-Fri closure over W05 zeroes the target and pushes selection to W06
    let c = adviser("c@example.com", 8);
    let inputs = CapacityInputs {
        ooo_ranges: vec![(d("2026-01-26"), d("2026-01-30"))],
        ..Default::default()
    };

    let projection = compute_projection(&c, &inputs, d(NOW), &engine_config());
    let row = projection.row_at(d("2026-01-26")).unwrap();
    assert_eq!(row.ooo, OooState::Full);
    assert_eq!(row.target, 0);

    assert_eq!(earliest(&c, &inputs), Some(d("2026-02-02")));
}

#[test]
fn test_partial_week_leave_scales_target() {
    // Base weekly target 4; two leave days in W05 give ceil(4 * 3/5) = 3,
    // and the week stays selectable
    let e = adviser("e@example.com", 16);
    let inputs = CapacityInputs {
        ooo_ranges: vec![(d("2026-01-28"), d("2026-01-29"))],
        ..Default::default()
    };

    let projection = compute_projection(&e, &inputs, d(NOW), &engine_config());
    let row = projection.row_at(d("2026-01-26")).unwrap();
    assert_eq!(row.ooo, OooState::Partial(2));
    assert_eq!(row.target, 3);

    assert_eq!(earliest(&e, &inputs), Some(d("2026-01-26")));
}

#[test]
fn test_weekend_only_closure_changes_nothing() {
    // Sat-Sun closures cover zero business days
    let c = adviser("c@example.com", 8);
    let inputs = CapacityInputs {
        ooo_ranges: vec![(d("2026-01-31"), d("2026-02-01"))],
        ..Default::default()
    };
    let projection = compute_projection(&c, &inputs, d(NOW), &engine_config());
    assert_eq!(projection.row_at(d("2026-01-26")).unwrap().ooo, OooState::None);
    assert_eq!(projection.row_at(d("2026-02-02")).unwrap().ooo, OooState::None);
}

// ============================================================================
// Backlog draining
// ============================================================================

#[test]
fn test_backlog_drains_across_two_fortnights() {
    // Six deals queued before the baseline against a fortnight target of 4:
    // the first block drains 4, the second the remaining 2, and the first
    // open slot is W06
    let adviser_d = adviser("d@example.com", 8);
    let inputs = CapacityInputs {
        deal_starts: vec![d("2026-01-05"); 6],
        ..Default::default()
    };

    let projection = compute_projection(&adviser_d, &inputs, d(NOW), &engine_config());
    assert_eq!(projection.initial_backlog, 6);
    assert_eq!(projection.blocks[0].drained, 4);
    assert_eq!(projection.blocks[0].backlog_after, 2);
    assert_eq!(projection.blocks[1].drained, 2);
    assert_eq!(projection.blocks[1].backlog_after, 0);

    assert_eq!(earliest(&adviser_d, &inputs), Some(d("2026-02-02")));
}

#[test]
fn test_in_horizon_deals_join_their_block() {
    // Deals landing inside a block add to its backlog before draining
    let adviser_d = adviser("d@example.com", 8);
    let inputs = CapacityInputs {
        deal_starts: vec![d("2026-01-13"), d("2026-01-20"), d("2026-01-27")],
        ..Default::default()
    };

    let projection = compute_projection(&adviser_d, &inputs, d(NOW), &engine_config());
    assert_eq!(projection.initial_backlog, 0);
    assert_eq!(projection.blocks[0].added, 2);
    assert_eq!(projection.blocks[0].drained, 2);
    assert_eq!(projection.blocks[1].added, 1);
    assert_eq!(projection.blocks[1].backlog_after, 0);
}

#[test]
fn test_backlog_conservation_over_horizon() {
    // Total drained never exceeds what was ever queued, and the running
    // backlog never goes negative (it is unsigned, so the checks are on
    // the block ledger adding up)
    let adviser_d = adviser("d@example.com", 6);
    let inputs = CapacityInputs {
        deal_starts: [
            vec![d("2026-01-02"); 5],
            vec![d("2026-02-10"); 3],
            vec![d("2026-06-17"); 4],
        ]
        .concat(),
        meetings: vec![
            (MeetingKind::Clarify, d("2026-01-14")),
            (MeetingKind::Clarify, d("2026-02-04")),
        ],
        ..Default::default()
    };

    let projection = compute_projection(&adviser_d, &inputs, d(NOW), &engine_config());
    let added: u32 = projection.blocks.iter().map(|b| b.added).sum();
    let drained: u32 = projection.blocks.iter().map(|b| b.drained).sum();
    assert!(drained <= projection.initial_backlog + added);

    let mut running = projection.initial_backlog;
    for block in &projection.blocks {
        running += block.added;
        assert!(block.drained <= running);
        running -= block.drained;
        assert_eq!(block.backlog_after, running);
    }
}

// ============================================================================
// Future starters
// ============================================================================

#[test]
fn test_future_starter_prestart_window() {
    // Start date 2026-03-02 with a three-week prestart window: first
    // selectable week is 2026-02-09 (W07), despite zero load
    let mut f = adviser("f@example.com", 8);
    f.adviser_start_date = Some(d("2026-03-02"));

    let week = earliest(&f, &CapacityInputs::default());
    assert_eq!(week, Some(d("2026-02-09")));
    assert_eq!(iso_week_label(d("2026-02-09")), "2026-W07");
}

// ============================================================================
// Invariant sweeps
// ============================================================================

#[test]
fn test_row_invariants_over_mixed_inputs() {
    let mut advisers = vec![
        adviser("a@example.com", 8),
        adviser("b@example.com", 0),
        adviser("c@example.com", 13),
    ];
    advisers[2].adviser_start_date = Some(d("2026-04-06"));

    let inputs = CapacityInputs {
        meetings: vec![
            (MeetingKind::Clarify, d("2026-01-13")),
            (MeetingKind::Clarify, d("2026-02-25")),
            (MeetingKind::KickOff, d("2026-02-25")),
        ],
        deal_starts: vec![d("2026-01-02"), d("2026-03-03")],
        ooo_ranges: vec![
            (d("2026-01-26"), d("2026-01-30")),
            (d("2026-03-11"), d("2026-03-11")),
        ],
        ..Default::default()
    };

    for adviser in &advisers {
        let projection = compute_projection(adviser, &inputs, d(NOW), &engine_config());
        assert_eq!(projection.horizon_rows().len(), 52);

        for row in &projection.rows {
            // Counts and targets never go negative (enforced by type), and
            // full OOO always zeroes the target
            if row.ooo == OooState::Full {
                assert_eq!(row.target, 0, "full OOO week {} must have zero target", row.label);
            }
            assert_eq!(row.difference, row.actual as i32 - row.target as i32);
            assert!(row.actual >= row.clarify_count);
        }

        // Selection bounds: never inside the buffer, never past the horizon
        if let Some(week) = earliest_available_week(
            &projection,
            d(NOW),
            adviser.adviser_start_date,
            &selector_config(),
        ) {
            assert!(week >= monday_of(d(NOW)) + chrono::Duration::weeks(2));
            assert!(week <= monday_of(d(NOW)) + chrono::Duration::weeks(52));
            assert_eq!(week, monday_of(week));
        }
    }
}

#[test]
fn test_zero_limit_has_no_availability() {
    let b = adviser("b@example.com", 0);
    assert_eq!(earliest(&b, &CapacityInputs::default()), None);
}
