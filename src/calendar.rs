//! Pure date arithmetic over civil dates
//!
//! Weeks are identified by their Monday; a fortnight block is two
//! consecutive weeks aligned to a chosen baseline (not ISO-aligned).
//! Ranges are inclusive on both ends, and only Monday-Friday count as
//! business days.

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Australia::Sydney;

/// The ISO Monday of the week containing `d`.
pub fn monday_of(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_monday() as i64)
}

/// Signed difference in whole weeks between two Mondays.
pub fn weeks_between(m1: NaiveDate, m2: NaiveDate) -> i64 {
    (m2 - m1).num_days() / 7
}

/// ISO `YYYY-Www` label for the week containing `m`.
pub fn iso_week_label(m: NaiveDate) -> String {
    let week = m.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Parse a `YYYY-Www` label back to its Monday.
pub fn parse_week_label(label: &str) -> Option<NaiveDate> {
    let (year, week) = label.split_once("-W")?;
    let year: i32 = year.parse().ok()?;
    let week: u32 = week.parse().ok()?;
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
}

/// `count` consecutive non-overlapping two-week windows starting at `baseline`.
pub fn fortnight_blocks(baseline: NaiveDate, count: usize) -> Vec<(NaiveDate, NaiveDate)> {
    (0..count)
        .map(|i| {
            let w0 = baseline + Duration::weeks(2 * i as i64);
            (w0, w0 + Duration::weeks(1))
        })
        .collect()
}

/// Count of Mon-Fri dates in the inclusive range `[start, end]`.
pub fn business_days_in(start: NaiveDate, end: NaiveDate) -> u32 {
    if end < start {
        return 0;
    }
    let mut count = 0;
    let mut d = start;
    while d <= end {
        if d.weekday().num_days_from_monday() < 5 {
            count += 1;
        }
        d += Duration::days(1);
    }
    count
}

/// Business-day count of the intersection of `[start, end]` with the 5-day
/// week `[monday, monday+4]`.
///
/// A range starting on `monday+5` (the Saturday) contributes nothing to
/// this week; it begins the next one.
pub fn overlap_with_week(start: NaiveDate, end: NaiveDate, monday: NaiveDate) -> u32 {
    let week_end = monday + Duration::days(4);
    let lo = start.max(monday);
    let hi = end.min(week_end);
    business_days_in(lo, hi)
}

/// Today's civil date in the system timezone (Australia/Sydney).
pub fn today_sydney() -> NaiveDate {
    Utc::now().with_timezone(&Sydney).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_monday_of_is_idempotent() {
        // 2026-01-14 is a Wednesday
        let monday = monday_of(d("2026-01-14"));
        assert_eq!(monday, d("2026-01-12"));
        assert_eq!(monday_of(monday), monday);
        // Sunday still maps back to the preceding Monday
        assert_eq!(monday_of(d("2026-01-18")), d("2026-01-12"));
    }

    #[test]
    fn test_weeks_between_signed() {
        assert_eq!(weeks_between(d("2026-01-12"), d("2026-02-02")), 3);
        assert_eq!(weeks_between(d("2026-02-02"), d("2026-01-12")), -3);
        assert_eq!(weeks_between(d("2026-01-12"), d("2026-01-12")), 0);
    }

    #[test]
    fn test_week_label_round_trip() {
        let monday = monday_of(d("2026-01-12"));
        let label = iso_week_label(monday);
        assert_eq!(label, "2026-W03");
        assert_eq!(parse_week_label(&label), Some(monday));

        // Year-boundary week: 2024-12-30 is the Monday of 2025-W01
        let ny = d("2024-12-30");
        assert_eq!(iso_week_label(ny), "2025-W01");
        assert_eq!(parse_week_label("2025-W01"), Some(ny));
    }

    #[test]
    fn test_fortnight_blocks_tile_without_gap_or_overlap() {
        let baseline = d("2026-01-12");
        let blocks = fortnight_blocks(baseline, 26);
        assert_eq!(blocks.len(), 26);
        for (i, (w0, w1)) in blocks.iter().enumerate() {
            assert_eq!(*w1, *w0 + Duration::weeks(1));
            if i > 0 {
                let (_, prev_w1) = blocks[i - 1];
                assert_eq!(*w0, prev_w1 + Duration::weeks(1));
            }
        }
        // 26 blocks cover exactly 52 weeks
        let (last_w0, _) = blocks[25];
        assert_eq!(weeks_between(baseline, last_w0), 50);
    }

    #[test]
    fn test_business_days_in() {
        // Full Mon-Sun week has 5 business days
        assert_eq!(business_days_in(d("2026-01-12"), d("2026-01-18")), 5);
        // Wed only
        assert_eq!(business_days_in(d("2026-01-14"), d("2026-01-14")), 1);
        // Sat-Sun
        assert_eq!(business_days_in(d("2026-01-17"), d("2026-01-18")), 0);
        // Inverted range
        assert_eq!(business_days_in(d("2026-01-18"), d("2026-01-12")), 0);
    }

    #[test]
    fn test_overlap_with_week_full_and_weekend() {
        let monday = d("2026-01-26");
        // Range spanning the full Mon-Fri week
        assert_eq!(overlap_with_week(d("2026-01-26"), d("2026-01-30"), monday), 5);
        // A 7-day Mon-Sun closure still overlaps exactly 5 business days
        assert_eq!(overlap_with_week(d("2026-01-26"), d("2026-02-01"), monday), 5);
        // Sat-Sun range overlaps zero
        assert_eq!(overlap_with_week(d("2026-01-31"), d("2026-02-01"), monday), 0);
        // Range starting Saturday belongs to the following week
        assert_eq!(
            overlap_with_week(d("2026-01-31"), d("2026-02-04"), monday + Duration::weeks(1)),
            3
        );
    }

    #[test]
    fn test_overlap_clips_partial_ranges() {
        let monday = d("2026-01-26");
        // Wednesday single-day leave
        assert_eq!(overlap_with_week(d("2026-01-28"), d("2026-01-28"), monday), 1);
        // Thursday through next Tuesday: 2 days this week
        assert_eq!(overlap_with_week(d("2026-01-29"), d("2026-02-03"), monday), 2);
        // Disjoint range
        assert_eq!(overlap_with_week(d("2026-02-02"), d("2026-02-06"), monday), 0);
    }
}
