//! 5-field cron recurrence expressions.
//!
//! Grammar per field (`minute hour day-of-month month day-of-week`):
//! `*`, exact value, `A-B` ranges, comma lists, and `*/S` / `A/S` /
//! `A-B/S` steps. Day-of-week follows cron convention (0 = Sunday).
//!
//! The module is timezone-neutral: it matches against [`NaiveDateTime`]
//! and callers decide which clock those instants come from.

use crate::error::{Result, SchedulerError};
use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use std::collections::BTreeSet;

/// Upper bound on the minute-by-minute next-occurrence scan: one leap year.
/// Expressions with no occurrence inside a year fail fast instead of
/// hanging.
const MAX_SEARCH_MINUTES: u32 = 366 * 24 * 60;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days: BTreeSet<u32>,
    months: BTreeSet<u32>,
    weekdays: BTreeSet<u32>,
}

impl CronExpr {
    /// Parse a 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::Cron(format!(
                "expected 5 fields, got {} in `{expr}`",
                fields.len()
            )));
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            weekdays: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Returns `true` when all five fields match the given instant.
    pub fn matches(&self, t: NaiveDateTime) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days.contains(&t.day())
            && self.months.contains(&t.month())
            && self.weekdays.contains(&t.weekday().num_days_from_sunday())
    }

    /// First matching instant strictly after `after`, scanning
    /// minute-by-minute with seconds zeroed.
    pub fn next_after(&self, after: NaiveDateTime) -> Result<NaiveDateTime> {
        let floor = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after);
        let mut candidate = floor + Duration::minutes(1);

        for _ in 0..MAX_SEARCH_MINUTES {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }

        Err(SchedulerError::NoNextOccurrence)
    }
}

/// Parse one cron field into its set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| {
                    SchedulerError::Cron(format!("invalid step `{s}` in `{part}`"))
                })?;
                if step == 0 {
                    return Err(SchedulerError::Cron(format!("zero step in `{part}`")));
                }
                (r, Some(step))
            }
            None => (part, None),
        };

        let (start, mut end) = parse_range(range_part, min, max)?;
        // A stepped bare value (`N/S`) anchors at N and runs to the field
        // maximum; without a step it stays an exact match.
        if step.is_some() && range_part != "*" && !range_part.contains('-') {
            end = max;
        }
        let step = step.unwrap_or(1);
        if start < min || end > max || start > end {
            return Err(SchedulerError::Cron(format!(
                "`{part}` out of range {min}-{max}"
            )));
        }

        let mut v = start;
        while v <= end {
            values.insert(v);
            v += step;
        }
    }

    if values.is_empty() {
        return Err(SchedulerError::Cron(format!("empty field `{field}`")));
    }
    Ok(values)
}

/// Resolve `*`, `N`, or `A-B` into an inclusive bounds pair.
fn parse_range(range: &str, min: u32, max: u32) -> Result<(u32, u32)> {
    if range == "*" {
        return Ok((min, max));
    }

    if let Some((a, b)) = range.split_once('-') {
        let start: u32 = a
            .parse()
            .map_err(|_| SchedulerError::Cron(format!("invalid range start `{a}`")))?;
        let end: u32 = b
            .parse()
            .map_err(|_| SchedulerError::Cron(format!("invalid range end `{b}`")))?;
        return Ok((start, end));
    }

    let exact: u32 = range
        .parse()
        .map_err(|_| SchedulerError::Cron(format!("invalid value `{range}`")))?;
    Ok((exact, exact))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn wildcard_matches_everything() {
        let cron = CronExpr::parse("* * * * *").unwrap();
        assert!(cron.matches(at(2026, 1, 1, 0, 0)));
        assert!(cron.matches(at(2026, 12, 31, 23, 59)));
    }

    #[test]
    fn daily_at_three_matches_only_0300() {
        let cron = CronExpr::parse("0 3 * * *").unwrap();
        assert!(cron.matches(at(2026, 2, 10, 3, 0)));
        assert!(!cron.matches(at(2026, 2, 10, 3, 1)));
        assert!(!cron.matches(at(2026, 2, 10, 4, 0)));
        assert!(!cron.matches(at(2026, 2, 10, 0, 3)));
    }

    #[test]
    fn next_after_before_three_is_same_day() {
        let cron = CronExpr::parse("0 3 * * *").unwrap();
        let next = cron.next_after(at(2026, 2, 10, 1, 30)).unwrap();
        assert_eq!(next, at(2026, 2, 10, 3, 0));
    }

    #[test]
    fn next_after_past_three_is_next_day() {
        let cron = CronExpr::parse("0 3 * * *").unwrap();
        let next = cron.next_after(at(2026, 2, 10, 3, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 11, 3, 0));
    }

    #[test]
    fn next_after_zeroes_seconds() {
        let cron = CronExpr::parse("* * * * *").unwrap();
        let t = NaiveDate::from_ymd_opt(2026, 2, 10)
            .unwrap()
            .and_hms_opt(12, 5, 42)
            .unwrap();
        assert_eq!(cron.next_after(t).unwrap(), at(2026, 2, 10, 12, 6));
    }

    #[test]
    fn weekday_range_excludes_weekend() {
        // 2026-02-09 is a Monday, 2026-02-14 a Saturday.
        let cron = CronExpr::parse("30 14 * * 1-5").unwrap();
        assert!(cron.matches(at(2026, 2, 9, 14, 30)));
        assert!(cron.matches(at(2026, 2, 13, 14, 30)));
        assert!(!cron.matches(at(2026, 2, 14, 14, 30)));
        assert!(!cron.matches(at(2026, 2, 15, 14, 30)));
    }

    #[test]
    fn sunday_is_zero() {
        // 2026-02-15 is a Sunday.
        let cron = CronExpr::parse("0 9 * * 0").unwrap();
        assert!(cron.matches(at(2026, 2, 15, 9, 0)));
        assert!(!cron.matches(at(2026, 2, 16, 9, 0)));
    }

    #[test]
    fn explicit_list_field() {
        let cron = CronExpr::parse("0,15,30,45 * * * *").unwrap();
        assert!(cron.matches(at(2026, 2, 10, 8, 15)));
        assert!(!cron.matches(at(2026, 2, 10, 8, 20)));
    }

    #[test]
    fn step_field_from_wildcard() {
        let cron = CronExpr::parse("*/20 * * * *").unwrap();
        assert!(cron.matches(at(2026, 2, 10, 8, 0)));
        assert!(cron.matches(at(2026, 2, 10, 8, 40)));
        assert!(!cron.matches(at(2026, 2, 10, 8, 30)));
    }

    #[test]
    fn anchored_step_runs_to_field_max() {
        // `10/15` on minutes: 10, 25, 40, 55.
        let cron = CronExpr::parse("10/15 * * * *").unwrap();
        assert!(cron.matches(at(2026, 2, 10, 8, 10)));
        assert!(cron.matches(at(2026, 2, 10, 8, 25)));
        assert!(cron.matches(at(2026, 2, 10, 8, 40)));
        assert!(cron.matches(at(2026, 2, 10, 8, 55)));
        assert!(!cron.matches(at(2026, 2, 10, 8, 0)));
        assert!(!cron.matches(at(2026, 2, 10, 8, 11)));
    }

    #[test]
    fn bare_value_without_step_stays_exact() {
        let cron = CronExpr::parse("10 * * * *").unwrap();
        assert!(cron.matches(at(2026, 2, 10, 8, 10)));
        assert!(!cron.matches(at(2026, 2, 10, 8, 25)));
    }

    #[test]
    fn range_with_step() {
        let cron = CronExpr::parse("0 9-17/4 * * *").unwrap();
        assert!(cron.matches(at(2026, 2, 10, 9, 0)));
        assert!(cron.matches(at(2026, 2, 10, 13, 0)));
        assert!(cron.matches(at(2026, 2, 10, 17, 0)));
        assert!(!cron.matches(at(2026, 2, 10, 11, 0)));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("0 3 * *").is_err());
        assert!(CronExpr::parse("0 3 * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("* * * 13 *").is_err());
        assert!(CronExpr::parse("* * * * 7").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(CronExpr::parse("a b c d e").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-1 * * * *").is_err());
    }

    #[test]
    fn impossible_date_fails_with_no_next_occurrence() {
        // February 30th never exists.
        let cron = CronExpr::parse("0 0 30 2 *").unwrap();
        let err = cron.next_after(at(2026, 1, 1, 0, 0)).unwrap_err();
        assert!(matches!(err, SchedulerError::NoNextOccurrence));
    }

    #[test]
    fn month_boundary_rollover() {
        let cron = CronExpr::parse("0 0 1 * *").unwrap();
        let next = cron.next_after(at(2026, 2, 28, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 1, 0, 0));
    }
}
