//! Cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Items: *, N, A-B, */N, A-B/N, N/S, comma lists, JAN-DEC and SUN-SAT names.
//! Example: "30 9 * * 1-5" = weekdays at 9:30
//!
//! Expressions are parsed once into bitsets; an invalid field is an error at
//! parse time rather than a silent miss at fire time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

use flowhook_core::FlowhookError;

/// How far ahead `next_after` looks before giving up. Four years covers `29 2`.
const SEARCH_DAYS: i64 = 4 * 366;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields (MIN HOUR DOM MON DOW), got {0}")]
    FieldCount(usize),
    #[error("invalid {field} field '{value}'")]
    Invalid { field: &'static str, value: String },
    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

impl From<CronError> for FlowhookError {
    fn from(e: CronError) -> Self {
        FlowhookError::Trigger(e.to_string())
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of `names[0]`.
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_base: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"],
    names_base: 1,
};
// 0 and 7 are both Sunday.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    names_base: 0,
};

impl FieldSpec {
    fn value(&self, raw: &str, field: &str) -> Result<u32, CronError> {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<u32>() {
            if v < self.min || v > self.max {
                return Err(CronError::OutOfRange {
                    field: self.name,
                    value: v,
                    min: self.min,
                    max: self.max,
                });
            }
            return Ok(v);
        }
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(raw))
            .map(|i| i as u32 + self.names_base)
            .ok_or_else(|| CronError::Invalid {
                field: self.name,
                value: field.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// Field started with `*` (matters for the DOM/DOW rule).
    star: bool,
}

impl Field {
    fn contains(&self, v: u32) -> bool {
        self.bits & (1u64 << v) != 0
    }
}

fn parse_field(raw: &str, spec: &FieldSpec) -> Result<Field, CronError> {
    let invalid = || CronError::Invalid {
        field: spec.name,
        value: raw.to_string(),
    };

    let mut bits = 0u64;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (spec.value(a, raw)?, spec.value(b, raw)?)
        } else {
            let v = spec.value(range, raw)?;
            // "5/15" means from 5 to the end of the range, every 15.
            if step.is_some() { (v, spec.max) } else { (v, v) }
        };
        if lo > hi {
            return Err(invalid());
        }

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            bits |= 1u64 << v;
        }
    }

    Ok(Field {
        bits,
        star: raw.starts_with('*'),
    })
}

/// A parsed five-field cron schedule, evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Field,
    hours: Field,
    days: Field,
    months: Field,
    weekdays: Field,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let mut weekdays = parse_field(parts[4], &DAY_OF_WEEK)?;
        if weekdays.contains(7) {
            weekdays.bits |= 1;
        }

        Ok(Self {
            expression: parts.join(" "),
            minutes: parse_field(parts[0], &MINUTE)?,
            hours: parse_field(parts[1], &HOUR)?,
            days: parse_field(parts[2], &DAY_OF_MONTH)?,
            months: parse_field(parts[3], &MONTH)?,
            weekdays,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the minute containing `t` is a firing minute.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        let t = t.naive_utc();
        self.months.contains(t.month())
            && self.day_matches(t.date())
            && self.hours.contains(t.hour())
            && self.minutes.contains(t.minute())
    }

    /// If both DOM and DOW are restricted, either may match; otherwise only
    /// the restricted one counts.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days.contains(date.day());
        let dow = self.weekdays.contains(date.weekday().num_days_from_sunday());
        match (self.days.star, self.weekdays.star) {
            (false, false) => dom || dow,
            (false, true) => dom,
            (true, false) => dow,
            (true, true) => true,
        }
    }

    /// First firing minute strictly after `after`, or `None` if the schedule
    /// never fires (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start: NaiveDateTime =
            after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(SEARCH_DAYS);

        let mut t = start;
        while t <= limit {
            if !self.months.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t.and_utc());
        }
        None
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        CronSchedule::parse(expr).unwrap().next_after(after).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let n = next("0 * * * *", at(2026, 2, 22, 10, 30));
        assert_eq!(n.hour(), 11);
        assert_eq!(n.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        assert_eq!(next("0 8 * * *", at(2026, 2, 22, 7, 0)), at(2026, 2, 22, 8, 0));
        // Exactly on a firing minute: strictly after.
        assert_eq!(next("0 8 * * *", at(2026, 2, 22, 8, 0)), at(2026, 2, 23, 8, 0));
    }

    #[test]
    fn test_every_15_minutes() {
        assert_eq!(next("*/15 * * * *", at(2026, 2, 22, 10, 2)).minute(), 15);
        assert_eq!(next("*/15 * * * *", at(2026, 2, 22, 10, 50)), at(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 14, 59).unwrap();
        assert_eq!(next("*/15 * * * *", after), at(2026, 2, 22, 10, 15));
    }

    #[test]
    fn test_ranges_and_steps() {
        assert_eq!(next("0-30/10 * * * *", at(2026, 2, 22, 10, 31)), at(2026, 2, 22, 11, 0));
        assert_eq!(next("5/15 * * * *", at(2026, 2, 22, 10, 36)), at(2026, 2, 22, 10, 50));
        assert_eq!(next("0 9,17 * * *", at(2026, 2, 22, 10, 0)), at(2026, 2, 22, 17, 0));
    }

    #[test]
    fn test_weekdays() {
        // 2026-02-21 is a Saturday.
        assert_eq!(next("30 9 * * 1-5", at(2026, 2, 21, 10, 0)), at(2026, 2, 23, 9, 30));
        assert_eq!(next("30 9 * * mon-fri", at(2026, 2, 21, 10, 0)), at(2026, 2, 23, 9, 30));
        // 7 is Sunday too.
        assert_eq!(next("0 12 * * 7", at(2026, 2, 21, 13, 0)), at(2026, 2, 22, 12, 0));
    }

    #[test]
    fn test_dom_or_dow_when_both_restricted() {
        // The 13th or any Friday; 2026-02-06 is the first Friday after Feb 1.
        assert_eq!(next("0 0 13 * 5", at(2026, 2, 1, 0, 0)), at(2026, 2, 6, 0, 0));
        assert_eq!(next("0 0 13 * 5", at(2026, 2, 12, 0, 0)), at(2026, 2, 13, 0, 0));
    }

    #[test]
    fn test_month_names_and_rollover() {
        assert_eq!(next("0 0 1 jan,jul *", at(2026, 2, 1, 0, 0)), at(2026, 7, 1, 0, 0));
        assert_eq!(next("0 0 1 1 *", at(2026, 12, 31, 23, 59)), at(2027, 1, 1, 0, 0));
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(next("0 0 29 2 *", at(2026, 3, 1, 0, 0)), at(2028, 2, 29, 0, 0));
    }

    #[test]
    fn test_never_fires() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert!(schedule.next_after(at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_matches() {
        let schedule: CronSchedule = "*/5 8 * * *".parse().unwrap();
        assert!(schedule.matches(at(2026, 2, 22, 8, 5)));
        assert!(!schedule.matches(at(2026, 2, 22, 8, 6)));
        assert!(!schedule.matches(at(2026, 2, 22, 9, 5)));
    }

    #[test]
    fn test_invalid_expression() {
        assert_eq!(CronSchedule::parse("bad").unwrap_err(), CronError::FieldCount(1));
        assert_eq!(CronSchedule::parse("* * * *").unwrap_err(), CronError::FieldCount(4));
        assert!(matches!(
            CronSchedule::parse("60 * * * *"),
            Err(CronError::OutOfRange { field: "minute", value: 60, .. })
        ));
        assert!(matches!(CronSchedule::parse("*/0 * * * *"), Err(CronError::Invalid { .. })));
        assert!(matches!(CronSchedule::parse("30-10 * * * *"), Err(CronError::Invalid { .. })));
        assert!(matches!(CronSchedule::parse("0 0 0 * *"), Err(CronError::OutOfRange { .. })));
        assert!(matches!(CronSchedule::parse("0 0 * foo *"), Err(CronError::Invalid { .. })));
        assert!(matches!(CronSchedule::parse("0,,5 * * * *"), Err(CronError::Invalid { .. })));
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let schedule = CronSchedule::parse("  0   8 * *  * ").unwrap();
        assert_eq!(schedule.to_string(), "0 8 * * *");
    }
}
