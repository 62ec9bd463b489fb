//! Five-field cron expressions: minute, hour, day-of-month, month, day-of-week.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How far ahead `next_after` searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month day-of-week), found {0}")]
    FieldCount(usize),

    #[error("{field} field: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Names accepted in place of numbers, starting at `name_offset`.
    names: &'static [&'static str],
    name_offset: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_offset: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_offset: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_offset: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: MONTH_NAMES, name_offset: 1 };
// 7 is accepted as an alias for Sunday and folded onto 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: WEEKDAY_NAMES, name_offset: 0 };

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueSet(u64);

impl ValueSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: ValueSet,
    hours: ValueSet,
    days_of_month: ValueSet,
    months: ValueSet,
    days_of_week: ValueSet,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week = ValueSet((days_of_week.0 & !(1u64 << 7)) | 1);
        }

        Ok(Self {
            source: fields.join(" "),
            minutes: parse_field(fields[0], &MINUTE)?,
            hours: parse_field(fields[1], &HOUR)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            months: parse_field(fields[3], &MONTH)?,
            days_of_week,
            day_of_month_restricted: !fields[2].starts_with('*'),
            day_of_week_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the minute containing `time` is a fire time.
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        let local = time.naive_local();
        self.months.contains(local.month())
            && self.day_matches(local.date())
            && self.hours.contains(local.hour())
            && self.minutes.contains(local.minute())
    }

    /// First fire time strictly after `after`, or `None` if the expression
    /// never fires within the search horizon (e.g. `0 0 31 2 *`).
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let timezone = after.timezone();
        let start = after.naive_local().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = start + Duration::days(SEARCH_HORIZON_DAYS);
        let mut candidate = start;

        while candidate <= horizon {
            if !self.months.contains(candidate.month()) {
                candidate = first_of_next_month(candidate)?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = candidate.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }

            // Local times skipped by a DST jump have no mapping; move on.
            if let Some(resolved) = timezone.from_local_datetime(&candidate).earliest() {
                if resolved > *after {
                    return Some(resolved);
                }
            }
            candidate += Duration::minutes(1);
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let day_of_month = self.days_of_month.contains(date.day());
        let day_of_week = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        if self.day_of_month_restricted && self.day_of_week_restricted {
            day_of_month || day_of_week
        } else {
            day_of_month && day_of_week
        }
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn first_of_next_month(time: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if time.month() == 12 {
        (time.year() + 1, 1)
    } else {
        (time.year(), time.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(text: &str, spec: &FieldSpec) -> Result<ValueSet, CronError> {
    let invalid = |reason: String| CronError::InvalidField { field: spec.name, reason };

    if text.is_empty() {
        return Err(invalid("empty field".to_string()));
    }

    let mut bits = 0u64;
    for item in text.split(',') {
        if item.is_empty() {
            return Err(invalid(format!("empty list item in '{}'", text)));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("invalid step '{}'", step)))?;
                if step == 0 {
                    return Err(invalid("step must be greater than zero".to_string()));
                }
                if step > spec.max - spec.min {
                    return Err(invalid(format!("step {} exceeds the field range", step)));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (low, high) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            let low = parse_value(low, spec)?;
            let high = parse_value(high, spec)?;
            if low > high {
                return Err(invalid(format!("range '{}' is reversed", range)));
            }
            (low, high)
        } else {
            let value = parse_value(range, spec)?;
            // `N/S` runs from N to the end of the field.
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1);
        let mut value = Some(low);
        while let Some(current) = value.filter(|v| *v <= high) {
            bits |= 1u64 << current;
            value = current.checked_add(step);
        }
    }

    Ok(ValueSet(bits))
}

fn parse_value(text: &str, spec: &FieldSpec) -> Result<u32, CronError> {
    let lowered = text.to_ascii_lowercase();
    let value = match spec.names.iter().position(|name| *name == lowered) {
        Some(index) => index as u32 + spec.name_offset,
        None => text.parse::<u32>().map_err(|_| CronError::InvalidField {
            field: spec.name,
            reason: format!("'{}' is not a valid value", text),
        })?,
    };

    if value < spec.min || value > spec.max {
        return Err(CronError::InvalidField {
            field: spec.name,
            reason: format!("'{}' out of range {}-{}", text, spec.min, spec.max),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        let cron = CronExpression::parse("*/5 * * * *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 3, 1, 10, 0)), Some(at(2026, 3, 1, 10, 5)));
        assert_eq!(cron.next_after(&at(2026, 3, 1, 10, 3)), Some(at(2026, 3, 1, 10, 5)));
        assert_eq!(cron.next_after(&at(2026, 3, 1, 23, 57)), Some(at(2026, 3, 2, 0, 0)));
    }

    #[test]
    fn test_next_is_strictly_after_partial_minute() {
        let cron = CronExpression::parse("* * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 30).unwrap();
        assert_eq!(cron.next_after(&after), Some(at(2026, 3, 1, 10, 1)));
    }

    #[test]
    fn test_daily_at_nine() {
        let cron = CronExpression::parse("0 9 * * *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 3, 1, 9, 0)), Some(at(2026, 3, 2, 9, 0)));
        assert_eq!(cron.next_after(&at(2026, 12, 31, 10, 0)), Some(at(2027, 1, 1, 9, 0)));
    }

    #[test]
    fn test_weekday_names_and_ranges() {
        // 2026-03-06 is a Friday
        let cron = CronExpression::parse("30 8 * * mon-fri").unwrap();
        assert_eq!(cron.next_after(&at(2026, 3, 6, 9, 0)), Some(at(2026, 3, 9, 8, 30)));

        let sunday = CronExpression::parse("0 12 * * 7").unwrap();
        assert_eq!(sunday.next_after(&at(2026, 3, 6, 0, 0)), Some(at(2026, 3, 8, 12, 0)));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // Fires on the 15th and on every Monday.
        let cron = CronExpression::parse("0 0 15 * 1").unwrap();
        assert_eq!(cron.next_after(&at(2026, 3, 10, 0, 0)), Some(at(2026, 3, 15, 0, 0)));
        assert_eq!(cron.next_after(&at(2026, 3, 15, 0, 0)), Some(at(2026, 3, 16, 0, 0)));
    }

    #[test]
    fn test_month_names_and_lists() {
        let cron = CronExpression::parse("0 6 1 jan,jul *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 2, 1, 0, 0)), Some(at(2026, 7, 1, 6, 0)));
        assert!(cron.matches(&at(2027, 1, 1, 6, 0)));
        assert!(!cron.matches(&at(2027, 1, 1, 6, 1)));
    }

    #[test]
    fn test_value_with_step_runs_to_end() {
        let cron = CronExpression::parse("50/5 * * * *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 3, 1, 10, 0)), Some(at(2026, 3, 1, 10, 50)));
        assert_eq!(cron.next_after(&at(2026, 3, 1, 10, 55)), Some(at(2026, 3, 1, 11, 50)));
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron = CronExpression::parse("0 0 31 2 *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_malformed_expressions() {
        assert_eq!(CronExpression::parse("* * * *"), Err(CronError::FieldCount(4)));
        assert_eq!(CronExpression::parse(""), Err(CronError::FieldCount(0)));

        let cases = [
            ("60 * * * *", "minute"),
            ("* 24 * * *", "hour"),
            ("* * 0 * *", "day-of-month"),
            ("* * * 13 *", "month"),
            ("* * * * 8", "day-of-week"),
            ("*/0 * * * *", "minute"),
            ("10-5 * * * *", "minute"),
            ("a * * * *", "minute"),
            ("1,,2 * * * *", "minute"),
            ("* * * foo *", "month"),
            ("1/4294967295 * * * *", "minute"),
            ("*/60 * * * *", "minute"),
            ("* * * * 0-6/8", "day-of-week"),
        ];
        for (expression, field) in cases {
            match CronExpression::parse(expression) {
                Err(CronError::InvalidField { field: got, .. }) => {
                    assert_eq!(got, field, "wrong field for '{}'", expression)
                }
                other => panic!("expected invalid {} for '{}', got {:?}", field, expression, other),
            }
        }
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let cron: CronExpression = "  */15   9-17 * * 1-5 ".parse().unwrap();
        assert_eq!(cron.to_string(), "*/15 9-17 * * 1-5");
    }
}
