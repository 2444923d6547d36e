use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use thiserror::Error;

/// How far ahead `next_after` searches before declaring a schedule
/// unsatisfiable. Four years covers every leap-day expression.
const MAX_SEARCH_DAYS: i64 = 366 * 4;

/// Errors produced while parsing a cron expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronParseError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("invalid value '{value}' in {field} field")]
    Value { field: &'static str, value: String },

    #[error("value {value} out of range {min}-{max} in {field} field")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("empty range {start}-{end} in {field} field")]
    EmptyRange {
        field: &'static str,
        start: u32,
        end: u32,
    },

    #[error("step must be positive in {field} field")]
    ZeroStep { field: &'static str },
}

/// A parsed 5-field cron expression: `minute hour day-of-month month
/// day-of-week`, minute granularity.
///
/// Supported forms per field: `*`, single values, lists (`a,b,c`),
/// ranges (`a-b`) and steps (`*/n`, `a-b/n`, `a/n`). Day-of-week runs
/// 0–7 with both 0 and 7 meaning Sunday. When day-of-month and
/// day-of-week are both restricted a day matches if *either* does —
/// the classic cron union rule.
#[derive(Debug, Clone)]
pub struct CronExpr {
    text: String,
    minutes: u64,
    hours: u32,
    dom: u32,
    months: u16,
    dow: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse an expression, rejecting anything outside the supported
    /// 5-field grammar.
    pub fn parse(text: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount(fields.len()));
        }

        let minutes = parse_field("minute", fields[0], 0, 59)?;
        let hours = parse_field("hour", fields[1], 0, 23)? as u32;
        let dom = parse_field("day-of-month", fields[2], 1, 31)? as u32;
        let months = parse_field("month", fields[3], 1, 12)? as u16;

        // Day-of-week accepts 0-7; bit 7 folds into bit 0 (Sunday).
        let mut dow_mask = parse_field("day-of-week", fields[4], 0, 7)?;
        if dow_mask & (1 << 7) != 0 {
            dow_mask = (dow_mask | 1) & !(1 << 7);
        }

        Ok(Self {
            text: text.to_string(),
            minutes,
            hours,
            dom,
            months,
            dow: dow_mask as u8,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Compute the next UTC fire instant strictly after `from`.
    ///
    /// Returns `None` when no instant exists within the search horizon
    /// (e.g. `0 0 30 2 *` — February 30th never comes).
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = (from + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let start_date = start.date_naive();

        for day_offset in 0..=MAX_SEARCH_DAYS {
            let date = start_date.checked_add_signed(Duration::days(day_offset))?;
            if self.months & (1 << date.month()) == 0 {
                continue;
            }
            if !self.day_matches(date) {
                continue;
            }

            let first_day = day_offset == 0;
            let from_hour = if first_day { start.hour() } else { 0 };
            for hour in from_hour..24 {
                if self.hours & (1 << hour) == 0 {
                    continue;
                }
                let from_minute = if first_day && hour == start.hour() {
                    start.minute()
                } else {
                    0
                };
                for minute in from_minute..60 {
                    if self.minutes & (1 << minute) != 0 {
                        return Some(date.and_hms_opt(hour, minute, 0)?.and_utc());
                    }
                }
            }
        }
        None
    }

    fn day_matches(&self, date: chrono::NaiveDate) -> bool {
        let dom_ok = self.dom & (1 << date.day()) != 0;
        let dow_ok = self.dow & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (false, false) => true,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (true, true) => dom_ok || dow_ok,
        }
    }
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl std::str::FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

/// Parse one field into a bitmask over `min..=max`.
fn parse_field(
    field: &'static str,
    spec: &str,
    min: u32,
    max: u32,
) -> Result<u64, CronParseError> {
    let mut mask: u64 = 0;

    for item in spec.split(',') {
        let (range_part, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| CronParseError::Value {
                    field,
                    value: item.to_string(),
                })?;
                if step == 0 {
                    return Err(CronParseError::ZeroStep { field });
                }
                (r, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let start = parse_value(field, a, min, max)?;
            let end = parse_value(field, b, min, max)?;
            if start > end {
                return Err(CronParseError::EmptyRange { field, start, end });
            }
            (start, end)
        } else {
            let v = parse_value(field, range_part, min, max)?;
            // `a/n` means a-max/n, matching vixie cron.
            if step > 1 {
                (v, max)
            } else {
                (v, v)
            }
        };

        let mut v = start;
        while v <= end {
            mask |= 1 << v;
            v += step;
        }
    }

    if mask == 0 {
        return Err(CronParseError::Value {
            field,
            value: spec.to_string(),
        });
    }
    Ok(mask)
}

fn parse_value(
    field: &'static str,
    raw: &str,
    min: u32,
    max: u32,
) -> Result<u32, CronParseError> {
    let v: u32 = raw.parse().map_err(|_| CronParseError::Value {
        field,
        value: raw.to_string(),
    })?;
    if v < min || v > max {
        return Err(CronParseError::OutOfRange {
            field,
            value: v,
            min,
            max,
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn next(expr: &str, from: DateTime<Utc>) -> DateTime<Utc> {
        CronExpr::parse(expr).unwrap().next_after(from).unwrap()
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            CronExpr::parse("* * * *").unwrap_err(),
            CronParseError::FieldCount(4)
        );
        assert_eq!(
            CronExpr::parse("").unwrap_err(),
            CronParseError::FieldCount(0)
        );
        assert!(CronExpr::parse("* * * * * *").is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            CronExpr::parse("60 * * * *").unwrap_err(),
            CronParseError::OutOfRange { field: "minute", value: 60, .. }
        ));
        assert!(matches!(
            CronExpr::parse("* 24 * * *").unwrap_err(),
            CronParseError::OutOfRange { field: "hour", .. }
        ));
        assert!(matches!(
            CronExpr::parse("x * * * *").unwrap_err(),
            CronParseError::Value { field: "minute", .. }
        ));
        assert!(matches!(
            CronExpr::parse("*/0 * * * *").unwrap_err(),
            CronParseError::ZeroStep { field: "minute" }
        ));
        assert!(matches!(
            CronExpr::parse("30-5 * * * *").unwrap_err(),
            CronParseError::EmptyRange { .. }
        ));
    }

    #[test]
    fn every_minute_is_strictly_after() {
        // Half past the minute rounds up to the next whole minute.
        assert_eq!(
            next("* * * * *", at(2026, 8, 30, 10, 0, 30)),
            at(2026, 8, 30, 10, 1, 0)
        );
        // Exactly on a matching instant still moves forward.
        assert_eq!(
            next("* * * * *", at(2026, 8, 30, 10, 0, 0)),
            at(2026, 8, 30, 10, 1, 0)
        );
    }

    #[test]
    fn five_minute_step() {
        assert_eq!(
            next("*/5 * * * *", at(2026, 8, 30, 10, 0, 0)),
            at(2026, 8, 30, 10, 5, 0)
        );
        assert_eq!(
            next("*/5 * * * *", at(2026, 8, 30, 10, 57, 0)),
            at(2026, 8, 30, 11, 0, 0)
        );
    }

    #[test]
    fn hourly_after_reschedule() {
        // Switching to hourly at 10:02 means the next fire is 11:00,
        // not the old 10:05.
        assert_eq!(
            next("0 * * * *", at(2026, 8, 30, 10, 2, 0)),
            at(2026, 8, 30, 11, 0, 0)
        );
    }

    #[test]
    fn lists_and_ranges() {
        assert_eq!(
            next("0,30 * * * *", at(2026, 8, 30, 10, 5, 0)),
            at(2026, 8, 30, 10, 30, 0)
        );
        assert_eq!(
            next("10-30/10 * * * *", at(2026, 8, 30, 10, 25, 0)),
            at(2026, 8, 30, 10, 30, 0)
        );
        assert_eq!(
            next("0 9-17 * * *", at(2026, 8, 30, 18, 0, 0)),
            at(2026, 8, 31, 9, 0, 0)
        );
    }

    #[test]
    fn daily_rolls_over_midnight() {
        assert_eq!(
            next("30 6 * * *", at(2026, 8, 30, 7, 0, 0)),
            at(2026, 8, 31, 6, 30, 0)
        );
    }

    #[test]
    fn weekday_schedule() {
        // 2026-08-30 is a Sunday; next Monday 09:00 is the 31st.
        assert_eq!(
            next("0 9 * * 1", at(2026, 8, 30, 10, 0, 0)),
            at(2026, 8, 31, 9, 0, 0)
        );
    }

    #[test]
    fn dow_seven_is_sunday() {
        assert_eq!(
            next("0 0 * * 7", at(2026, 8, 29, 1, 0, 0)),
            at(2026, 8, 30, 0, 0, 0)
        );
    }

    #[test]
    fn dom_dow_union_rule() {
        // 13th of the month *or* any Friday — the earlier wins.
        // From Sunday 2026-08-30 the first Friday is Sep 4, well before
        // the 13th.
        assert_eq!(
            next("0 0 13 * 5", at(2026, 8, 30, 10, 0, 0)),
            at(2026, 9, 4, 0, 0, 0)
        );
    }

    #[test]
    fn monthly_schedule() {
        assert_eq!(
            next("0 12 1 1 *", at(2026, 8, 30, 10, 0, 0)),
            at(2027, 1, 1, 12, 0, 0)
        );
    }

    #[test]
    fn leap_day_found_within_horizon() {
        assert_eq!(
            next("0 0 29 2 *", at(2026, 8, 30, 10, 0, 0)),
            at(2028, 2, 29, 0, 0, 0)
        );
    }

    #[test]
    fn unsatisfiable_returns_none() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert!(expr.next_after(at(2026, 8, 30, 10, 0, 0)).is_none());
    }
}
