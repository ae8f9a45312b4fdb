//! Natural-language time-range parser (C10).
//!
//! Accepts the small vocabulary of relative time expressions used by the
//! recall/consolidation paths and by hook scripts, and converts them to a
//! `(start_epoch, end_epoch)` pair in UTC. All arithmetic happens in UTC —
//! the caller never sees a local-time-zone ambiguity.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::error::{MemoryError, Result};

/// Parse a time expression into a `(start, end)` unix-epoch pair, both in
/// UTC seconds.
pub fn parse_time_range(expr: &str, now: DateTime<Utc>) -> Result<(f64, f64)> {
    let normalized = expr.trim().to_lowercase().replace(' ', "-");

    match normalized.as_str() {
        "today" => Ok(range(start_of_day(now), now)),
        "yesterday" => {
            let start_today = start_of_day(now);
            let start_yesterday = start_today - Duration::days(1);
            Ok(range(start_yesterday, start_today))
        }
        "this-week" => {
            let start = start_of_iso_week(now);
            Ok(range(start, now))
        }
        "last-week" => {
            let start_this_week = start_of_iso_week(now);
            let start_last_week = start_this_week - Duration::days(7);
            Ok(range(start_last_week, start_this_week))
        }
        "last-month" => {
            let start_this_month = start_of_month(now);
            let start_last_month = shift_months(start_this_month, -1);
            Ok(range(start_last_month, start_this_month))
        }
        "this-quarter" => {
            let start = start_of_quarter(now);
            Ok(range(start, now))
        }
        "past-2-weeks" | "last-2-weeks" => Ok(range(now - Duration::weeks(2), now)),
        other => parse_last_n(other, now).ok_or_else(|| MemoryError::TimeExpression(expr.to_string())),
    }
}

fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> (f64, f64) {
    (start.timestamp() as f64, end.timestamp() as f64)
}

fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n)).unwrap_or(dt)
}

/// Start of the current ISO week (Monday 00:00 UTC).
fn start_of_iso_week(dt: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = dt.weekday().num_days_from_monday() as i64;
    start_of_day(dt) - Duration::days(days_since_monday)
}

fn start_of_month(dt: DateTime<Utc>) -> DateTime<Utc> {
    let naive = dt
        .date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    Utc.from_utc_datetime(&naive)
}

fn start_of_quarter(dt: DateTime<Utc>) -> DateTime<Utc> {
    let quarter_start_month = ((dt.month0() / 3) * 3) + 1;
    let naive = dt
        .date_naive()
        .with_month(quarter_start_month)
        .and_then(|d| d.with_day(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    Utc.from_utc_datetime(&naive)
}

fn shift_months(dt: DateTime<Utc>, delta: i32) -> DateTime<Utc> {
    let total_months = dt.year() * 12 + dt.month0() as i32 + delta;
    let year = total_months.div_euclid(12);
    let month0 = total_months.rem_euclid(12);
    let naive = chrono::NaiveDate::from_ymd_opt(year, (month0 + 1) as u32, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    Utc.from_utc_datetime(&naive)
}

/// `last-N-days` / `last-N-weeks` / `last-N-months`.
fn parse_last_n(s: &str, now: DateTime<Utc>) -> Option<(f64, f64)> {
    let rest = s.strip_prefix("last-")?;
    let (n_str, unit) = rest.split_once('-')?;
    let n: i64 = n_str.parse().ok()?;

    let start = match unit {
        "day" | "days" => now - Duration::days(n),
        "week" | "weeks" => now - Duration::weeks(n),
        "month" | "months" => shift_months(now, -(n as i32)),
        _ => return None,
    };
    Some(range(start, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Weekday};

    fn fixed_now() -> DateTime<Utc> {
        // Wednesday, 2024-06-12 15:30:00 UTC
        Utc.with_ymd_and_hms(2024, 6, 12, 15, 30, 0).unwrap()
    }

    #[test]
    fn today_starts_at_midnight_utc() {
        let (start, end) = parse_time_range("today", fixed_now()).unwrap();
        let start_dt = DateTime::from_timestamp(start as i64, 0).unwrap();
        assert_eq!(start_dt.hour(), 0);
        assert_eq!(end as i64, fixed_now().timestamp());
    }

    #[test]
    fn yesterday_is_a_24_hour_window_ending_at_todays_midnight() {
        let (start, end) = parse_time_range("yesterday", fixed_now()).unwrap();
        assert_eq!(end - start, 86400.0);
        let end_dt = DateTime::from_timestamp(end as i64, 0).unwrap();
        assert_eq!(end_dt.hour(), 0);
    }

    #[test]
    fn last_week_is_full_seven_days_before_this_iso_week() {
        let (start, end) = parse_time_range("last-week", fixed_now()).unwrap();
        assert_eq!(end - start, 7.0 * 86400.0);
        let start_dt = DateTime::from_timestamp(start as i64, 0).unwrap();
        assert_eq!(start_dt.weekday(), Weekday::Mon);
    }

    #[test]
    fn last_n_days_parses_variable_n() {
        let (start, end) = parse_time_range("last-3-days", fixed_now()).unwrap();
        assert_eq!(end - start, 3.0 * 86400.0);
    }

    #[test]
    fn last_n_weeks_and_months_parse() {
        assert!(parse_time_range("last-2-weeks", fixed_now()).is_ok());
        assert!(parse_time_range("last-6-months", fixed_now()).is_ok());
    }

    #[test]
    fn past_n_weeks_phrasing_is_accepted() {
        assert!(parse_time_range("past 2 weeks", fixed_now()).is_ok());
    }

    #[test]
    fn unknown_token_fails_naming_the_bad_token() {
        let err = parse_time_range("fortnight", fixed_now()).unwrap_err();
        match err {
            MemoryError::TimeExpression(token) => assert_eq!(token, "fortnight"),
            other => panic!("expected TimeExpression, got {other:?}"),
        }
    }
}
