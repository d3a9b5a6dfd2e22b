//! `modified:` / `created:` predicate parsing.
//!
//! Relative keywords resolve to a lower bound (start of the period,
//! local time); `YYYY-MM-DD` resolves to a half-open day range;
//! `>`/`<` prefixes give signed day comparisons. Malformed values are
//! reported as `None` and the planner emits a no-rows clause.

use chrono::{Datelike, Duration, Local, NaiveDate, TimeZone};

/// The resolved comparison against `date_modified` (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DatePredicate {
    /// `date_modified >= t`
    Lower(f64),
    /// `t0 <= date_modified < t1`
    Range(f64, f64),
    /// `date_modified < t`
    Before(f64),
}

/// Reference date for predicate resolution. Captured from the local
/// clock in production; pinned in tests.
#[derive(Debug, Clone, Copy)]
pub struct DateContext {
    today: NaiveDate,
}

impl DateContext {
    pub fn capture() -> Self {
        Self {
            today: Local::now().date_naive(),
        }
    }

    pub fn fixed(today: NaiveDate) -> Self {
        Self { today }
    }
}

pub fn parse_date_predicate(raw: &str, context: &DateContext) -> Option<DatePredicate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix('>') {
        let date = parse_day(rest.trim())?;
        return Some(DatePredicate::Lower(day_start(next_day(date)?)));
    }
    if let Some(rest) = trimmed.strip_prefix('<') {
        let date = parse_day(rest.trim())?;
        return Some(DatePredicate::Before(day_start(date)));
    }

    if let Some(start) = keyword_lower_bound(trimmed, context) {
        return Some(DatePredicate::Lower(start));
    }

    let date = parse_day(trimmed)?;
    let start = day_start(date);
    let end = day_start(next_day(date)?);
    Some(DatePredicate::Range(start, end))
}

/// Start of the period named by a relative keyword, as epoch seconds.
fn keyword_lower_bound(keyword: &str, context: &DateContext) -> Option<f64> {
    let today = context.today;
    let date = match keyword.to_ascii_lowercase().as_str() {
        "today" => today,
        "yesterday" => today.checked_sub_signed(Duration::days(1))?,
        "thisweek" => {
            let offset = today.weekday().num_days_from_monday() as i64;
            today.checked_sub_signed(Duration::days(offset))?
        }
        "lastweek" => {
            let offset = today.weekday().num_days_from_monday() as i64 + 7;
            today.checked_sub_signed(Duration::days(offset))?
        }
        "thismonth" => NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?,
        "lastmonth" => {
            let (year, month) = if today.month() == 1 {
                (today.year() - 1, 12)
            } else {
                (today.year(), today.month() - 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)?
        }
        "thisyear" => NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
        "lastyear" => NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?,
        _ => return None,
    };
    Some(day_start(date))
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::days(1))
}

/// Local midnight of `date`, as epoch seconds.
fn day_start(date: NaiveDate) -> f64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp() as f64)
        .unwrap_or(0.0)
}
