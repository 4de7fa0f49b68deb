//! Due-ness predicates.
//!
//! Each function answers "should this job run now, given when it last
//! succeeded?". They encode upstream release policies rather than fixed
//! intervals: `monthly_schedule` means once per calendar month, not every
//! 30 days. All arithmetic is in UTC.
//!
//! Every predicate returns `true` when `last_success` is `None`, so a job
//! that has never synced is always due.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Midnight UTC at the start of the given date, if it exists.
fn start_of(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
}

/// Due once a year, from the first day of `release_month` onwards.
///
/// An out-of-range month never becomes due for a job that has synced before.
pub fn annual_after(
    now: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
    release_month: u32,
) -> bool {
    let Some(last) = last_success else {
        return true;
    };
    match start_of(now.year(), release_month, 1) {
        Some(release) => now >= release && last < release,
        None => false,
    }
}

/// Due when the last success happened on an earlier UTC calendar day.
pub fn daily_schedule(now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool {
    match last_success {
        None => true,
        Some(last) => last.date_naive() < now.date_naive(),
    }
}

/// Monday 00:00 UTC of the ISO week containing `t`.
pub fn week_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = t.weekday().num_days_from_monday() as i64;
    let monday = t.date_naive() - Duration::days(days_from_monday);
    monday.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Due when the last success precedes the start of the current ISO week.
pub fn weekly_schedule(now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool {
    match last_success {
        None => true,
        Some(last) => last < week_start(now),
    }
}

/// Due when the last success precedes the first day of the current month.
pub fn monthly_schedule(now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool {
    let Some(last) = last_success else {
        return true;
    };
    match start_of(now.year(), now.month(), 1) {
        Some(month_start) => last < month_start,
        None => false,
    }
}

/// End (23:59:59 UTC) of the most recently completed calendar quarter before `t`.
pub fn most_recent_quarter_end(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month, day) = match t.month() {
        1..=3 => (t.year() - 1, 12, 31),
        4..=6 => (t.year(), 3, 31),
        7..=9 => (t.year(), 6, 30),
        _ => (t.year(), 9, 30),
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .unwrap_or(t)
}

/// Shared quarter walk: find when the latest published quarter became
/// available, trying the most recent completed quarter and then the one
/// before it.
fn quarterly_due(
    now: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
    available_at: impl Fn(DateTime<Utc>) -> Option<DateTime<Utc>>,
) -> bool {
    let Some(last) = last_success else {
        return true;
    };

    let mut quarter_end = most_recent_quarter_end(now);
    for _ in 0..2 {
        match available_at(quarter_end) {
            Some(available) if now >= available => return last < available,
            Some(_) => quarter_end = most_recent_quarter_end(quarter_end),
            None => return false,
        }
    }
    false
}

/// Due once per quarter, `delay_days` after the quarter closes.
pub fn quarterly_after_delay(
    now: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
    delay_days: u32,
) -> bool {
    quarterly_due(now, last_success, |q| {
        q.checked_add_signed(Duration::days(delay_days as i64))
    })
}

/// Due once per quarter, `lag_months` calendar months after the quarter closes.
///
/// A quarter end that does not exist in the target month clamps to that
/// month's last day: Mar 31 + 1 month is Apr 30, Dec 31 + 2 months is Feb 28
/// (or 29). It never rolls into the following month.
pub fn quarterly_with_lag(
    now: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
    lag_months: u32,
) -> bool {
    quarterly_due(now, last_success, |q| q.checked_add_months(Months::new(lag_months)))
}

/// Declarative form of the predicates above, for jobs defined in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DueRule {
    Daily,
    Weekly,
    Monthly,
    AnnualAfter { release_month: u32 },
    QuarterlyAfterDelay { delay_days: u32 },
    QuarterlyWithLag { lag_months: u32 },
}

impl DueRule {
    pub fn is_due(&self, now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool {
        match *self {
            DueRule::Daily => daily_schedule(now, last_success),
            DueRule::Weekly => weekly_schedule(now, last_success),
            DueRule::Monthly => monthly_schedule(now, last_success),
            DueRule::AnnualAfter { release_month } => annual_after(now, last_success, release_month),
            DueRule::QuarterlyAfterDelay { delay_days } => {
                quarterly_after_delay(now, last_success, delay_days)
            }
            DueRule::QuarterlyWithLag { lag_months } => {
                quarterly_with_lag(now, last_success, lag_months)
            }
        }
    }
}
