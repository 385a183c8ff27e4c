//! Billing period calculator.
//!
//! Pure functions from (period kind, reset day, now) to the `[start, end)`
//! window that usage accumulates in. All arithmetic is in UTC.

use crate::models::{BillingPeriod, Period};
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc};

/// Start of the period containing `now`.
///
/// Monthly periods start on `reset_day`. When today is before the reset day
/// the period began on the reset day of the previous month. A reset day past
/// the end of a short month lands on that month's last day.
pub fn period_start(kind: Period, reset_day: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);

    match kind {
        Period::Hourly => (midnight + Duration::hours(i64::from(now.hour()))).and_utc(),
        Period::Daily => midnight.and_utc(),
        Period::Monthly => {
            let today = now.date_naive();
            let this_month = first_of_month(today);
            let anchor = month_anchor(this_month, reset_day);

            let start = if today < anchor {
                month_anchor(this_month - Months::new(1), reset_day)
            } else {
                anchor
            };
            start.and_time(NaiveTime::MIN).and_utc()
        }
    }
}

/// End (exclusive) of the period containing `now`, one unit after
/// [`period_start`] for the same inputs.
///
/// Monthly periods end on the next month's anchor, so for reset days 29 to 31
/// a start clamped to a short month is followed by an end on the reset day
/// itself: with reset day 30, the period starting Feb 29 ends Mar 30.
/// Consecutive periods always share a boundary.
pub fn period_end(kind: Period, reset_day: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    end_from_start(kind, reset_day, period_start(kind, reset_day, now))
}

/// The full period containing `now`.
pub fn current_period(kind: Period, reset_day: u32, now: DateTime<Utc>) -> BillingPeriod {
    let start = period_start(kind, reset_day, now);
    BillingPeriod {
        kind,
        start,
        end: end_from_start(kind, reset_day, start),
    }
}

fn end_from_start(kind: Period, reset_day: u32, start: DateTime<Utc>) -> DateTime<Utc> {
    match kind {
        Period::Hourly => start + Duration::hours(1),
        Period::Daily => start + Days::new(1),
        Period::Monthly => {
            let next_month = first_of_month(start.date_naive()) + Months::new(1);
            month_anchor(next_month, reset_day)
                .and_time(NaiveTime::MIN)
                .and_utc()
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day() - 1))
}

fn days_in_month(first: NaiveDate) -> u32 {
    ((first + Months::new(1)) - first).num_days() as u32
}

/// The reset day within the month starting at `first`, clamped to the month.
fn month_anchor(first: NaiveDate, reset_day: u32) -> NaiveDate {
    let day = reset_day.clamp(1, 31).min(days_in_month(first));
    first + Days::new(u64::from(day - 1))
}
