//! Calendar-month boundaries for billing windows.

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc};

/// Half-open UTC bounds `[start, end)` of the calendar month containing
/// `now`: start is day 1 at 00:00, end is day 1 of the following month.
///
/// The end is found by jumping from day 28 four days forward, which lands in
/// the next month for every month length (28 to 31 days), then truncating
/// back to day 1. No calendar table needed.
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_date = now
        .date_naive()
        .with_day(1)
        .expect("day 1 exists in every month");
    let pivot = start_date
        .with_day(28)
        .expect("day 28 exists in every month")
        + Days::new(4);
    let end_date = pivot.with_day(1).expect("day 1 exists in every month");

    (
        start_date.and_time(NaiveTime::MIN).and_utc(),
        end_date.and_time(NaiveTime::MIN).and_utc(),
    )
}

/// [`month_bounds`] for the current instant.
pub fn current_month_bounds() -> (DateTime<Utc>, DateTime<Utc>) {
    month_bounds(Utc::now())
}
