use chrono::{Datelike, NaiveDate};

pub const DAYS_PER_YEAR: f64 = 365.25;

/// Whole years between `date_of_birth` and `now`, counted on the calendar so
/// that a 29 February birthday only ticks over on 1 March in common years.
pub fn calculate_age(date_of_birth: NaiveDate, now: NaiveDate) -> u32 {
    if now <= date_of_birth {
        return 0;
    }
    let mut age = now.year() - date_of_birth.year();
    if (now.month(), now.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

/// Elapsed time in 365.25-day years. Negative when `date` is after `now`.
pub fn years_since(date: NaiveDate, now: NaiveDate) -> f64 {
    (now - date).num_days() as f64 / DAYS_PER_YEAR
}

/// Whole months from `from` to `to`; a partial final month is not counted.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut months =
        (to.year() - from.year()) as i64 * 12 + to.month() as i64 - from.month() as i64;
    if to.day() < from.day() {
        months -= 1;
    }
    months
}

/// 1 September of the calendar year the child turns `start_age`.
pub fn school_start_date(date_of_birth: NaiveDate, start_age: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date_of_birth.year() + start_age as i32, 9, 1)
}

/// 31 July of the calendar year the child turns `end_age`.
pub fn school_end_date(date_of_birth: NaiveDate, end_age: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date_of_birth.year() + end_age as i32, 7, 31)
}
