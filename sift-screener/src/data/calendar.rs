//! Weekday trading calendar.
//!
//! Holidays are not modelled: they surface as days the provider returns no
//! bars for, and the lookback buffer absorbs them.

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// True for Monday through Friday.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The closest trading day strictly before `date`.
pub fn previous_trading_day(date: NaiveDate) -> NaiveDate {
    let mut day = date;
    loop {
        day = day - Days::new(1);
        if is_trading_day(day) {
            return day;
        }
    }
}

/// Step back `n` trading days from `date` (exclusive of `date`).
pub fn subtract_trading_days(date: NaiveDate, n: u32) -> NaiveDate {
    (0..n).fold(date, |day, _| previous_trading_day(day))
}

/// Trading days in `[start, end]`, ascending.
pub fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| is_trading_day(*d))
        .collect()
}

/// Number of trading days in `[start, end]`.
pub fn count_trading_days(start: NaiveDate, end: NaiveDate) -> u32 {
    trading_days(start, end).len() as u32
}
