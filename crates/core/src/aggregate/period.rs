//! Calendar period arithmetic.

use chrono::{Datelike, NaiveDate};

use super::types::{Granularity, PeriodBounds};

/// Returns the calendar month or year containing `now`.
pub fn current_period(granularity: Granularity, now: NaiveDate) -> PeriodBounds {
    match granularity {
        Granularity::Monthly => month_bounds(now.year(), now.month()),
        Granularity::Yearly => year_bounds(now.year()),
    }
    // Every NaiveDate lives in a representable month and year.
    .unwrap_or(PeriodBounds::new(now, now))
}

/// Returns the calendar month or year immediately before the one containing `now`.
///
/// `None` only when that period falls outside the supported date range.
pub fn previous_period(granularity: Granularity, now: NaiveDate) -> Option<PeriodBounds> {
    match granularity {
        Granularity::Monthly => {
            let (year, month) = if now.month() == 1 {
                (now.year() - 1, 12)
            } else {
                (now.year(), now.month() - 1)
            };
            month_bounds(year, month)
        }
        Granularity::Yearly => year_bounds(now.year() - 1),
    }
}

/// Human label for the current period. Localization happens in presentation.
pub fn period_label(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Monthly => "current month",
        Granularity::Yearly => "current year",
    }
}

fn month_bounds(year: i32, month: u32) -> Option<PeriodBounds> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?.pred_opt()?
    };
    Some(PeriodBounds::new(start, end))
}

fn year_bounds(year: i32) -> Option<PeriodBounds> {
    Some(PeriodBounds::new(
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}
