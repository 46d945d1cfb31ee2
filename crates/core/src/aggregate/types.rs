use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single dated monetary record (an expense, a fuel refill, a stock buy...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatedAmount {
    pub id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
}

impl DatedAmount {
    /// Creates a new record.
    pub fn new(id: impl Into<String>, date: NaiveDate, amount: Decimal) -> Self {
        Self {
            id: id.into(),
            date,
            amount,
        }
    }
}

/// The period unit an aggregate is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Monthly,
    Yearly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Monthly => "Monthly",
            Granularity::Yearly => "Yearly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown granularity: {0}")]
pub struct ParseGranularityError(pub String);

impl FromStr for Granularity {
    type Err = ParseGranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" | "m" => Ok(Granularity::Monthly),
            "yearly" | "year" | "y" => Ok(Granularity::Yearly),
            _ => Err(ParseGranularityError(s.to_string())),
        }
    }
}

/// An inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodBounds {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Returns true if `date` falls within the window (both ends inclusive).
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Returns true if the two windows share at least one day.
    pub fn overlaps(&self, other: &PeriodBounds) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Direction of a period-over-period change, for card arrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// Current vs. previous period totals for one set of records.
///
/// Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodAggregate {
    pub granularity: Granularity,
    pub current_total: Decimal,
    pub previous_total: Decimal,
    /// Signed percentage; `100` whenever the previous total is zero.
    pub percentage_change: Decimal,
    pub period_label: String,
    /// The date this aggregate was computed for.
    pub as_of: NaiveDate,
    /// All-time sum of every record, inside the periods or not.
    pub balance: Decimal,
}

impl PeriodAggregate {
    pub fn trend(&self) -> Trend {
        match self.current_total.cmp(&self.previous_total) {
            std::cmp::Ordering::Greater => Trend::Up,
            std::cmp::Ordering::Less => Trend::Down,
            std::cmp::Ordering::Equal => Trend::Flat,
        }
    }

    /// The percentage change rounded to `dp` decimal places (banker's rounding).
    pub fn rounded_change(&self, dp: u32) -> Decimal {
        self.percentage_change.round_dp(dp)
    }
}
