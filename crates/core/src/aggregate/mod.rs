mod operations;
mod period;
mod types;

pub use operations::{aggregate, percentage_change, sum_within, total_balance};
pub use period::{current_period, period_label, previous_period};
pub use types::{DatedAmount, Granularity, ParseGranularityError, PeriodAggregate, PeriodBounds, Trend};
