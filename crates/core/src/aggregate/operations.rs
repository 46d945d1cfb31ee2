use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::period::{current_period, period_label, previous_period};
use super::types::{DatedAmount, Granularity, PeriodAggregate, PeriodBounds};

/// Computes current vs. previous period totals for `records` as seen from `now`.
///
/// Records outside both windows are ignored. The two windows never overlap,
/// so no record contributes to both totals.
pub fn aggregate(records: &[DatedAmount], granularity: Granularity, now: NaiveDate) -> PeriodAggregate {
    let current_bounds = current_period(granularity, now);
    let current_total = sum_within(records, current_bounds);
    let previous_total = previous_period(granularity, now)
        .map(|bounds| sum_within(records, bounds))
        .unwrap_or(Decimal::ZERO);

    PeriodAggregate {
        granularity,
        current_total,
        previous_total,
        percentage_change: percentage_change(current_total, previous_total),
        period_label: period_label(granularity).to_string(),
        as_of: now,
        balance: total_balance(records),
    }
}

/// Sums the amounts of records dated within `bounds`.
pub fn sum_within(records: &[DatedAmount], bounds: PeriodBounds) -> Decimal {
    records
        .iter()
        .filter(|record| bounds.contains(record.date))
        .fold(Decimal::ZERO, |acc, record| acc.saturating_add(record.amount))
}

/// All-time sum of every record, for balance cards.
pub fn total_balance(records: &[DatedAmount]) -> Decimal {
    records
        .iter()
        .fold(Decimal::ZERO, |acc, record| acc.saturating_add(record.amount))
}

/// Signed percentage change from `previous` to `current`.
///
/// A zero `previous` always yields `100`, even when `current` is zero too.
pub fn percentage_change(current: Decimal, previous: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::ONE_HUNDRED;
    }

    current
        .checked_sub(previous)
        .and_then(|delta| delta.checked_div(previous))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or_else(|| {
            // Overflow: saturate in the direction of the change.
            let rising = (current > previous) == previous.is_sign_positive();
            if rising {
                Decimal::MAX
            } else {
                Decimal::MIN
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(id: &str, date: NaiveDate, amount: Decimal) -> DatedAmount {
        DatedAmount::new(id, date, amount)
    }

    /// Builds records from arbitrary (day offset, cents) pairs around 2024.
    fn arbitrary_records(raw: &[(u16, i32)]) -> Vec<DatedAmount> {
        let base = date(2022, 1, 1);
        raw.iter()
            .enumerate()
            .map(|(i, (offset, cents))| {
                let day = base + chrono::Days::new(u64::from(*offset % 1500));
                record(&i.to_string(), day, Decimal::new(i64::from(*cents), 2))
            })
            .collect()
    }

    fn arbitrary_now(offset: u16) -> NaiveDate {
        date(2022, 1, 1) + chrono::Days::new(u64::from(offset % 1500))
    }

    #[test]
    fn test_monthly_scenario() {
        let records = vec![
            record("a", date(2024, 1, 15), dec!(100)),
            record("b", date(2024, 2, 10), dec!(50)),
        ];

        let result = aggregate(&records, Granularity::Monthly, date(2024, 2, 20));

        assert_eq!(result.current_total, dec!(50));
        assert_eq!(result.previous_total, dec!(100));
        assert_eq!(result.percentage_change, dec!(-50));
        assert_eq!(result.period_label, "current month");
        assert_eq!(result.as_of, date(2024, 2, 20));
    }

    #[test]
    fn test_empty_yearly_scenario() {
        let result = aggregate(&[], Granularity::Yearly, date(2024, 6, 1));

        assert_eq!(result.current_total, Decimal::ZERO);
        assert_eq!(result.previous_total, Decimal::ZERO);
        assert_eq!(result.percentage_change, dec!(100));
        assert_eq!(result.period_label, "current year");
    }

    #[test]
    fn test_records_outside_windows_are_ignored() {
        let records = vec![
            record("old", date(2023, 11, 30), dec!(1000)),
            record("future", date(2024, 3, 1), dec!(1000)),
            record("current", date(2024, 2, 1), dec!(10)),
        ];

        let result = aggregate(&records, Granularity::Monthly, date(2024, 2, 29));

        assert_eq!(result.current_total, dec!(10));
        assert_eq!(result.previous_total, Decimal::ZERO);
        assert_eq!(result.balance, dec!(2010));
    }

    #[test]
    fn test_yearly_totals() {
        let records = vec![
            record("a", date(2023, 1, 1), dec!(20)),
            record("b", date(2023, 12, 31), dec!(20)),
            record("c", date(2024, 5, 5), dec!(60)),
        ];

        let result = aggregate(&records, Granularity::Yearly, date(2024, 12, 31));

        assert_eq!(result.current_total, dec!(60));
        assert_eq!(result.previous_total, dec!(40));
        assert_eq!(result.percentage_change, dec!(50));
    }

    #[test]
    fn test_january_compares_with_previous_december() {
        let records = vec![
            record("dec", date(2023, 12, 24), dec!(200)),
            record("jan", date(2024, 1, 2), dec!(300)),
        ];

        let result = aggregate(&records, Granularity::Monthly, date(2024, 1, 31));

        assert_eq!(result.previous_total, dec!(200));
        assert_eq!(result.percentage_change, dec!(50));
    }

    #[test]
    fn test_percentage_change_zero_base() {
        assert_eq!(percentage_change(dec!(0), dec!(0)), dec!(100));
        assert_eq!(percentage_change(dec!(42), dec!(0)), dec!(100));
        assert_eq!(percentage_change(dec!(-42), dec!(0)), dec!(100));
    }

    #[test]
    fn test_percentage_change_signed() {
        assert_eq!(percentage_change(dec!(150), dec!(100)), dec!(50));
        assert_eq!(percentage_change(dec!(0), dec!(100)), dec!(-100));
        assert_eq!(percentage_change(dec!(-50), dec!(-100)), dec!(-50));
    }

    #[test]
    fn test_percentage_change_saturates_on_overflow() {
        assert_eq!(percentage_change(Decimal::MAX, dec!(0.0001)), Decimal::MAX);
        assert_eq!(percentage_change(Decimal::MIN, dec!(0.0001)), Decimal::MIN);
    }

    #[test]
    fn test_total_balance() {
        let records = vec![
            record("a", date(2020, 1, 1), dec!(10.25)),
            record("b", date(2024, 1, 1), dec!(-0.25)),
        ];
        assert_eq!(total_balance(&records), dec!(10));
        assert_eq!(total_balance(&[]), Decimal::ZERO);
    }

    #[quickcheck]
    fn prop_zero_previous_means_hundred(raw: Vec<(u16, i32)>, now: u16, yearly: bool) -> bool {
        let granularity = if yearly {
            Granularity::Yearly
        } else {
            Granularity::Monthly
        };
        let result = aggregate(&arbitrary_records(&raw), granularity, arbitrary_now(now));
        !result.previous_total.is_zero() || result.percentage_change == dec!(100)
    }

    #[quickcheck]
    fn prop_windows_never_double_count(raw: Vec<(u16, i32)>, now: u16, yearly: bool) -> bool {
        let granularity = if yearly {
            Granularity::Yearly
        } else {
            Granularity::Monthly
        };
        let now = arbitrary_now(now);
        let current = current_period(granularity, now);
        let Some(previous) = previous_period(granularity, now) else {
            return true;
        };
        let records = arbitrary_records(&raw);

        let in_both = records
            .iter()
            .any(|r| current.contains(r.date) && previous.contains(r.date));
        let combined = PeriodBounds::new(previous.start, current.end);

        !current.overlaps(&previous)
            && !in_both
            && previous.end.succ_opt() == Some(current.start)
            && sum_within(&records, current) + sum_within(&records, previous)
                == sum_within(&records, combined)
    }

    #[quickcheck]
    fn prop_aggregate_is_idempotent(raw: Vec<(u16, i32)>, now: u16) -> bool {
        let records = arbitrary_records(&raw);
        let now = arbitrary_now(now);
        aggregate(&records, Granularity::Monthly, now) == aggregate(&records, Granularity::Monthly, now)
    }
}
