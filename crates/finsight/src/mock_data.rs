use chrono::{Days, Months, NaiveDate};
use rust_decimal::Decimal;
use uuid::Uuid;

use finsight::source::{InMemoryRecordSource, SourceError};
use finsight::DatedAmount;

/// Resources the demo dashboard watches.
pub const DEMO_RESOURCES: [&str; 3] = ["expenses", "vehicles", "stocks"];

/// Generates mock records for `resource` spread over the current and the
/// previous month and year relative to `today`.
pub fn generate_mock_records(resource: &str, today: NaiveDate) -> Vec<DatedAmount> {
    // (months back, days back, amount in cents)
    let layout: &[(u32, u64, i64)] = match resource {
        "expenses" => &[
            (0, 0, 4_250),
            (0, 3, 12_999),
            (1, 2, 8_900),
            (1, 10, 31_050),
            (13, 0, 15_000),
        ],
        "vehicles" => &[(0, 1, 6_120), (1, 5, 5_870), (2, 0, 6_400)],
        "stocks" => &[(0, 0, 150_000), (6, 0, 98_500), (12, 0, 210_000)],
        _ => &[],
    };

    layout
        .iter()
        .filter_map(|&(months, days, cents)| {
            let date = today.checked_sub_months(Months::new(months))?;
            let date = date.checked_sub_days(Days::new(days))?;
            Some(DatedAmount::new(
                Uuid::new_v4().to_string(),
                date,
                Decimal::new(cents, 2),
            ))
        })
        .collect()
}

/// Seeds `source` with demo records for every demo resource.
///
/// Also adds a scoped set of expenses for a single retailer.
pub async fn seed_demo_data(
    source: &InMemoryRecordSource,
    today: NaiveDate,
) -> Result<usize, SourceError> {
    let mut seeded = 0;
    for resource in DEMO_RESOURCES {
        for record in generate_mock_records(resource, today) {
            source.insert_record(resource, record).await?;
            seeded += 1;
        }
    }

    for record in generate_mock_records("expenses", today).into_iter().take(2) {
        source.insert_record("expenses:retailer:42", record).await?;
        seeded += 1;
    }

    tracing::debug!(seeded, %today, "Seeded demo records");
    Ok(seeded)
}
