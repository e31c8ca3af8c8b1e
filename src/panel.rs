use chrono::{Datelike, Duration, NaiveDate};
use rayon::prelude::*;
use tracing::debug;

use crate::models::{FactRecord, ProviderSnapshot};
use crate::window::aggregate_snapshot;

/// Month-end dates falling between the earliest and latest fact, inclusive.
pub fn month_end_snapshots(facts: &[FactRecord]) -> Vec<NaiveDate> {
    let (Some(start), Some(end)) = (
        facts.iter().map(|f| f.date).min(),
        facts.iter().map(|f| f.date).max(),
    ) else {
        return Vec::new();
    };

    let mut dates = Vec::new();
    let mut month_end = last_day_of_month(start);
    while month_end <= end {
        dates.push(month_end);
        month_end = last_day_of_month(month_end + Duration::days(1));
    }
    dates
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|next| next - Duration::days(1))
        .unwrap_or(NaiveDate::MAX)
}

/// Aggregates each snapshot date independently and concatenates the rows in
/// the order the dates were given. Dates with no history yet contribute nothing.
pub fn build_panel(
    facts: &[FactRecord],
    snapshot_dates: &[NaiveDate],
    windows: &[u32],
) -> Vec<ProviderSnapshot> {
    snapshot_dates
        .par_iter()
        .map(|&as_of| {
            let rows = aggregate_snapshot(facts, as_of, windows);
            if rows.is_empty() {
                debug!(%as_of, "no history on or before snapshot date, skipping");
            }
            rows
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}
