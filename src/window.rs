//! Lifetime and trailing-window behaviour per provider at one snapshot date.

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDate};

use crate::models::{
    FactRecord, LifetimeSummary, ProviderSnapshot, TrendFeature, WindowSummary,
};

/// Builds one snapshot row per provider with any activity on or before `as_of`.
///
/// Facts dated after `as_of` are ignored. Every configured window gets a
/// summary, zero-filled when the provider had no facts inside it. Rows come
/// back sorted by provider id.
pub fn aggregate_snapshot(
    facts: &[FactRecord],
    as_of: NaiveDate,
    windows: &[u32],
) -> Vec<ProviderSnapshot> {
    let mut by_provider: BTreeMap<&str, Vec<&FactRecord>> = BTreeMap::new();
    for fact in facts.iter().filter(|f| f.date <= as_of) {
        by_provider.entry(fact.provider_id.as_str()).or_default().push(fact);
    }

    let pairs = trend_pairs(windows);

    by_provider
        .into_iter()
        .filter_map(|(provider_id, history)| {
            let lifetime = lifetime_summary(&history, as_of)?;
            let summaries: Vec<WindowSummary> = windows
                .iter()
                .map(|&w| summarize_window(&window_slice(&history, as_of, w), w))
                .collect();
            let trends = pairs
                .iter()
                .filter_map(|&w| trend_feature(&summaries, w))
                .collect();
            Some(ProviderSnapshot::new(
                provider_id.to_string(),
                as_of,
                lifetime,
                summaries,
                trends,
            ))
        })
        .collect()
}

/// Window lengths `w` for which `2w` is also configured, in configured order.
pub fn trend_pairs(windows: &[u32]) -> Vec<u32> {
    windows
        .iter()
        .copied()
        .filter(|w| w.checked_mul(2).is_some_and(|double| windows.contains(&double)))
        .collect()
}

/// Names of every numeric column a snapshot carries for this window set.
pub fn feature_column_names(windows: &[u32]) -> Vec<String> {
    let mut names: Vec<String> = LifetimeSummary::COLUMNS
        .iter()
        .map(|name| name.to_string())
        .collect();
    for &w in windows {
        for field in WindowSummary::FIELDS {
            names.push(WindowSummary::column_name(field, w));
        }
    }
    for w in trend_pairs(windows) {
        names.push(TrendFeature::claims_column(w));
        names.push(TrendFeature::zscore_column(w));
    }
    names
}

pub fn default_zscore_columns(windows: &[u32]) -> Vec<String> {
    let mut names = vec![
        "total_claims_lifetime".to_string(),
        "mean_zscore_lifetime".to_string(),
    ];
    for &w in windows {
        names.push(WindowSummary::column_name("mean_daily_claims", w));
        names.push(WindowSummary::column_name("mean_zscore_allowed", w));
    }
    names
}

fn lifetime_summary(history: &[&FactRecord], as_of: NaiveDate) -> Option<LifetimeSummary> {
    let first_activity = history.iter().map(|f| f.date).min()?;
    let last_activity = history.iter().map(|f| f.date).max()?;
    Some(LifetimeSummary {
        first_activity,
        last_activity,
        total_claims: history.iter().map(|f| f.claims_cnt as f64).sum(),
        n_active_days: distinct_days(history),
        mean_zscore: running_mean(history.iter().map(|f| f.zscore_allowed_amt)),
        days_since_last: (as_of - last_activity).num_days(),
    })
}

fn window_slice<'a>(
    history: &[&'a FactRecord],
    as_of: NaiveDate,
    window_days: u32,
) -> Vec<&'a FactRecord> {
    let start = as_of
        .checked_sub_signed(Duration::days(i64::from(window_days) - 1))
        .unwrap_or(NaiveDate::MIN);
    history
        .iter()
        .copied()
        .filter(|f| f.date >= start && f.date <= as_of)
        .collect()
}

fn summarize_window(slice: &[&FactRecord], window_days: u32) -> WindowSummary {
    if slice.is_empty() {
        return WindowSummary::empty(window_days);
    }

    let claims: Vec<f64> = slice.iter().map(|f| f.claims_cnt as f64).collect();
    let zscores: Vec<f64> = slice.iter().map(|f| f.zscore_allowed_amt).collect();
    let (mean_daily_claims, claims_std) = mean_std(&claims);
    let (mean_zscore_allowed, zscore_std) = mean_std(&zscores);

    WindowSummary {
        window_days,
        n_active_days: distinct_days(slice),
        total_claims: claims.iter().sum(),
        mean_daily_claims,
        mean_allowed_amt: running_mean(slice.iter().map(|f| f.avg_allowed_amt)),
        mean_zscore_allowed,
        claims_std,
        zscore_std,
    }
}

fn trend_feature(summaries: &[WindowSummary], window_days: u32) -> Option<TrendFeature> {
    let recent = summaries.iter().find(|s| s.window_days == window_days)?;
    let double = summaries.iter().find(|s| s.window_days == window_days * 2)?;
    let previous_total = double.total_claims - recent.total_claims;

    Some(TrendFeature {
        window_days,
        claims_delta: recent.total_claims - previous_total,
        zscore_delta: recent.mean_zscore_allowed - double.mean_zscore_allowed,
    })
}

fn distinct_days(facts: &[&FactRecord]) -> u32 {
    facts.iter().map(|f| f.date).collect::<HashSet<_>>().len() as u32
}

/// Incremental mean; stays finite for finite inputs where a plain sum would
/// overflow. Empty input gives 0.
fn running_mean(vals: impl IntoIterator<Item = f64>) -> f64 {
    vals.into_iter()
        .enumerate()
        .fold(0.0, |mean, (i, v)| mean + (v - mean) / (i + 1) as f64)
}

/// Mean and population standard deviation.
fn mean_std(vals: &[f64]) -> (f64, f64) {
    if vals.is_empty() {
        return (0.0, 0.0);
    }
    let mean = running_mean(vals.iter().copied());
    let variance = running_mean(vals.iter().map(|v| (v - mean).powi(2)));
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{date, fact, fact_with};

    #[test]
    fn scenario_two_facts_in_thirty_day_window() {
        let facts = vec![fact("2021-01-01", "P1", 10), fact("2021-01-05", "P1", 20)];
        let rows = aggregate_snapshot(&facts, date("2021-01-10"), &[30]);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        let window = row.window(30).unwrap();
        assert_eq!(window.n_active_days, 2);
        assert_eq!(window.total_claims, 30.0);
        assert_eq!(window.mean_daily_claims, 15.0);
        assert_eq!(window.claims_std, 5.0);
        assert_eq!(row.lifetime.first_activity, date("2021-01-01"));
        assert_eq!(row.lifetime.last_activity, date("2021-01-05"));
        assert_eq!(row.lifetime.days_since_last, 5);
        assert_eq!(row.lifetime.total_claims, 30.0);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        // as_of 2021-01-30 with w = 30 covers 2021-01-01 ..= 2021-01-30.
        let facts = vec![
            fact("2020-12-31", "P1", 100),
            fact("2021-01-01", "P1", 1),
            fact("2021-01-30", "P1", 2),
        ];
        let rows = aggregate_snapshot(&facts, date("2021-01-30"), &[30]);
        let window = rows[0].window(30).unwrap();
        assert_eq!(window.total_claims, 3.0);
        assert_eq!(window.n_active_days, 2);
        assert_eq!(rows[0].lifetime.total_claims, 103.0);
    }

    #[test]
    fn empty_window_is_zero_filled() {
        let facts = vec![fact_with("2020-01-01", "P1", 7, 250.0, 1.5)];
        let rows = aggregate_snapshot(&facts, date("2021-01-01"), &[30, 90]);
        assert_eq!(rows[0].window(30), Some(&WindowSummary::empty(30)));
        assert_eq!(rows[0].window(90), Some(&WindowSummary::empty(90)));
        assert_eq!(rows[0].feature_columns().len(), feature_column_names(&[30, 90]).len());
    }

    #[test]
    fn future_facts_and_inactive_providers_are_excluded() {
        let facts = vec![fact("2021-01-01", "P1", 1), fact("2021-02-01", "P2", 5)];
        let rows = aggregate_snapshot(&facts, date("2021-01-15"), &[30]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider_id, "P1");
        assert!(aggregate_snapshot(&facts, date("2020-12-31"), &[30]).is_empty());
    }

    #[test]
    fn trend_subtracts_previous_half_of_double_window() {
        // 90d holds 50 claims, the 90 days before hold 20.
        let facts = vec![
            fact_with("2021-01-15", "P1", 20, 100.0, 1.0),
            fact_with("2021-06-01", "P1", 50, 100.0, 3.0),
        ];
        let rows = aggregate_snapshot(&facts, date("2021-06-30"), &[90, 180]);
        let trend = rows[0].trend(90).unwrap();
        assert_eq!(trend.claims_delta, 30.0);
        assert_eq!(trend.zscore_delta, 3.0 - 2.0);
        assert_eq!(rows[0].feature("claims_90d_vs_prev90d"), Some(30.0));
    }

    #[test]
    fn trend_columns_are_omitted_without_doubling_pair() {
        let facts = vec![fact("2021-01-01", "P1", 1)];
        let rows = aggregate_snapshot(&facts, date("2021-01-01"), &[30, 90, 365]);
        assert!(rows[0].trends.is_empty());
        assert_eq!(rows[0].feature("claims_90d_vs_prev90d"), None);
    }

    #[test]
    fn trend_pairs_follow_configured_order() {
        assert_eq!(trend_pairs(&[30, 90, 180, 365]), vec![90]);
        assert_eq!(trend_pairs(&[180, 30, 90, 60]), vec![90, 30]);
        assert!(trend_pairs(&[30, 45]).is_empty());
    }

    #[test]
    fn active_days_count_distinct_dates() {
        let facts = vec![
            fact("2021-01-02", "P1", 1),
            fact("2021-01-02", "P1", 3),
            fact("2021-01-03", "P1", 2),
        ];
        let rows = aggregate_snapshot(&facts, date("2021-01-03"), &[30]);
        assert_eq!(rows[0].window(30).unwrap().n_active_days, 2);
        assert_eq!(rows[0].lifetime.n_active_days, 2);
        assert_eq!(rows[0].window(30).unwrap().mean_daily_claims, 2.0);
    }

    #[test]
    fn means_of_huge_amounts_stay_finite() {
        let facts = vec![
            fact_with("2021-01-02", "P1", 1, 1e308, 1e308),
            fact_with("2021-01-03", "P1", 1, 1e308, 1e308),
        ];
        let rows = aggregate_snapshot(&facts, date("2021-01-03"), &[30]);
        let window = rows[0].window(30).unwrap();
        assert_eq!(window.mean_allowed_amt, 1e308);
        assert_eq!(window.mean_zscore_allowed, 1e308);
        assert_eq!(window.zscore_std, 0.0);
        assert_eq!(rows[0].lifetime.mean_zscore, 1e308);
    }

    #[test]
    fn window_longer_than_the_calendar_starts_at_the_earliest_date() {
        let facts = vec![fact("2021-01-02", "P1", 4)];
        let rows = aggregate_snapshot(&facts, date("2021-01-31"), &[30, u32::MAX]);
        assert_eq!(rows[0].window(u32::MAX).unwrap().total_claims, 4.0);
    }
}
