use chrono::NaiveDate;

use crate::detectors::DetectorId;

/// One day of claims activity for one provider, as handed over by a fact source.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub date: NaiveDate,
    pub provider_id: String,
    pub claims_cnt: i64,
    pub avg_allowed_amt: f64,
    pub zscore_allowed_amt: f64,
}

/// Behaviour of one provider over a trailing window ending at the snapshot date.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub window_days: u32,
    pub n_active_days: u32,
    pub total_claims: f64,
    pub mean_daily_claims: f64,
    pub mean_allowed_amt: f64,
    pub mean_zscore_allowed: f64,
    pub claims_std: f64,
    pub zscore_std: f64,
}

impl WindowSummary {
    pub const FIELDS: [&'static str; 7] = [
        "n_active_days",
        "total_claims",
        "mean_daily_claims",
        "mean_allowed_amt",
        "mean_zscore_allowed",
        "claims_std",
        "zscore_std",
    ];

    /// Summary of a window with no facts in range.
    pub fn empty(window_days: u32) -> Self {
        Self {
            window_days,
            n_active_days: 0,
            total_claims: 0.0,
            mean_daily_claims: 0.0,
            mean_allowed_amt: 0.0,
            mean_zscore_allowed: 0.0,
            claims_std: 0.0,
            zscore_std: 0.0,
        }
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        let value = match name {
            "n_active_days" => self.n_active_days as f64,
            "total_claims" => self.total_claims,
            "mean_daily_claims" => self.mean_daily_claims,
            "mean_allowed_amt" => self.mean_allowed_amt,
            "mean_zscore_allowed" => self.mean_zscore_allowed,
            "claims_std" => self.claims_std,
            "zscore_std" => self.zscore_std,
            _ => return None,
        };
        Some(value)
    }

    pub fn column_name(field: &str, window_days: u32) -> String {
        format!("{field}_{window_days}d")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifetimeSummary {
    pub first_activity: NaiveDate,
    pub last_activity: NaiveDate,
    pub total_claims: f64,
    pub n_active_days: u32,
    pub mean_zscore: f64,
    pub days_since_last: i64,
}

impl LifetimeSummary {
    pub const COLUMNS: [&'static str; 4] = [
        "total_claims_lifetime",
        "n_active_days_lifetime",
        "mean_zscore_lifetime",
        "days_since_last",
    ];

    pub fn column(&self, name: &str) -> Option<f64> {
        let value = match name {
            "total_claims_lifetime" => self.total_claims,
            "n_active_days_lifetime" => self.n_active_days as f64,
            "mean_zscore_lifetime" => self.mean_zscore,
            "days_since_last" => self.days_since_last as f64,
            _ => return None,
        };
        Some(value)
    }
}

/// Change of the last `window_days` against the `window_days` before them,
/// derived from a `(w, 2w)` window pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendFeature {
    pub window_days: u32,
    pub claims_delta: f64,
    pub zscore_delta: f64,
}

impl TrendFeature {
    pub fn claims_column(window_days: u32) -> String {
        format!("claims_{window_days}d_vs_prev{window_days}d")
    }

    pub fn zscore_column(window_days: u32) -> String {
        format!("zscore_{window_days}d_vs_prev{window_days}d")
    }
}

/// Raw score and flag produced by one detector for one provider at one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalySignal {
    pub detector: DetectorId,
    pub score: f64,
    pub flag: bool,
}

/// One panel row: everything known about a provider as of one snapshot date.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    pub provider_id: String,
    pub as_of_date: NaiveDate,
    pub lifetime: LifetimeSummary,
    pub windows: Vec<WindowSummary>,
    pub trends: Vec<TrendFeature>,
    pub signals: Vec<AnomalySignal>,
    pub anomaly_total_flags: u32,
    pub anomaly_rank: u32,
    pub provider_risk_raw: f64,
    pub provider_risk_score: f64,
    pub risk_rank: u32,
}

impl ProviderSnapshot {
    pub fn new(
        provider_id: String,
        as_of_date: NaiveDate,
        lifetime: LifetimeSummary,
        windows: Vec<WindowSummary>,
        trends: Vec<TrendFeature>,
    ) -> Self {
        Self {
            provider_id,
            as_of_date,
            lifetime,
            windows,
            trends,
            signals: Vec::new(),
            anomaly_total_flags: 0,
            anomaly_rank: 0,
            provider_risk_raw: 0.0,
            provider_risk_score: 0.0,
            risk_rank: 0,
        }
    }

    pub fn window(&self, window_days: u32) -> Option<&WindowSummary> {
        self.windows.iter().find(|w| w.window_days == window_days)
    }

    pub fn trend(&self, window_days: u32) -> Option<&TrendFeature> {
        self.trends.iter().find(|t| t.window_days == window_days)
    }

    pub fn signal(&self, detector: &DetectorId) -> Option<&AnomalySignal> {
        self.signals.iter().find(|s| &s.detector == detector)
    }

    /// Looks up a numeric feature column by its panel name, e.g.
    /// `total_claims_90d`, `days_since_last` or `claims_90d_vs_prev90d`.
    pub fn feature(&self, column: &str) -> Option<f64> {
        if let Some(value) = self.lifetime.column(column) {
            return Some(value);
        }
        for trend in &self.trends {
            if column == TrendFeature::claims_column(trend.window_days) {
                return Some(trend.claims_delta);
            }
            if column == TrendFeature::zscore_column(trend.window_days) {
                return Some(trend.zscore_delta);
            }
        }
        let (field, window) = column.strip_suffix('d')?.rsplit_once('_')?;
        let window_days: u32 = window.parse().ok()?;
        self.window(window_days)?.field(field)
    }

    /// Every numeric feature column of this row, in panel order.
    pub fn feature_columns(&self) -> Vec<(String, f64)> {
        let mut columns: Vec<(String, f64)> = LifetimeSummary::COLUMNS
            .iter()
            .filter_map(|name| Some((name.to_string(), self.lifetime.column(name)?)))
            .collect();

        for window in &self.windows {
            for field in WindowSummary::FIELDS {
                if let Some(value) = window.field(field) {
                    columns.push((WindowSummary::column_name(field, window.window_days), value));
                }
            }
        }

        for trend in &self.trends {
            columns.push((TrendFeature::claims_column(trend.window_days), trend.claims_delta));
            columns.push((TrendFeature::zscore_column(trend.window_days), trend.zscore_delta));
        }

        columns
    }
}

/// How often one detector fired across a snapshot's cross-section.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSummary {
    pub detector: String,
    pub flagged: usize,
    pub share: f64,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    pub fn fact(day: &str, provider_id: &str, claims: i64) -> FactRecord {
        FactRecord {
            date: date(day),
            provider_id: provider_id.to_string(),
            claims_cnt: claims,
            avg_allowed_amt: 100.0,
            zscore_allowed_amt: 0.0,
        }
    }

    pub fn fact_with(
        day: &str,
        provider_id: &str,
        claims: i64,
        avg_allowed_amt: f64,
        zscore_allowed_amt: f64,
    ) -> FactRecord {
        FactRecord {
            date: date(day),
            provider_id: provider_id.to_string(),
            claims_cnt: claims,
            avg_allowed_amt,
            zscore_allowed_amt,
        }
    }
}
