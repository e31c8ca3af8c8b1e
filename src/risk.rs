use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::detectors::DetectorId;
use crate::error::{PipelineError, Result};
use crate::flags::dense_rank_desc;
use crate::models::{ProviderSnapshot, TrendFeature};

pub const NORMALIZE_EPSILON: f64 = 1e-9;
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// The six inputs of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskSignal {
    Isolation,
    Density,
    FlagCount,
    Momentum,
    ZscoreShift,
    Recency,
}

impl RiskSignal {
    pub const ALL: [RiskSignal; 6] = [
        RiskSignal::Isolation,
        RiskSignal::Density,
        RiskSignal::FlagCount,
        RiskSignal::Momentum,
        RiskSignal::ZscoreShift,
        RiskSignal::Recency,
    ];

    pub fn key(self) -> &'static str {
        match self {
            RiskSignal::Isolation => "isolation",
            RiskSignal::Density => "density",
            RiskSignal::FlagCount => "flag_count",
            RiskSignal::Momentum => "momentum",
            RiskSignal::ZscoreShift => "zscore_shift",
            RiskSignal::Recency => "recency",
        }
    }

    pub fn default_weight(self) -> f64 {
        match self {
            RiskSignal::Isolation => 0.30,
            RiskSignal::Density => 0.25,
            RiskSignal::FlagCount => 0.20,
            RiskSignal::Momentum => 0.10,
            RiskSignal::ZscoreShift => 0.10,
            RiskSignal::Recency => 0.05,
        }
    }

    /// Signals where a lower raw value means more risk.
    fn lower_is_riskier(self) -> bool {
        matches!(self, RiskSignal::Isolation | RiskSignal::Density)
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }
}

/// Weights for the six signals, known to be complete, non-negative and to
/// sum to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskWeights([f64; 6]);

impl RiskWeights {
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self> {
        if let Some(unknown) = map
            .keys()
            .find(|key| !RiskSignal::ALL.iter().any(|s| s.key() == key.as_str()))
        {
            return Err(PipelineError::InvalidWeightConfig(format!(
                "unknown signal `{unknown}`"
            )));
        }

        let mut weights = [0.0; 6];
        for signal in RiskSignal::ALL {
            let weight = *map.get(signal.key()).ok_or_else(|| {
                PipelineError::InvalidWeightConfig(format!("missing weight for `{}`", signal.key()))
            })?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(PipelineError::InvalidWeightConfig(format!(
                    "weight for `{}` must be a non-negative number, got {weight}",
                    signal.key()
                )));
            }
            weights[signal.index()] = weight;
        }

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PipelineError::InvalidWeightConfig(format!(
                "weights sum to {sum}, expected 1.0"
            )));
        }

        Ok(Self(weights))
    }

    pub fn get(&self, signal: RiskSignal) -> f64 {
        self.0[signal.index()]
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self(RiskSignal::ALL.map(RiskSignal::default_weight))
    }
}

/// Scores one snapshot's cross-section in place: `provider_risk_raw`,
/// `provider_risk_score` and `risk_rank`. Expects the ensemble and flag
/// combiner to have run.
pub fn score_snapshot(
    rows: &mut [ProviderSnapshot],
    weights: &RiskWeights,
    trend_window: u32,
    as_of: NaiveDate,
) -> Result<()> {
    let raw_signals = rows
        .iter()
        .map(|row| signal_values(row, trend_window, as_of))
        .collect::<Result<Vec<[f64; 6]>>>()?;

    let mut composite = vec![0.0; rows.len()];
    for signal in RiskSignal::ALL {
        let column: Vec<f64> = raw_signals
            .iter()
            .map(|values| {
                let value = values[signal.index()];
                if signal.lower_is_riskier() {
                    -value
                } else {
                    value
                }
            })
            .collect();
        for (total, value) in composite.iter_mut().zip(normalize(&column)) {
            *total += weights.get(signal) * value;
        }
    }

    let scores = percentile_rank(&composite);
    let ranks = dense_rank_desc(&scores);
    for (i, row) in rows.iter_mut().enumerate() {
        row.provider_risk_raw = composite[i];
        row.provider_risk_score = scores[i];
        row.risk_rank = ranks[i];
    }

    Ok(())
}

fn signal_values(row: &ProviderSnapshot, trend_window: u32, as_of: NaiveDate) -> Result<[f64; 6]> {
    let missing = |column: String| PipelineError::MissingColumn { column, as_of };
    let detector_score = |detector: DetectorId| {
        row.signal(&detector)
            .map(|s| s.score)
            .ok_or_else(|| missing(detector.score_field()))
    };
    let column = |name: String| match row.feature(&name) {
        Some(value) if value.is_finite() => Ok(value),
        Some(_) => Err(PipelineError::NonFiniteFeature {
            column: name,
            provider_id: row.provider_id.clone(),
            as_of,
        }),
        None => Err(missing(name)),
    };

    Ok([
        detector_score(DetectorId::Isolation)?,
        detector_score(DetectorId::DensityOutlier)?,
        f64::from(row.anomaly_total_flags),
        column(TrendFeature::claims_column(trend_window))?,
        column(TrendFeature::zscore_column(trend_window))?,
        row.lifetime.days_since_last as f64,
    ])
}

/// Min-max scaling to [0, 1). A constant input (including a single value)
/// maps to all zeros.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > min) {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| (v - min) / (max - min + NORMALIZE_EPSILON))
        .collect()
}

/// Mid-rank percentile: `(count below + half the count equal) / n`, which is
/// `(average rank - 0.5) / n`. Ties share a value, a two-way tie of the whole
/// population gives 0.5 to both, and every value lies in [0, 1].
pub fn percentile_rank(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    values
        .iter()
        .map(|v| {
            let below = sorted.partition_point(|s| s.total_cmp(v).is_lt());
            let not_above = sorted.partition_point(|s| s.total_cmp(v).is_le());
            let equal = (not_above - below) as f64;
            (below as f64 + 0.5 * equal) / n
        })
        .collect()
}
