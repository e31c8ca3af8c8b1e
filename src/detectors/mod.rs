//! Cross-sectional anomaly ensemble.
//!
//! Each detector is a pure function from a [`FeatureMatrix`] to per-row scores
//! and flags. Nothing is fitted ahead of time or kept afterwards: every
//! snapshot is scored from scratch.

mod isolation;
mod lof;
mod zscore;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::DetectorParams;
use crate::error::{PipelineError, Result};
use crate::models::{AnomalySignal, ProviderSnapshot};

pub use isolation::isolation_forest;
pub use lof::local_outlier_factor;
pub use zscore::zscore_flags;

/// Identifies a detector output. Flag and score field names are derived from
/// here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DetectorId {
    DensityOutlier,
    Isolation,
    Statistical(String),
}

impl DetectorId {
    pub fn score_field(&self) -> String {
        match self {
            DetectorId::DensityOutlier => "lof_score".to_string(),
            DetectorId::Isolation => "iforest_score".to_string(),
            DetectorId::Statistical(column) => format!("{column}_z"),
        }
    }

    pub fn flag_field(&self) -> String {
        match self {
            DetectorId::DensityOutlier => "lof_flag".to_string(),
            DetectorId::Isolation => "iforest_flag".to_string(),
            DetectorId::Statistical(column) => format!("{column}_z_flag"),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            DetectorId::DensityOutlier => "local outlier factor",
            DetectorId::Isolation => "isolation forest",
            DetectorId::Statistical(column) => column,
        }
    }
}

/// Detectors run for a configuration, in output order.
pub fn registry(params: &DetectorParams) -> Vec<DetectorId> {
    let mut detectors = vec![DetectorId::Isolation, DetectorId::DensityOutlier];
    detectors.extend(
        params
            .zscore_columns
            .iter()
            .map(|column| DetectorId::Statistical(column.clone())),
    );
    detectors
}

/// Scores and flags of one detector, indexed like the matrix rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub scores: Vec<f64>,
    pub flags: Vec<bool>,
}

/// Dense, row-major numeric matrix over named snapshot columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Fails with `MissingColumn` if any row lacks one of `columns`, and with
    /// `NonFiniteFeature` if a cell is infinite or NaN.
    pub fn from_snapshots(
        snapshots: &[ProviderSnapshot],
        columns: &[String],
        as_of: NaiveDate,
    ) -> Result<Self> {
        let rows = snapshots
            .iter()
            .map(|snapshot| {
                columns
                    .iter()
                    .map(|column| {
                        let value = snapshot.feature(column).ok_or_else(|| {
                            PipelineError::MissingColumn {
                                column: column.clone(),
                                as_of,
                            }
                        })?;
                        if !value.is_finite() {
                            return Err(PipelineError::NonFiniteFeature {
                                column: column.clone(),
                                provider_id: snapshot.provider_id.clone(),
                                as_of,
                            });
                        }
                        Ok(value)
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            columns: columns.to_vec(),
            rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[index]).collect()
    }
}

/// Runs every registered detector over one snapshot's cross-section and
/// attaches the signals to the rows. All matrices are built and all scores
/// checked before any row is touched, so a failed run leaves them unchanged.
pub fn run_ensemble(
    snapshots: &mut [ProviderSnapshot],
    as_of: NaiveDate,
    params: &DetectorParams,
) -> Result<()> {
    let features = FeatureMatrix::from_snapshots(snapshots, &params.feature_columns, as_of)?;
    let statistical = FeatureMatrix::from_snapshots(snapshots, &params.zscore_columns, as_of)?;

    let isolation = isolation_forest(
        &features,
        params.n_trees,
        params.max_samples,
        params.contamination,
        params.seed,
    );
    let density = local_outlier_factor(&features, params.n_neighbors, params.contamination);
    let zscores = zscore_flags(&statistical, params.z_threshold);

    debug!(
        %as_of,
        rows = features.n_rows(),
        iforest_flags = isolation.flags.iter().filter(|f| **f).count(),
        lof_flags = density.flags.iter().filter(|f| **f).count(),
        "anomaly ensemble fitted"
    );

    let outputs: Vec<(DetectorId, DetectorOutput)> = registry(params)
        .into_iter()
        .zip(std::iter::once(isolation).chain(std::iter::once(density)).chain(zscores))
        .collect();

    // Extreme but finite features can still overflow distances or variances.
    for (detector, output) in &outputs {
        if let Some(i) = output.scores.iter().position(|s| !s.is_finite()) {
            return Err(PipelineError::NonFiniteScore {
                detector: detector.label().to_string(),
                provider_id: snapshots[i].provider_id.clone(),
                as_of,
            });
        }
    }

    for (i, snapshot) in snapshots.iter_mut().enumerate() {
        snapshot.signals = outputs
            .iter()
            .map(|(detector, output)| AnomalySignal {
                detector: detector.clone(),
                score: output.scores[i],
                flag: output.flags[i],
            })
            .collect();
    }

    Ok(())
}

/// Percentile with linear interpolation between closest ranks, `q` in [0, 100].
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::fixtures::{date, fact};
    use crate::window::aggregate_snapshot;

    #[test]
    fn percentile_interpolates_linearly() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 4.0);
        assert_eq!(percentile(&values, 50.0), 2.5);
        assert!((percentile(&values, 2.0) - 1.06).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 2.0), 7.0);
    }

    #[test]
    fn registry_declares_one_flag_per_statistical_column() {
        let mut params = PipelineConfig::default().validate().unwrap().detectors;
        params.zscore_columns = vec!["total_claims_90d".to_string(), "days_since_last".to_string()];
        let flags: Vec<String> = registry(&params).iter().map(DetectorId::flag_field).collect();
        assert_eq!(
            flags,
            vec![
                "iforest_flag",
                "lof_flag",
                "total_claims_90d_z_flag",
                "days_since_last_z_flag"
            ]
        );
    }

    #[test]
    fn missing_column_is_reported_before_fitting() {
        let as_of = date("2021-01-31");
        let mut rows = aggregate_snapshot(&[fact("2021-01-02", "P1", 3)], as_of, &[30]);
        let mut params = PipelineConfig::default().validate().unwrap().detectors;
        params.zscore_columns = vec!["total_claims_90d".to_string()];
        params.feature_columns = vec!["total_claims_30d".to_string()];

        let err = run_ensemble(&mut rows, as_of, &params).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingColumn { ref column, .. } if column == "total_claims_90d"
        ));
        assert!(rows[0].signals.is_empty());
    }

    #[test]
    fn non_finite_cells_name_the_provider_and_column() {
        let as_of = date("2021-01-31");
        let facts = [fact("2021-01-02", "P1", 3), fact("2021-01-05", "P2", 4)];
        let mut rows = aggregate_snapshot(&facts, as_of, &[30]);
        rows[1].windows[0].zscore_std = f64::INFINITY;

        let err = FeatureMatrix::from_snapshots(&rows, &["zscore_std_30d".to_string()], as_of)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NonFiniteFeature { ref column, ref provider_id, .. }
                if column == "zscore_std_30d" && provider_id == "P2"
        ));
    }

    #[test]
    fn ensemble_attaches_every_registered_signal() {
        let as_of = date("2021-01-31");
        let facts: Vec<_> = (1..=12)
            .map(|i| fact("2021-01-10", &format!("P{i:02}"), i))
            .collect();
        let mut rows = aggregate_snapshot(&facts, as_of, &[30, 60]);
        let mut params = PipelineConfig::default().validate().unwrap().detectors;
        params.feature_columns = vec!["total_claims_30d".to_string()];
        params.zscore_columns = vec!["total_claims_30d".to_string(), "days_since_last".to_string()];

        run_ensemble(&mut rows, as_of, &params).unwrap();
        for row in &rows {
            assert_eq!(row.signals.len(), 4);
            assert!(row.signal(&DetectorId::Isolation).is_some());
            assert!(row.signal(&DetectorId::DensityOutlier).is_some());
            // days_since_last is identical for everyone: zero variance, no flag.
            let recency = row
                .signal(&DetectorId::Statistical("days_since_last".to_string()))
                .unwrap();
            assert_eq!(recency.score, 0.0);
            assert!(!recency.flag);
        }
    }
}
