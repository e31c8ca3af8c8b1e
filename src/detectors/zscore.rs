use super::{DetectorOutput, FeatureMatrix};

/// Population z-score of every column, flagged where `|z| > threshold`.
/// Returns one output per column. A zero-variance column scores 0 everywhere.
pub fn zscore_flags(matrix: &FeatureMatrix, threshold: f64) -> Vec<DetectorOutput> {
    (0..matrix.columns.len())
        .map(|index| {
            let values = matrix.column(index);
            let n = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

            let scores: Vec<f64> = values
                .iter()
                .map(|v| if std > 0.0 { (v - mean) / std } else { 0.0 })
                .collect();
            let flags = scores.iter().map(|z| z.abs() > threshold).collect();
            DetectorOutput { scores, flags }
        })
        .collect()
}
