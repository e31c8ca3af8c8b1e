use crate::detectors::DetectorId;
use crate::models::ProviderSnapshot;

/// Sums the declared flag of every registered detector into
/// `anomaly_total_flags`, then dense-ranks the cross-section by it (1 = most
/// flags). Call once per snapshot date.
pub fn combine_flags(rows: &mut [ProviderSnapshot], registry: &[DetectorId]) {
    for row in rows.iter_mut() {
        row.anomaly_total_flags = registry
            .iter()
            .filter(|detector| row.signal(detector).is_some_and(|signal| signal.flag))
            .count() as u32;
    }

    let totals: Vec<f64> = rows.iter().map(|r| f64::from(r.anomaly_total_flags)).collect();
    for (row, rank) in rows.iter_mut().zip(dense_rank_desc(&totals)) {
        row.anomaly_rank = rank;
    }
}

/// Dense rank, highest value first: ties share a rank and the next distinct
/// value gets the next integer.
pub fn dense_rank_desc(values: &[f64]) -> Vec<u32> {
    let mut distinct = values.to_vec();
    distinct.sort_by(|a, b| b.total_cmp(a));
    distinct.dedup();

    values
        .iter()
        .map(|v| {
            let position = distinct.partition_point(|d| d.total_cmp(v).is_gt());
            position as u32 + 1
        })
        .collect()
}
