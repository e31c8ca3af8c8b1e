use rayon::prelude::*;

use super::{percentile, DetectorOutput, FeatureMatrix};

/// Score reported for every row when the cross-section is too small to have
/// neighbours. Matches the factor of a point exactly as dense as its neighbourhood.
const INLIER_FACTOR: f64 = -1.0;

/// Local outlier factor over Euclidean distance.
///
/// Scores are the negative outlier factor: around -1 for inliers, more
/// negative for points sparser than their neighbourhood. Rows scoring below
/// the `contamination` percentile are flagged.
pub fn local_outlier_factor(
    matrix: &FeatureMatrix,
    n_neighbors: usize,
    contamination: f64,
) -> DetectorOutput {
    let n = matrix.n_rows();
    if n < 2 {
        return DetectorOutput {
            scores: vec![INLIER_FACTOR; n],
            flags: vec![false; n],
        };
    }

    let k = n_neighbors.min(n - 1).max(1);
    let neighborhoods: Vec<Neighborhood> = (0..n)
        .into_par_iter()
        .map(|i| k_nearest(&matrix.rows, i, k))
        .collect();
    let k_distance: Vec<f64> = neighborhoods
        .iter()
        .map(|hood| hood.distances[k - 1])
        .collect();

    let lrd: Vec<f64> = neighborhoods
        .iter()
        .map(|hood| {
            let reach: f64 = hood
                .indices
                .iter()
                .zip(&hood.distances)
                .map(|(&j, &d)| k_distance[j].max(d))
                .sum::<f64>()
                / k as f64;
            1.0 / (reach + 1e-10)
        })
        .collect();

    let scores: Vec<f64> = neighborhoods
        .iter()
        .enumerate()
        .map(|(i, hood)| {
            let ratio: f64 = hood.indices.iter().map(|&j| lrd[j] / lrd[i]).sum::<f64>() / k as f64;
            -ratio
        })
        .collect();

    let offset = percentile(&scores, 100.0 * contamination);
    let flags = scores.iter().map(|&s| s < offset).collect();

    DetectorOutput { scores, flags }
}

/// The `k` closest other rows of one point, nearest first.
struct Neighborhood {
    indices: Vec<usize>,
    distances: Vec<f64>,
}

/// Selects the `k` nearest rows to row `i` without materialising the full
/// distance matrix. Ties go to the lower index.
fn k_nearest(rows: &[Vec<f64>], i: usize, k: usize) -> Neighborhood {
    let by_distance =
        |a: &(f64, usize), b: &(f64, usize)| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1));

    let mut candidates: Vec<(f64, usize)> = rows
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(j, row)| (euclidean(&rows[i], row), j))
        .collect();
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k - 1, by_distance);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(by_distance);

    let (distances, indices) = candidates.into_iter().unzip();
    Neighborhood { indices, distances }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::cluster_with_outlier;

    #[test]
    fn isolated_point_gets_the_lowest_score_and_the_flag() {
        let matrix = cluster_with_outlier();
        let output = local_outlier_factor(&matrix, 20, 0.02);
        let outlier = matrix.n_rows() - 1;

        let min_index = output
            .scores
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(min_index, Some(outlier));
        assert!(output.scores[outlier] < -5.0);
        assert!(output.flags[outlier]);
        assert_eq!(output.flags.iter().filter(|f| **f).count(), 1);
    }

    #[test]
    fn uniform_grid_scores_near_one() {
        let mut matrix = cluster_with_outlier();
        matrix.rows.pop();
        let output = local_outlier_factor(&matrix, 5, 0.02);
        for score in output.scores {
            assert!(score < -0.5 && score > -2.0, "{score}");
        }
    }

    #[test]
    fn neighbourhoods_keep_only_the_closest_rows() {
        let rows: Vec<Vec<f64>> = [0.0, 10.0, 1.0, 3.0, 1.0, 7.0]
            .iter()
            .map(|x| vec![*x])
            .collect();
        let hood = k_nearest(&rows, 0, 3);
        assert_eq!(hood.indices, vec![2, 4, 3]);
        assert_eq!(hood.distances, vec![1.0, 1.0, 3.0]);

        let all = k_nearest(&rows, 1, 10);
        assert_eq!(all.indices, vec![5, 3, 2, 4, 0]);
    }

    #[test]
    fn tiny_cross_sections_do_not_fail() {
        let empty = FeatureMatrix {
            columns: vec!["a".to_string()],
            rows: vec![],
        };
        assert!(local_outlier_factor(&empty, 20, 0.02).scores.is_empty());

        let single = FeatureMatrix {
            columns: vec!["a".to_string()],
            rows: vec![vec![3.0]],
        };
        let output = local_outlier_factor(&single, 20, 0.02);
        assert_eq!(output.scores, vec![INLIER_FACTOR]);
        assert_eq!(output.flags, vec![false]);

        let pair = FeatureMatrix {
            columns: vec!["a".to_string()],
            rows: vec![vec![1.0], vec![1.0]],
        };
        let output = local_outlier_factor(&pair, 20, 0.02);
        assert!(output.scores.iter().all(|s| s.is_finite()));
        assert_eq!(output.flags, vec![false, false]);
    }
}
