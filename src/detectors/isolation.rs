use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{percentile, DetectorOutput, FeatureMatrix};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Isolation forest decision scores.
///
/// Each tree isolates a random sub-sample of `min(max_samples, n)` rows with
/// random axis-aligned splits. The decision score is the anomaly score minus
/// its `contamination` percentile: negative values are flagged, lower is more
/// anomalous. The same `seed` on the same matrix always gives the same output.
pub fn isolation_forest(
    matrix: &FeatureMatrix,
    n_trees: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
) -> DetectorOutput {
    let n = matrix.n_rows();
    if n < 2 {
        return DetectorOutput {
            scores: vec![0.0; n],
            flags: vec![false; n],
        };
    }

    let sample_size = max_samples.min(n).max(2);
    let max_depth = (sample_size as f64).log2().ceil() as usize;
    let mut rng = StdRng::seed_from_u64(seed);

    let trees: Vec<Node> = (0..n_trees)
        .map(|_| {
            let sample = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
            build_tree(&matrix.rows, sample, 0, max_depth, &mut rng)
        })
        .collect();

    let normalizer = average_path_length(sample_size);
    let anomaly_scores: Vec<f64> = matrix
        .rows
        .iter()
        .map(|row| {
            let mean_depth =
                trees.iter().map(|tree| path_length(tree, row, 0)).sum::<f64>() / trees.len() as f64;
            -(2f64.powf(-mean_depth / normalizer))
        })
        .collect();

    let offset = percentile(&anomaly_scores, 100.0 * contamination);
    let scores: Vec<f64> = anomaly_scores.iter().map(|s| s - offset).collect();
    let flags = scores.iter().map(|&s| s < 0.0).collect();

    DetectorOutput { scores, flags }
}

fn build_tree(
    rows: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let n_features = rows[indices[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|feature| {
            let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(rows[i][feature]), hi.max(rows[i][feature]))
            });
            (lo < hi).then_some((feature, lo, hi))
        })
        .collect();

    if splittable.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = split_point(lo, hi, rng);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| rows[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(rows, left, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(rows, right, depth + 1, max_depth, rng)),
    }
}

/// Uniform threshold in `[lo, hi)`. Falls back to interpolation when the
/// span overflows, since the uniform sampler rejects infinite ranges.
fn split_point(lo: f64, hi: f64, rng: &mut StdRng) -> f64 {
    if ((hi - lo) * 2.0).is_finite() {
        rng.gen_range(lo..hi)
    } else {
        let t: f64 = rng.gen();
        lo * (1.0 - t) + hi * t
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] <= *threshold {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
