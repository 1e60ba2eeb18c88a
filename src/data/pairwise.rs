//! Pairwise decomposition of preference-labeled query sets.
//!
//! Converts a batch of (query set, preference label) instances into pairwise
//! training examples. Pairs are generated in ordered enumeration of index
//! tuples, identically across calls for the same input shapes, so downstream
//! randomized splits stay reproducible. Both orientations of every unordered
//! pair are emitted together with complementary labels; no self-pairs are
//! generated.

use ndarray::{s, Array1, Array2, ArrayView2, ArrayView3, Axis};

use crate::error::{LearnerError, LearnerResult};

/// Pairwise training examples drawn from a batch of query sets.
///
/// Row `k` pairs the objects `x1[k]` and `x2[k]`; `labels[k]` is 1 when the
/// first object is preferred and 0 for the complementary orientation.
#[derive(Debug, Clone)]
pub struct PairwiseDataset {
    pub x1: Array2<f32>,
    pub x2: Array2<f32>,
    pub labels: Array1<f32>,
}

impl PairwiseDataset {
    pub fn n_pairs(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.x1.ncols()
    }

    /// Two-column targets `(y, 1 - y)` for consumers that train both pair
    /// orientations through mirrored outputs
    pub fn paired_labels(&self) -> Array2<f32> {
        let mut paired = Array2::zeros((self.labels.len(), 2));
        for (idx, &y) in self.labels.iter().enumerate() {
            paired[[idx, 0]] = y;
            paired[[idx, 1]] = 1.0 - y;
        }
        paired
    }
}

fn check_label_shape(
    x: &ArrayView3<f32>,
    y_rows: usize,
    y_cols: usize,
    context: &str,
) -> LearnerResult<()> {
    let (n_instances, n_objects, _) = x.dim();
    if y_rows != n_instances {
        return Err(LearnerError::shape_mismatch(
            n_instances,
            y_rows,
            format!("{} instance axis", context),
        ));
    }
    if y_cols != n_objects {
        return Err(LearnerError::shape_mismatch(
            n_objects,
            y_cols,
            format!("{} object axis", context),
        ));
    }
    Ok(())
}

/// Decompose total rankings into all `n * (n - 1)` ordered pairs per
/// instance.
///
/// `rankings[i][o]` is the rank position of object `o` (0 = most preferred);
/// the pair `(i, j)` is labeled 1 exactly when `i` is ranked above `j`.
pub fn from_rankings(
    x: &ArrayView3<f32>,
    rankings: &ArrayView2<usize>,
) -> LearnerResult<PairwiseDataset> {
    check_label_shape(x, rankings.nrows(), rankings.ncols(), "rankings")?;
    let (n_instances, n_objects, n_features) = x.dim();
    for row in rankings.axis_iter(Axis(0)) {
        let mut seen = vec![false; n_objects];
        for &position in row.iter() {
            if position >= n_objects || seen[position] {
                return Err(LearnerError::invalid_labels(
                    "rankings",
                    format!("row is not a permutation of 0..{}", n_objects),
                ));
            }
            seen[position] = true;
        }
    }

    let total = n_instances * n_objects.saturating_sub(1) * n_objects;
    let mut x1 = Array2::zeros((total, n_features));
    let mut x2 = Array2::zeros((total, n_features));
    let mut labels = Array1::zeros(total);

    let mut k = 0;
    for instance in 0..n_instances {
        for i in 0..n_objects {
            for j in 0..n_objects {
                if i == j {
                    continue;
                }
                x1.row_mut(k).assign(&x.slice(s![instance, i, ..]));
                x2.row_mut(k).assign(&x.slice(s![instance, j, ..]));
                labels[k] = if rankings[[instance, i]] < rankings[[instance, j]] {
                    1.0
                } else {
                    0.0
                };
                k += 1;
            }
        }
    }
    Ok(PairwiseDataset { x1, x2, labels })
}

/// Decompose subset choices (or one-hot discrete choices) into pairs of one
/// selected and one rejected object.
///
/// Pairs between equally labeled objects carry no preference information and
/// are skipped, so an instance with `k` selected objects contributes
/// `2 * k * (n - k)` examples.
pub fn from_choices(
    x: &ArrayView3<f32>,
    choices: &ArrayView2<f32>,
) -> LearnerResult<PairwiseDataset> {
    check_label_shape(x, choices.nrows(), choices.ncols(), "choices")?;
    let (n_instances, n_objects, n_features) = x.dim();
    for &value in choices.iter() {
        if value != 0.0 && value != 1.0 {
            return Err(LearnerError::invalid_labels(
                "choices",
                format!("expected 0/1 entries, found {}", value),
            ));
        }
    }

    let mut total = 0;
    for row in choices.axis_iter(Axis(0)) {
        let selected = row.iter().filter(|&&y| y == 1.0).count();
        total += 2 * selected * (n_objects - selected);
    }

    let mut x1 = Array2::zeros((total, n_features));
    let mut x2 = Array2::zeros((total, n_features));
    let mut labels = Array1::zeros(total);

    let mut k = 0;
    for instance in 0..n_instances {
        for i in 0..n_objects {
            for j in 0..n_objects {
                if i == j || choices[[instance, i]] == choices[[instance, j]] {
                    continue;
                }
                x1.row_mut(k).assign(&x.slice(s![instance, i, ..]));
                x2.row_mut(k).assign(&x.slice(s![instance, j, ..]));
                labels[k] = if choices[[instance, i]] > choices[[instance, j]] {
                    1.0
                } else {
                    0.0
                };
                k += 1;
            }
        }
    }
    Ok(PairwiseDataset { x1, x2, labels })
}
