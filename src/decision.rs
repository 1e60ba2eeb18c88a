//! Decision layer: convert per-object utility scores into the requested
//! output type.
//!
//! The three modes are stateless transformations over the scores a model
//! produces; only the choice threshold is learner state, passed in by the
//! caller.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::metrics::argmax_row;

/// Default choice threshold used when no tuned value is available
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Rank objects by descending utility.
///
/// Returns rank positions: entry `i` is the position of object `i` in the
/// sorted order, 0 for the highest-scored object. Equal scores keep their
/// enumeration order (stable sort), with no further tie-break.
pub fn rank_by_scores(scores: &ArrayView2<f32>) -> Array2<usize> {
    let (n_instances, n_objects) = scores.dim();
    let mut rankings = Array2::zeros((n_instances, n_objects));
    for (row_idx, row) in scores.axis_iter(Axis(0)).enumerate() {
        let mut order: Vec<usize> = (0..n_objects).collect();
        order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
        for (position, &object) in order.iter().enumerate() {
            rankings[[row_idx, object]] = position;
        }
    }
    rankings
}

/// Select every object whose score exceeds the threshold
pub fn choose_by_threshold(scores: &ArrayView2<f32>, threshold: f32) -> Array2<bool> {
    scores.mapv(|s| s > threshold)
}

/// Select the single highest-scored object per instance, first occurrence
/// on ties
pub fn argmax_choice(scores: &ArrayView2<f32>) -> Array1<usize> {
    let mut choices = Array1::zeros(scores.nrows());
    for (idx, row) in scores.axis_iter(Axis(0)).enumerate() {
        choices[idx] = argmax_row(&row);
    }
    choices
}
