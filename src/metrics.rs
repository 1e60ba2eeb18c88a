//! Evaluation metrics for rankings, choices and pairwise decisions.

use ndarray::{ArrayView1, ArrayView2};

/// Fraction of probabilities on the correct side of 0.5
pub fn binary_accuracy(predictions: &ArrayView2<f32>, targets: &ArrayView2<f32>) -> f32 {
    if predictions.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(targets.iter())
        .filter(|(&p, &y)| (p > 0.5) == (y > 0.5))
        .count();
    correct as f32 / predictions.len() as f32
}

/// Index of the row maximum, first occurrence on ties
pub fn argmax_row(row: &ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = idx;
        }
    }
    best
}

/// Fraction of instances whose top-scored object is the selected one
pub fn categorical_accuracy(scores: &ArrayView2<f32>, one_hot: &ArrayView2<f32>) -> f32 {
    if scores.nrows() == 0 {
        return 0.0;
    }
    let correct = scores
        .rows()
        .into_iter()
        .zip(one_hot.rows().into_iter())
        .filter(|(s, y)| argmax_row(s) == argmax_row(y))
        .count();
    correct as f32 / scores.nrows() as f32
}

/// Fraction of instances whose selected object appears among the `k`
/// highest-scored objects
pub fn top_k_categorical_accuracy(
    scores: &ArrayView2<f32>,
    one_hot: &ArrayView2<f32>,
    k: usize,
) -> f32 {
    if scores.nrows() == 0 {
        return 0.0;
    }
    let correct = scores
        .rows()
        .into_iter()
        .zip(one_hot.rows().into_iter())
        .filter(|(s, y)| {
            let selected = argmax_row(y);
            let target_score = s[selected];
            let better = s.iter().filter(|&&v| v > target_score).count();
            better < k
        })
        .count();
    correct as f32 / scores.nrows() as f32
}

/// Sample-averaged F1 between predicted and true choice sets.
///
/// Each instance contributes its own F1 (`2tp / (2tp + fp + fn)`, zero when
/// the denominator is zero); the result is the mean over instances.
pub fn f1_samples(y_true: &ArrayView2<f32>, y_pred: &ArrayView2<bool>) -> f32 {
    if y_true.nrows() == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for (true_row, pred_row) in y_true.rows().into_iter().zip(y_pred.rows().into_iter()) {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        for (&y, &p) in true_row.iter().zip(pred_row.iter()) {
            let y = y > 0.5;
            match (y, p) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }
        let denom = 2 * tp + fp + fn_;
        if denom > 0 {
            total += 2.0 * tp as f32 / denom as f32;
        }
    }
    total / y_true.nrows() as f32
}

/// Kendall rank correlation between two rank-position vectors
pub fn kendall_tau(a: &ArrayView1<usize>, b: &ArrayView1<usize>) -> f32 {
    let n = a.len();
    if n < 2 {
        return 1.0;
    }
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let da = a[i] as i64 - a[j] as i64;
            let db = b[i] as i64 - b[j] as i64;
            let product = da * db;
            if product > 0 {
                concordant += 1;
            } else if product < 0 {
                discordant += 1;
            }
        }
    }
    let pairs = (n * (n - 1) / 2) as f32;
    (concordant - discordant) as f32 / pairs
}

/// Mean Kendall tau over a batch of rankings
pub fn mean_kendall_tau(a: &ArrayView2<usize>, b: &ArrayView2<usize>) -> f32 {
    if a.nrows() == 0 {
        return 0.0;
    }
    let total: f32 = a
        .rows()
        .into_iter()
        .zip(b.rows().into_iter())
        .map(|(x, y)| kendall_tau(&x, &y))
        .sum();
    total / a.nrows() as f32
}
