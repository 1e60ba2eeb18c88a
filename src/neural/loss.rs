//! Loss functions for the pairwise decision tasks.
//!
//! Each function returns the mean loss together with the gradient on the
//! predictions, so trainers can feed the gradient straight into the layer
//! backward passes.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

const EPS: f32 = 1e-7;

/// Loss function identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    BinaryCrossentropy,
    CategoricalHinge,
}

impl Loss {
    pub const ALLOWED: &'static str = "binary_crossentropy, categorical_hinge";

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "binary_crossentropy" => Ok(Loss::BinaryCrossentropy),
            "categorical_hinge" => Ok(Loss::CategoricalHinge),
            other => Err(ConfigError::unsupported("loss", other, Self::ALLOWED)),
        }
    }

    pub fn evaluate(&self, predictions: &Array2<f32>, targets: &Array2<f32>) -> (f32, Array2<f32>) {
        match self {
            Loss::BinaryCrossentropy => binary_crossentropy(predictions, targets),
            Loss::CategoricalHinge => categorical_hinge(predictions, targets),
        }
    }
}

/// Element-wise binary cross-entropy, averaged over every entry.
///
/// `C = -y log(p) - (1 - y) log(1 - p)`
pub fn binary_crossentropy(
    predictions: &Array2<f32>,
    targets: &Array2<f32>,
) -> (f32, Array2<f32>) {
    let count = predictions.len().max(1) as f32;
    let mut loss = 0.0;
    let mut grad = Array2::zeros(predictions.dim());
    for ((g, &p), &y) in grad.iter_mut().zip(predictions.iter()).zip(targets.iter()) {
        let p_clamped = p.clamp(EPS, 1.0 - EPS);
        loss += -y * p_clamped.ln() - (1.0 - y) * (1.0 - p_clamped).ln();
        // The sigmoid derivative in the layer backward cancels this
        // denominator, leaving the stable (p - y) form.
        *g = (p_clamped - y) / (p_clamped * (1.0 - p_clamped)) / count;
    }
    (loss / count, grad)
}

/// Row-wise categorical hinge over one-hot targets, averaged over rows.
///
/// `C = max(0, 1 - pos + neg)` with `pos` the score of the selected object
/// and `neg` the best score among the rest.
pub fn categorical_hinge(predictions: &Array2<f32>, targets: &Array2<f32>) -> (f32, Array2<f32>) {
    let rows = predictions.nrows().max(1) as f32;
    let mut loss = 0.0;
    let mut grad = Array2::zeros(predictions.dim());
    for (row_idx, (pred_row, target_row)) in predictions
        .rows()
        .into_iter()
        .zip(targets.rows().into_iter())
        .enumerate()
    {
        let mut pos = 0.0;
        let mut neg = f32::NEG_INFINITY;
        let mut neg_idx = 0;
        for (col, (&p, &y)) in pred_row.iter().zip(target_row.iter()).enumerate() {
            if y > 0.5 {
                pos += p;
            } else if p > neg {
                neg = p;
                neg_idx = col;
            }
        }
        if !neg.is_finite() {
            continue;
        }
        let margin = 1.0 - pos + neg;
        if margin > 0.0 {
            loss += margin;
            for (col, &y) in target_row.iter().enumerate() {
                if y > 0.5 {
                    grad[[row_idx, col]] = -1.0 / rows;
                }
            }
            grad[[row_idx, neg_idx]] += 1.0 / rows;
        }
    }
    (loss / rows, grad)
}
