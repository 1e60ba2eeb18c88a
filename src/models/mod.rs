//! Pairwise scoring models.
//!
//! Three families share the pairwise-decomposition structure: a latent
//! utility tower with mirrored branches ([`ranknet`]), a dual-orientation
//! pairwise comparator ([`cmpnet`]), and the first-evaluate-then-aggregate
//! network ([`feta`]). Each owns its trainable layers; training runs
//! mini-batch gradient descent and produces a [`TrainingReport`].

pub mod cmpnet;
pub mod feta;
pub mod ranknet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub use cmpnet::CmpNetCore;
pub use feta::FetaCore;
pub use ranknet::RankNetCore;

/// Training metrics for a single epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: Option<f32>,
    pub metrics: Vec<(String, f32)>,
    pub learning_rate: f32,
    pub elapsed_ms: u128,
}

/// Complete training result returned by `fit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
    pub final_train_loss: f32,
    pub total_elapsed_ms: u128,
}

impl TrainingReport {
    pub fn final_val_loss(&self) -> Option<f32> {
        self.epochs.last().and_then(|m| m.val_loss)
    }
}

/// Callback invoked with each epoch's metrics
pub type EpochObserver<'a> = &'a mut dyn FnMut(&EpochMetrics);

/// Deterministic per-epoch shuffle of `len` example indices
pub(crate) fn epoch_order(len: usize, epoch: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    if len > 0 {
        indices.sort_by_key(|&i| (i + epoch * 997) % len);
    }
    indices
}

/// Seeded split into (train, holdout) index sets
pub(crate) fn holdout_split(n: usize, fraction: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let holdout = ((n as f32) * fraction).ceil() as usize;
    let holdout = holdout.min(n.saturating_sub(1));
    let (val, train) = indices.split_at(holdout);
    (train.to_vec(), val.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_order_is_a_permutation() {
        let order = epoch_order(10, 3);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_epoch_order_varies_with_epoch() {
        assert_ne!(epoch_order(10, 1), epoch_order(10, 2));
    }

    #[test]
    fn test_holdout_split_sizes() {
        let (train, val) = holdout_split(100, 0.2, 42);
        assert_eq!(val.len(), 20);
        assert_eq!(train.len(), 80);

        let (train, val) = holdout_split(10, 0.0, 42);
        assert_eq!(val.len(), 0);
        assert_eq!(train.len(), 10);
    }

    #[test]
    fn test_holdout_split_deterministic() {
        assert_eq!(holdout_split(50, 0.3, 7), holdout_split(50, 0.3, 7));
        assert_ne!(holdout_split(50, 0.3, 7).0, holdout_split(50, 0.3, 8).0);
    }
}
