//! Synthetic preference datasets for validation experiments.
//!
//! Each generator draws query sets of feature vectors and labels them with a
//! hidden linear utility, giving a task where the true preference is known
//! exactly. Used by the integration tests and benchmark scenarios.

use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::decision::rank_by_scores;

/// Configuration for synthetic dataset generation
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub n_instances: usize,
    pub n_objects: usize,
    pub n_features: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_instances: 500,
            n_objects: 5,
            n_features: 2,
            seed: 42,
        }
    }
}

fn draw_features(config: &SyntheticConfig, rng: &mut StdRng) -> (Array3<f32>, Array1<f32>) {
    let features = Array3::from_shape_fn(
        (config.n_instances, config.n_objects, config.n_features),
        |_| rng.gen::<f32>() * 2.0 - 1.0,
    );
    let weights = Array1::from_shape_fn(config.n_features, |_| rng.gen::<f32>());
    (features, weights)
}

fn utilities(features: &Array3<f32>, weights: &Array1<f32>) -> Array2<f32> {
    let (n_instances, n_objects, _) = features.dim();
    let mut scores = Array2::zeros((n_instances, n_objects));
    for (instance, set) in features.axis_iter(Axis(0)).enumerate() {
        let row = set.dot(weights);
        scores.row_mut(instance).assign(&row);
    }
    scores
}

/// Discrete choice task: the true choice is the argmax of a hidden linear
/// utility. Labels are one-hot.
pub fn linear_discrete_choice(config: &SyntheticConfig) -> (Array3<f32>, Array2<f32>) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (features, weights) = draw_features(config, &mut rng);
    let scores = utilities(&features, &weights);

    let mut labels = Array2::zeros((config.n_instances, config.n_objects));
    for (instance, row) in scores.axis_iter(Axis(0)).enumerate() {
        let best = crate::metrics::argmax_row(&row);
        labels[[instance, best]] = 1.0;
    }
    (features, labels)
}

/// Object ranking task: rank positions by descending hidden utility
pub fn linear_rankings(config: &SyntheticConfig) -> (Array3<f32>, Array2<usize>) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (features, weights) = draw_features(config, &mut rng);
    let scores = utilities(&features, &weights);
    let rankings = rank_by_scores(&scores.view());
    (features, rankings)
}

/// Subset choice task: an object is selected when its hidden utility is
/// positive
pub fn linear_subset_choice(config: &SyntheticConfig) -> (Array3<f32>, Array2<f32>) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (features, weights) = draw_features(config, &mut rng);
    let scores = utilities(&features, &weights);
    let labels = scores.mapv(|s| if s > 0.0 { 1.0 } else { 0.0 });
    (features, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SyntheticConfig {
        SyntheticConfig {
            n_instances: 20,
            n_objects: 4,
            n_features: 3,
            seed: 9,
        }
    }

    #[test]
    fn test_discrete_choice_labels_are_one_hot() {
        let (features, labels) = linear_discrete_choice(&small_config());
        assert_eq!(features.dim(), (20, 4, 3));
        for row in labels.axis_iter(Axis(0)) {
            let sum: f32 = row.sum();
            assert_eq!(sum, 1.0);
        }
    }

    #[test]
    fn test_rankings_are_permutations() {
        let (_, rankings) = linear_rankings(&small_config());
        for row in rankings.axis_iter(Axis(0)) {
            let mut positions: Vec<usize> = row.iter().cloned().collect();
            positions.sort_unstable();
            assert_eq!(positions, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_same_seed_reproduces_dataset() {
        let (a, _) = linear_discrete_choice(&small_config());
        let (b, _) = linear_discrete_choice(&small_config());
        assert_eq!(a, b);
    }

    #[test]
    fn test_subset_choice_labels_binary() {
        let (_, labels) = linear_subset_choice(&small_config());
        assert!(labels.iter().all(|&y| y == 0.0 || y == 1.0));
    }
}
