//! Query-set batch containers.
//!
//! A batch holds query sets of one fixed size; sets of different sizes are
//! kept in a map from set size to batch and never mixed in one array. The
//! [`Batched`] container carries either shape through the predict pipeline
//! and returns results in the same shape.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array3};

use crate::error::LearnerResult;

/// Either a single fixed-size batch or a mapping from query-set size to
/// batches of that size.
#[derive(Debug, Clone, PartialEq)]
pub enum Batched<T> {
    Single(T),
    BySize(BTreeMap<usize, T>),
}

impl<T> Batched<T> {
    pub fn single(value: T) -> Self {
        Batched::Single(value)
    }

    pub fn by_size(map: BTreeMap<usize, T>) -> Self {
        Batched::BySize(map)
    }

    /// Apply a transformation per batch, preserving the shape
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Batched<U> {
        match self {
            Batched::Single(value) => Batched::Single(f(value)),
            Batched::BySize(map) => {
                Batched::BySize(map.iter().map(|(&size, value)| (size, f(value))).collect())
            }
        }
    }

    /// Apply a fallible transformation per batch, preserving the shape
    pub fn try_map<U>(&self, mut f: impl FnMut(&T) -> LearnerResult<U>) -> LearnerResult<Batched<U>> {
        match self {
            Batched::Single(value) => Ok(Batched::Single(f(value)?)),
            Batched::BySize(map) => {
                let mut result = BTreeMap::new();
                for (&size, value) in map {
                    result.insert(size, f(value)?);
                }
                Ok(Batched::BySize(result))
            }
        }
    }

    pub fn as_single(&self) -> Option<&T> {
        match self {
            Batched::Single(value) => Some(value),
            Batched::BySize(_) => None,
        }
    }
}

/// Feature batches: `(n_instances, n_objects, n_features)` per entry
pub type FeatureBatches = Batched<Array3<f32>>;
/// Utility scores: `(n_instances, n_objects)` per entry
pub type ScoreBatches = Batched<Array2<f32>>;
/// Rank positions per object, 0 = most preferred
pub type RankingBatches = Batched<Array2<usize>>;
/// Boolean choice sets
pub type ChoiceBatches = Batched<Array2<bool>>;
/// Discrete choices: index of the selected object per instance
pub type DiscreteBatches = Batched<Array1<usize>>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_map_preserves_by_size_keys() {
        let mut map = BTreeMap::new();
        map.insert(3, Array3::<f32>::zeros((2, 3, 4)));
        map.insert(5, Array3::<f32>::zeros((1, 5, 4)));
        let batches = FeatureBatches::by_size(map);

        let sizes = batches.map(|batch| batch.dim().1);
        match sizes {
            Batched::BySize(map) => {
                assert_eq!(map[&3], 3);
                assert_eq!(map[&5], 5);
            }
            Batched::Single(_) => panic!("expected per-size result"),
        }
    }

    #[test]
    fn test_single_round_trip() {
        let batches = FeatureBatches::single(Array3::zeros((2, 3, 4)));
        assert!(batches.as_single().is_some());
    }
}
