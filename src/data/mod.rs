//! Query-set batches, pairwise decomposition and synthetic datasets.

pub mod pairwise;
pub mod query;
pub mod synthetic;

pub use pairwise::{from_choices, from_rankings, PairwiseDataset};
pub use query::{
    Batched, ChoiceBatches, DiscreteBatches, FeatureBatches, RankingBatches, ScoreBatches,
};
pub use synthetic::{
    linear_discrete_choice, linear_rankings, linear_subset_choice, SyntheticConfig,
};
