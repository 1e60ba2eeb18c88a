//! # PrefRank
//!
//! A preference-learning library that fits models predicting rankings,
//! subset choices and discrete selections over variable-size sets of
//! objects described by feature vectors. Every model family shares one
//! structural core: decompose the combinatorial judgment into pairwise
//! sub-problems, train a shared-weight scoring function over the pairs,
//! recombine the pairwise outputs into a per-object utility and derive the
//! final decision from those utilities.
//!
//! ## Quick Start
//!
//! ```rust
//! use prefrank::data::{linear_discrete_choice, Batched, SyntheticConfig};
//! use prefrank::learner::{DiscreteChooser, FetaDiscreteChoiceFunction, Trainable};
//! use prefrank::FitOptions;
//!
//! let (x, y) = linear_discrete_choice(&SyntheticConfig {
//!     n_instances: 50,
//!     ..SyntheticConfig::default()
//! });
//!
//! let mut learner = FetaDiscreteChoiceFunction::new(
//!     FetaDiscreteChoiceFunction::default_config(),
//! )
//! .unwrap();
//! let opts = FitOptions { epochs: 5, ..FitOptions::default() };
//! learner.fit(&x.view(), &y, &opts).unwrap();
//!
//! let choices = learner.predict(&Batched::single(x)).unwrap();
//! println!("selected objects: {:?}", choices.as_single().unwrap());
//! ```
//!
//! ## Core Modules
//!
//! - [`config`] - Explicit configuration structs with TOML loading
//! - [`data`] - Query-set batches, pairwise decomposition, synthetic tasks
//! - [`models`] - RankNet, CmpNet and FETA scoring cores
//! - [`learner`] - Fit/predict lifecycle and the concrete learner variants
//! - [`checkpoint`] - Versioned weight persistence and clear-and-rebuild

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod decision;
pub mod error;
pub mod learner;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod neural;

pub use checkpoint::{Checkpointable, CheckpointError};
pub use config::{
    ConfigError, FitOptions, Metric, OptimizerConfig, OptimizerKind, RegularizerConfig,
    ScoringConfig, TunableParameters,
};
pub use data::{Batched, PairwiseDataset};
pub use decision::{argmax_choice, choose_by_threshold, rank_by_scores, DEFAULT_THRESHOLD};
pub use error::{LearnerError, LearnerResult};
pub use learner::{
    ChoiceFunction, CmpNetDiscreteChoiceFunction, CmpNetRanker, DiscreteChooser,
    FetaChoiceFunction, FetaDiscreteChoiceFunction, ObjectRanker, RankNetChoiceFunction,
    RankNetDiscreteChoiceFunction, RankNetRanker, ScoreProducer, Trainable,
};
pub use learner::{tune_threshold, ThresholdSearch};
pub use models::{CmpNetCore, EpochMetrics, FetaCore, RankNetCore, TrainingReport};
pub use neural::{Activation, Initializer, Loss};
