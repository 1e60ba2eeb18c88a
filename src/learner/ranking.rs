//! Object rankers: learn a utility from total rankings and predict
//! permutations.

use std::path::Path;

use ndarray::{Array2, ArrayView3};

use crate::config::{FitOptions, ScoringConfig, TunableParameters};
use crate::data::pairwise;
use crate::error::LearnerResult;
use crate::learner::{ObjectRanker, ScoreProducer, Trainable};
use crate::models::{CmpNetCore, EpochObserver, RankNetCore, TrainingReport};

/// Object ranker over the RankNet latent-utility core.
///
/// Rankings are decomposed into pairwise preferences; the learned utility
/// induces the predicted permutation.
pub struct RankNetRanker {
    core: RankNetCore,
}

impl RankNetRanker {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        Ok(Self {
            core: RankNetCore::new(config)?,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        self.core.config()
    }

    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        self.core.set_tunable_parameters(params);
    }

    pub fn rebuild_via<P: AsRef<Path>>(&mut self, path: P) -> LearnerResult<()> {
        self.core.rebuild_via(path)
    }
}

impl Trainable for RankNetRanker {
    type Labels = Array2<usize>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        let pairs = pairwise::from_rankings(x, &y.view())?;
        self.core.fit_pairs(&pairs, opts, observer)
    }
}

impl ScoreProducer for RankNetRanker {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl ObjectRanker for RankNetRanker {}

/// Object ranker over the CmpNet pairwise comparator.
pub struct CmpNetRanker {
    core: CmpNetCore,
}

impl CmpNetRanker {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        Ok(Self {
            core: CmpNetCore::new(config)?,
        })
    }

    /// CmpNet defaults per the original architecture: Adam-driven updates
    pub fn default_config() -> ScoringConfig {
        ScoringConfig {
            optimizer: crate::config::OptimizerConfig::adam(0.001),
            ..ScoringConfig::default()
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        self.core.config()
    }

    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        self.core.set_tunable_parameters(params);
    }

    pub fn rebuild_via<P: AsRef<Path>>(&mut self, path: P) -> LearnerResult<()> {
        self.core.rebuild_via(path)
    }
}

impl Trainable for CmpNetRanker {
    type Labels = Array2<usize>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        let pairs = pairwise::from_rankings(x, &y.view())?;
        self.core.fit_pairs(&pairs, opts, observer)
    }
}

impl ScoreProducer for CmpNetRanker {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl ObjectRanker for CmpNetRanker {}
