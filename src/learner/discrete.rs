//! Discrete choosers: learn a utility from single-object choices and
//! predict the argmax object.

use std::path::Path;

use ndarray::{Array2, ArrayView3};

use crate::config::{FitOptions, Metric, ScoringConfig, TunableParameters};
use crate::data::pairwise;
use crate::error::LearnerResult;
use crate::learner::{DiscreteChooser, ScoreProducer, Trainable};
use crate::models::{CmpNetCore, EpochObserver, FetaCore, RankNetCore, TrainingReport};
use crate::neural::{Activation, Loss};

/// Discrete chooser over the RankNet latent-utility core.
///
/// One-hot choices decompose into pairs preferring the selected object over
/// every rejected one.
pub struct RankNetDiscreteChoiceFunction {
    core: RankNetCore,
}

impl RankNetDiscreteChoiceFunction {
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

impl Trainable for RankNetDiscreteChoiceFunction {
    type Labels = Array2<f32>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        let pairs = pairwise::from_choices(x, &y.view())?;
        self.core.fit_pairs(&pairs, opts, observer)
    }
}

impl ScoreProducer for RankNetDiscreteChoiceFunction {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl DiscreteChooser for RankNetDiscreteChoiceFunction {}

/// Discrete chooser over the CmpNet pairwise comparator
pub struct CmpNetDiscreteChoiceFunction {
    core: CmpNetCore,
}

impl CmpNetDiscreteChoiceFunction {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        Ok(Self {
            core: CmpNetCore::new(config)?,
        })
    }

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

impl Trainable for CmpNetDiscreteChoiceFunction {
    type Labels = Array2<f32>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        let pairs = pairwise::from_choices(x, &y.view())?;
        self.core.fit_pairs(&pairs, opts, observer)
    }
}

impl ScoreProducer for CmpNetDiscreteChoiceFunction {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl DiscreteChooser for CmpNetDiscreteChoiceFunction {}

/// Discrete chooser over the FETA all-pairs aggregator.
///
/// Trains directly on whole query sets with a categorical hinge over the
/// per-object score vector.
pub struct FetaDiscreteChoiceFunction {
    core: FetaCore,
}

impl FetaDiscreteChoiceFunction {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        Ok(Self {
            core: FetaCore::new(config)?,
        })
    }

    /// FETA discrete-choice defaults: selu hidden units, categorical hinge
    /// loss, categorical accuracy tracking
    pub fn default_config() -> ScoringConfig {
        ScoringConfig {
            activation: Activation::Selu,
            batch_normalization: false,
            loss: Loss::CategoricalHinge,
            metrics: vec![Metric::CategoricalAccuracy],
            ..ScoringConfig::default()
        }
    }

    /// Enable the context-free per-object tower and the learned combiner
    pub fn with_zeroth_order(mut self, enabled: bool) -> Self {
        self.core = self.core.with_zeroth_order(enabled);
        self
    }

    /// Bound training query sets to `max_number_of_objects` via subsampling
    pub fn with_subsampling(mut self, max_number_of_objects: usize, num_subsample: usize) -> Self {
        self.core = self.core.with_subsampling(max_number_of_objects, num_subsample);
        self
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

impl Trainable for FetaDiscreteChoiceFunction {
    type Labels = Array2<f32>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        self.core.fit_sets(x, &y.view(), opts, observer)
    }
}

impl ScoreProducer for FetaDiscreteChoiceFunction {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl DiscreteChooser for FetaDiscreteChoiceFunction {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{linear_discrete_choice, Batched, SyntheticConfig};

    fn task() -> (ndarray::Array3<f32>, Array2<f32>) {
        linear_discrete_choice(&SyntheticConfig {
            n_instances: 50,
            n_objects: 4,
            n_features: 2,
            seed: 33,
        })
    }

    #[test]
    fn test_argmax_predictions_in_range() {
        let (x, y) = task();
        let mut learner = FetaDiscreteChoiceFunction::new(
            FetaDiscreteChoiceFunction::default_config(),
        )
        .unwrap();
        let opts = FitOptions {
            epochs: 5,
            ..FitOptions::default()
        };
        learner.fit(&x.view(), &y, &opts).unwrap();

        let choices = learner.predict(&Batched::single(x)).unwrap();
        let choices = choices.as_single().unwrap();
        assert_eq!(choices.len(), 50);
        assert!(choices.iter().all(|&c| c < 4));
    }

    #[test]
    fn test_ranknet_discrete_decomposes_one_hot() {
        let (x, y) = task();
        let mut learner = RankNetDiscreteChoiceFunction::new(ScoringConfig {
            n_hidden: 1,
            batch_normalization: false,
            ..ScoringConfig::default()
        })
        .unwrap();
        let opts = FitOptions {
            epochs: 3,
            ..FitOptions::default()
        };
        let report = learner.fit(&x.view(), &y, &opts).unwrap();
        assert_eq!(report.epochs.len(), 3);
    }
}
