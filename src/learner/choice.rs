//! Choice functions: learn a utility from subset choices and predict the
//! set of objects above a tuned threshold.
//!
//! `fit` partitions the incoming batch into a training split and a tuning
//! split by seeded random draw. Threshold tuning is attempted even when the
//! core fit fails partway — the fit error propagates afterwards — so a
//! usable threshold survives whenever scoring still works. With
//! `tune_size = 0` tuning is skipped entirely and the threshold is exactly
//! 0.5.

use std::path::Path;

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use tracing::info;

use crate::config::{FitOptions, Metric, ScoringConfig, TunableParameters};
use crate::data::pairwise;
use crate::decision::DEFAULT_THRESHOLD;
use crate::error::LearnerResult;
use crate::learner::threshold::{tune_threshold, ThresholdSearch};
use crate::learner::{ChoiceFunction, ScoreProducer, Trainable};
use crate::models::{holdout_split, EpochObserver, FetaCore, RankNetCore, TrainingReport};
use crate::neural::Loss;

/// Choice function over the RankNet latent-utility core
pub struct RankNetChoiceFunction {
    core: RankNetCore,
    threshold: Option<f32>,
    tuned_f1: Option<f32>,
}

impl RankNetChoiceFunction {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        Ok(Self {
            core: RankNetCore::new(config)?,
            threshold: None,
            tuned_f1: None,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        self.core.config()
    }

    /// F1 achieved by the tuned threshold on the tuning split, for
    /// diagnostics
    pub fn tuned_f1(&self) -> Option<f32> {
        self.tuned_f1
    }

    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        self.core.set_tunable_parameters(params);
    }

    pub fn rebuild_via<P: AsRef<Path>>(&mut self, path: P) -> LearnerResult<()> {
        self.core.rebuild_via(path)
    }

    fn tune(
        &self,
        x: &ArrayView3<f32>,
        y: &ArrayView2<f32>,
        thin_thresholds: usize,
    ) -> LearnerResult<ThresholdSearch> {
        let scores = self.core.predict_scores_fixed(x)?;
        Ok(tune_threshold(&scores.view(), y, thin_thresholds))
    }
}

impl Trainable for RankNetChoiceFunction {
    type Labels = Array2<f32>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        opts.validate()?;
        self.threshold = None;
        self.tuned_f1 = None;

        if opts.tune_size > 0.0 {
            let seed = self.core.config().seed.wrapping_add(3);
            let (train_idx, tune_idx) = holdout_split(x.dim().0, opts.tune_size, seed);
            let x_train = x.select(Axis(0), &train_idx);
            let y_train = y.select(Axis(0), &train_idx);
            let x_tune = x.select(Axis(0), &tune_idx);
            let y_tune = y.select(Axis(0), &tune_idx);

            let fit_result = pairwise::from_choices(&x_train.view(), &y_train.view())
                .and_then(|pairs| self.core.fit_pairs(&pairs, opts, observer));
            // Tuning runs regardless of the fit outcome; the fit error, if
            // any, propagates afterwards
            info!("fitting utility function finished, start tuning threshold");
            let tune_result = self.tune(&x_tune.view(), &y_tune.view(), opts.thin_thresholds);
            if let Ok(search) = &tune_result {
                self.threshold = Some(search.threshold);
                self.tuned_f1 = Some(search.f1);
            }
            let report = fit_result?;
            tune_result?;
            Ok(report)
        } else {
            let pairs = pairwise::from_choices(x, &y.view())?;
            let report = self.core.fit_pairs(&pairs, opts, observer)?;
            self.threshold = Some(DEFAULT_THRESHOLD);
            Ok(report)
        }
    }
}

impl ScoreProducer for RankNetChoiceFunction {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl ChoiceFunction for RankNetChoiceFunction {
    fn threshold(&self) -> f32 {
        self.threshold.unwrap_or(DEFAULT_THRESHOLD)
    }
}

/// Choice function over the FETA all-pairs aggregator
pub struct FetaChoiceFunction {
    core: FetaCore,
    threshold: Option<f32>,
    tuned_f1: Option<f32>,
}

impl FetaChoiceFunction {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        Ok(Self {
            core: FetaCore::new(config)?,
            threshold: None,
            tuned_f1: None,
        })
    }

    /// FETA choice defaults: selu hidden units, element-wise binary
    /// cross-entropy over the choice vector
    pub fn default_config() -> ScoringConfig {
        ScoringConfig {
            activation: crate::neural::Activation::Selu,
            batch_normalization: false,
            loss: Loss::BinaryCrossentropy,
            metrics: vec![Metric::BinaryAccuracy],
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

    pub fn tuned_f1(&self) -> Option<f32> {
        self.tuned_f1
    }

    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        self.core.set_tunable_parameters(params);
    }

    pub fn rebuild_via<P: AsRef<Path>>(&mut self, path: P) -> LearnerResult<()> {
        self.core.rebuild_via(path)
    }

    fn tune(
        &self,
        x: &ArrayView3<f32>,
        y: &ArrayView2<f32>,
        thin_thresholds: usize,
    ) -> LearnerResult<ThresholdSearch> {
        let scores = self.core.predict_scores_fixed(x)?;
        Ok(tune_threshold(&scores.view(), y, thin_thresholds))
    }
}

impl Trainable for FetaChoiceFunction {
    type Labels = Array2<f32>;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        opts.validate()?;
        self.threshold = None;
        self.tuned_f1 = None;

        if opts.tune_size > 0.0 {
            let seed = self.core.config().seed.wrapping_add(3);
            let (train_idx, tune_idx) = holdout_split(x.dim().0, opts.tune_size, seed);
            let x_train = x.select(Axis(0), &train_idx);
            let y_train = y.select(Axis(0), &train_idx);
            let x_tune = x.select(Axis(0), &tune_idx);
            let y_tune = y.select(Axis(0), &tune_idx);

            let fit_result = self
                .core
                .fit_sets(&x_train.view(), &y_train.view(), opts, observer);
            info!("fitting utility function finished, start tuning threshold");
            let tune_result = self.tune(&x_tune.view(), &y_tune.view(), opts.thin_thresholds);
            if let Ok(search) = &tune_result {
                self.threshold = Some(search.threshold);
                self.tuned_f1 = Some(search.f1);
            }
            let report = fit_result?;
            tune_result?;
            Ok(report)
        } else {
            let report = self.core.fit_sets(x, &y.view(), opts, observer)?;
            self.threshold = Some(DEFAULT_THRESHOLD);
            Ok(report)
        }
    }
}

impl ScoreProducer for FetaChoiceFunction {
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        self.core.predict_scores_fixed(x)
    }
}

impl ChoiceFunction for FetaChoiceFunction {
    fn threshold(&self) -> f32 {
        self.threshold.unwrap_or(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{linear_subset_choice, Batched, SyntheticConfig};

    fn task() -> (ndarray::Array3<f32>, Array2<f32>) {
        linear_subset_choice(&SyntheticConfig {
            n_instances: 80,
            n_objects: 4,
            n_features: 2,
            seed: 27,
        })
    }

    fn fast_config() -> ScoringConfig {
        ScoringConfig {
            n_hidden: 1,
            batch_normalization: false,
            batch_size: 128,
            optimizer: crate::config::OptimizerConfig::sgd(0.1),
            ..ScoringConfig::default()
        }
    }

    #[test]
    fn test_threshold_lifecycle() {
        let (x, y) = task();
        let mut learner = RankNetChoiceFunction::new(fast_config()).unwrap();
        // Unset at construction: the configured default applies
        assert_eq!(learner.threshold(), DEFAULT_THRESHOLD);

        let opts = FitOptions {
            epochs: 10,
            tune_size: 0.2,
            ..FitOptions::default()
        };
        learner.fit(&x.view(), &y, &opts).unwrap();
        assert!(learner.tuned_f1().is_some());

        // Persisted until the next fit, then replaced
        let tuned = learner.threshold();
        let opts_no_tune = FitOptions {
            epochs: 2,
            tune_size: 0.0,
            ..FitOptions::default()
        };
        learner.fit(&x.view(), &y, &opts_no_tune).unwrap();
        assert_eq!(learner.threshold(), DEFAULT_THRESHOLD);
        let _ = tuned;
    }

    #[test]
    fn test_tune_size_zero_skips_tuning() {
        let (x, y) = task();
        let mut learner = RankNetChoiceFunction::new(fast_config()).unwrap();
        let opts = FitOptions {
            epochs: 3,
            tune_size: 0.0,
            ..FitOptions::default()
        };
        learner.fit(&x.view(), &y, &opts).unwrap();
        assert_eq!(learner.threshold(), 0.5);
        assert!(learner.tuned_f1().is_none());
    }

    #[test]
    fn test_predict_uses_threshold() {
        let (x, y) = task();
        let mut learner = RankNetChoiceFunction::new(fast_config()).unwrap();
        let opts = FitOptions {
            epochs: 10,
            tune_size: 0.2,
            ..FitOptions::default()
        };
        learner.fit(&x.view(), &y, &opts).unwrap();

        let scores = learner.predict_scores(&Batched::single(x.clone())).unwrap();
        let choices = ChoiceFunction::predict_for_scores(&learner, &scores);
        let direct = ChoiceFunction::predict(&learner, &Batched::single(x)).unwrap();
        assert_eq!(choices, direct);
    }

    #[test]
    fn test_feta_choice_function_fits() {
        let (x, y) = task();
        let mut learner = FetaChoiceFunction::new(FetaChoiceFunction::default_config()).unwrap();
        let opts = FitOptions {
            epochs: 5,
            tune_size: 0.2,
            ..FitOptions::default()
        };
        learner.fit(&x.view(), &y, &opts).unwrap();
        assert!(learner.tuned_f1().is_some());

        let choices = ChoiceFunction::predict(&learner, &Batched::single(x)).unwrap();
        let choices = choices.as_single().unwrap();
        assert_eq!(choices.dim(), (80, 4));
    }
}
