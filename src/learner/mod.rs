//! Learner lifecycle contract and concrete model variants.
//!
//! Capabilities are split into small orthogonal traits instead of a deep
//! inheritance lattice: [`Trainable`] owns the fit contract,
//! [`ScoreProducer`] turns query sets into utility scores, and one decision
//! trait per output mode ([`ObjectRanker`], [`ChoiceFunction`],
//! [`DiscreteChooser`]) derives the final prediction from scores. A concrete
//! learner composes a scoring core with the decision mode it delegates to.
//!
//! `predict` is always `predict_for_scores(predict_scores(x))` — the same
//! scores are reused, never recomputed.

pub mod choice;
pub mod discrete;
pub mod ranking;
pub mod threshold;

use ndarray::{Array2, ArrayView3};

use crate::config::FitOptions;
use crate::data::{ChoiceBatches, DiscreteBatches, FeatureBatches, RankingBatches, ScoreBatches};
use crate::decision;
use crate::error::LearnerResult;
use crate::models::{EpochObserver, TrainingReport};

pub use choice::{FetaChoiceFunction, RankNetChoiceFunction};
pub use discrete::{
    CmpNetDiscreteChoiceFunction, FetaDiscreteChoiceFunction, RankNetDiscreteChoiceFunction,
};
pub use ranking::{CmpNetRanker, RankNetRanker};
pub use threshold::{tune_threshold, ThresholdSearch};

/// Fitting contract shared by every learner variant.
///
/// `fit` fully replaces prior trained state (weights and threshold); there
/// are no incremental update semantics.
pub trait Trainable {
    /// Preference label array accepted by this variant
    type Labels;

    fn fit_observed(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
        observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport>;

    fn fit(
        &mut self,
        x: &ArrayView3<f32>,
        y: &Self::Labels,
        opts: &FitOptions,
    ) -> LearnerResult<TrainingReport> {
        self.fit_observed(x, y, opts, None)
    }
}

/// Produces one utility score per object per query-set instance.
pub trait ScoreProducer {
    /// Score a single batch of fixed-size query sets
    fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>>;

    /// Score a single batch or a per-size mapping; the result mirrors the
    /// input shape
    fn predict_scores(&self, x: &FeatureBatches) -> LearnerResult<ScoreBatches> {
        x.try_map(|batch| self.predict_scores_fixed(&batch.view()))
    }
}

/// Ranking decision mode: sort objects by descending utility.
pub trait ObjectRanker: ScoreProducer {
    fn predict_for_scores(&self, scores: &ScoreBatches) -> RankingBatches {
        scores.map(|s| decision::rank_by_scores(&s.view()))
    }

    fn predict(&self, x: &FeatureBatches) -> LearnerResult<RankingBatches> {
        let scores = self.predict_scores(x)?;
        Ok(self.predict_for_scores(&scores))
    }
}

/// Choice-function decision mode: select every object above the threshold.
pub trait ChoiceFunction: ScoreProducer {
    /// Tuned threshold, or the configured default of 0.5 when unset
    fn threshold(&self) -> f32;

    fn predict_for_scores(&self, scores: &ScoreBatches) -> ChoiceBatches {
        let threshold = self.threshold();
        scores.map(|s| decision::choose_by_threshold(&s.view(), threshold))
    }

    fn predict(&self, x: &FeatureBatches) -> LearnerResult<ChoiceBatches> {
        let scores = self.predict_scores(x)?;
        Ok(self.predict_for_scores(&scores))
    }
}

/// Discrete-choice decision mode: select the single best object.
pub trait DiscreteChooser: ScoreProducer {
    fn predict_for_scores(&self, scores: &ScoreBatches) -> DiscreteBatches {
        scores.map(|s| decision::argmax_choice(&s.view()))
    }

    fn predict(&self, x: &FeatureBatches) -> LearnerResult<DiscreteBatches> {
        let scores = self.predict_scores(x)?;
        Ok(self.predict_for_scores(&scores))
    }
}
