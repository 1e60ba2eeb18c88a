//! RankNet-style latent utility network.
//!
//! A single shared tower approximates the utility `U(x)`. For a training
//! pair the first hidden encoding of the second object is negated and fed
//! through the *same* later layers, and the two branch outputs are summed
//! before a sigmoid output unit, so the pair probability realizes
//! `P(i > j) = sigmoid(U(x_i) - U(x_j))` through weight sharing rather than
//! by subtracting two independent outputs. Utilities obtained from the
//! tower alone therefore induce strictly transitive pairwise preferences.

use std::path::Path;
use std::time::Instant;

use ndarray::{Array2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checkpoint::{check_version, Checkpointable, CheckpointError};
use crate::config::{FitOptions, Metric, ScoringConfig, TunableParameters};
use crate::data::PairwiseDataset;
use crate::error::{LearnerError, LearnerResult};
use crate::logging;
use crate::models::{epoch_order, holdout_split, EpochMetrics, EpochObserver, TrainingReport};
use crate::neural::loss::binary_crossentropy;
use crate::neural::stack;
use crate::neural::{Activation, Dense, DenseWeights, HiddenLayer, LayerWeights, Optimizer};

const SNAPSHOT_VERSION: u32 = 1;

/// Shared-weight scoring state, constructed once the feature
/// dimensionality is known
struct RankNetState {
    hidden: Vec<HiddenLayer>,
    output: Dense,
    n_features: usize,
}

fn build_state(config: &ScoringConfig, n_features: usize) -> RankNetState {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let hidden = stack::build_hidden(config, n_features, &mut rng);
    let output = Dense::new(
        config.n_units,
        1,
        Activation::Sigmoid,
        config.initializer,
        &mut rng,
    );
    RankNetState {
        hidden,
        output,
        n_features,
    }
}

/// RankNet scoring core shared by the ranking, choice and discrete-choice
/// learners.
pub struct RankNetCore {
    config: ScoringConfig,
    state: Option<RankNetState>,
}

impl RankNetCore {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: None,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Train on pairwise examples, fully replacing any prior trained state.
    pub fn fit_pairs(
        &mut self,
        pairs: &PairwiseDataset,
        opts: &FitOptions,
        mut observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        self.config.validate()?;
        opts.validate()?;
        if pairs.n_pairs() == 0 {
            return Err(LearnerError::empty_batch("pairwise training set"));
        }
        debug!(pairs = pairs.n_pairs(), "creating the model");

        let mut state = build_state(&self.config, pairs.n_features());
        let mut optimizer = Optimizer::from_config(&self.config.optimizer);
        let (train_idx, val_idx) = holdout_split(
            pairs.n_pairs(),
            opts.validation_split,
            self.config.seed.wrapping_add(1),
        );
        let track_accuracy = self.config.metrics.contains(&Metric::BinaryAccuracy);

        let start = Instant::now();
        let mut epochs = Vec::with_capacity(opts.epochs);
        for epoch in 0..opts.epochs {
            let epoch_start = Instant::now();
            let order = epoch_order(train_idx.len(), epoch);

            let mut epoch_loss = 0.0;
            let mut n_batches = 0;
            let mut correct = 0usize;
            let mut seen = 0usize;
            for chunk in order.chunks(self.config.batch_size) {
                let batch: Vec<usize> = chunk.iter().map(|&k| train_idx[k]).collect();
                let x1 = pairs.x1.select(Axis(0), &batch);
                let x2 = pairs.x2.select(Axis(0), &batch);
                let y = pairs.labels.select(Axis(0), &batch).insert_axis(Axis(1));

                let (loss, outputs) = train_step(
                    &mut state,
                    &mut optimizer,
                    self.config.regularizer.l2,
                    &x1,
                    &x2,
                    &y,
                );
                epoch_loss += loss;
                n_batches += 1;
                if track_accuracy {
                    correct += outputs
                        .iter()
                        .zip(y.iter())
                        .filter(|(&p, &t)| (p > 0.5) == (t > 0.5))
                        .count();
                    seen += outputs.len();
                }
            }

            let train_loss = epoch_loss / n_batches.max(1) as f32;
            let val_loss = validation_loss(&state, pairs, &val_idx);
            let mut metric_values = Vec::new();
            if track_accuracy && seen > 0 {
                metric_values.push((
                    Metric::BinaryAccuracy.name().to_string(),
                    correct as f32 / seen as f32,
                ));
            }

            let entry = EpochMetrics {
                epoch,
                train_loss,
                val_loss,
                metrics: metric_values,
                learning_rate: optimizer.learning_rate(),
                elapsed_ms: epoch_start.elapsed().as_millis(),
            };
            if let Some(cb) = observer.as_mut() {
                cb(&entry);
            }
            if opts.verbose {
                if let Err(err) = logging::log_epoch("ranknet", &entry) {
                    warn!("failed to append training log entry: {}", err);
                }
            }
            epochs.push(entry);
        }
        debug!("fitting complete");

        self.state = Some(state);
        let final_train_loss = epochs.last().map(|m| m.train_loss).unwrap_or(0.0);
        Ok(TrainingReport {
            epochs,
            final_train_loss,
            total_elapsed_ms: start.elapsed().as_millis(),
        })
    }

    /// Utility score per object, computed by the shared tower.
    ///
    /// Works for any query-set size: the tower is a per-object function of
    /// the trained weights, so no retraining is needed for sizes unseen
    /// during fit.
    pub fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| LearnerError::not_fitted("predict_scores"))?;
        let (n_instances, n_objects, n_features) = x.dim();
        if n_features != state.n_features {
            return Err(LearnerError::shape_mismatch(
                state.n_features,
                n_features,
                "predict_scores feature axis",
            ));
        }
        let flat = x
            .to_owned()
            .into_shape((n_instances * n_objects, n_features))
            .expect("contiguous");
        let encoded = stack::forward_eval(&state.hidden, &flat);
        let scores = state.output.eval(&encoded);
        Ok(scores
            .into_shape((n_instances, n_objects))
            .expect("contiguous"))
    }

    /// Update tunable hyperparameters between fits.
    ///
    /// Unrecognized keys are warned about and ignored. A fitted scoring
    /// network is reconstructed from the updated configuration.
    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        apply_tunables(&mut self.config, params, "ranknet");
        if let Some(state) = self.state.take() {
            self.state = Some(build_state(&self.config, state.n_features));
        }
    }

    /// Serialize weights, tear the network down and restore it from the
    /// snapshot, reclaiming accumulated state.
    pub fn rebuild_via<P: AsRef<Path>>(&mut self, path: P) -> LearnerResult<()> {
        self.save_checkpoint(&path)?;
        *self = Self::load_checkpoint(&path)?;
        Ok(())
    }
}

pub(crate) fn apply_tunables(config: &mut ScoringConfig, params: &TunableParameters, model: &str) {
    if let Some(value) = params.n_hidden {
        config.n_hidden = value;
    }
    if let Some(value) = params.n_units {
        config.n_units = value;
    }
    if let Some(value) = params.batch_size {
        config.batch_size = value;
    }
    if let Some(value) = params.reg_strength {
        config.regularizer.l2 = value;
    }
    if let Some(value) = params.learning_rate {
        config.optimizer.learning_rate = value;
    }
    if !params.extra.is_empty() {
        let keys: Vec<&String> = params.extra.keys().collect();
        warn!(
            "{} does not support tunable parameters called {:?}; ignoring them",
            model, keys
        );
    }
}

fn train_step(
    state: &mut RankNetState,
    optimizer: &mut Optimizer,
    weight_decay: f32,
    x1: &Array2<f32>,
    x2: &Array2<f32>,
    y: &Array2<f32>,
) -> (f32, Array2<f32>) {
    // Branch 1: the full tower over the first object
    let cache1 = stack::forward_train(&mut state.hidden, x1);
    // Branch 2: first hidden encoding of the second object, negated, then
    // the same later layers
    let first_cache = state.hidden[0].forward_train(x2);
    let negated = first_cache.output().mapv(|v| -v);
    let tail_cache = stack::forward_train(&mut state.hidden[1..], &negated);

    let merged = &cache1.output + &tail_cache.output;
    let out_cache = state.output.forward(&merged);
    let (loss, d_pred) = binary_crossentropy(&out_cache.post, y);

    let (out_grads, d_merged) = state.output.backward(&merged, &out_cache, &d_pred);
    let mut grads = stack::empty_grads(&state.hidden);
    stack::backward(&state.hidden, &cache1, d_merged.clone(), &mut grads);
    let d_negated = stack::backward(&state.hidden[1..], &tail_cache, d_merged, &mut grads[1..]);
    let (first_grads, _) =
        state.hidden[0].backward(x2, &first_cache, &d_negated.mapv(|v| -v));
    stack::merge_grad(&mut grads[0], first_grads);

    stack::apply_gradients(&mut state.hidden, "hidden", &grads, optimizer, weight_decay);
    state
        .output
        .apply_gradients("output", &out_grads, optimizer, weight_decay);
    (loss, out_cache.post)
}

fn pair_outputs_eval(state: &RankNetState, x1: &Array2<f32>, x2: &Array2<f32>) -> Array2<f32> {
    let enc1 = stack::forward_eval(&state.hidden, x1);
    let mut enc2 = state.hidden[0].forward_eval(x2).mapv(|v| -v);
    for layer in &state.hidden[1..] {
        enc2 = layer.forward_eval(&enc2);
    }
    state.output.eval(&(enc1 + enc2))
}

fn validation_loss(state: &RankNetState, pairs: &PairwiseDataset, val_idx: &[usize]) -> Option<f32> {
    if val_idx.is_empty() {
        return None;
    }
    let x1 = pairs.x1.select(Axis(0), val_idx);
    let x2 = pairs.x2.select(Axis(0), val_idx);
    let y = pairs.labels.select(Axis(0), val_idx).insert_axis(Axis(1));
    let outputs = pair_outputs_eval(state, &x1, &x2);
    let (loss, _) = binary_crossentropy(&outputs, &y);
    Some(loss)
}

#[derive(Serialize, Deserialize)]
struct RankNetSnapshot {
    version: u32,
    config: ScoringConfig,
    n_features: usize,
    hidden: Vec<LayerWeights>,
    output: DenseWeights,
}

impl Checkpointable for RankNetCore {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let state = self.state.as_ref().ok_or_else(|| {
            CheckpointError::InvalidFormat("no trained state to serialize".to_string())
        })?;
        let snapshot = RankNetSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            n_features: state.n_features,
            hidden: state.hidden.iter().map(HiddenLayer::to_weights).collect(),
            output: state.output.to_weights(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: RankNetSnapshot = Self::read_snapshot(path)?;
        check_version(SNAPSHOT_VERSION, snapshot.version)?;
        let hidden = snapshot
            .hidden
            .iter()
            .map(HiddenLayer::from_weights)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CheckpointError::InvalidFormat)?;
        let output = Dense::from_weights(&snapshot.output).map_err(CheckpointError::InvalidFormat)?;
        Ok(Self {
            config: snapshot.config,
            state: Some(RankNetState {
                hidden,
                output,
                n_features: snapshot.n_features,
            }),
        })
    }
}
