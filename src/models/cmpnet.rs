//! CmpNet-style pairwise comparator.
//!
//! Both orderings of a pair are concatenated and pushed through one set of
//! hidden layers (the same instances invoked on both orientations), then
//! each hidden encoding concatenated with its reverse feeds a single sigmoid
//! output unit. The two outputs `N_g` and `N_l` need not be complementary,
//! which lets the comparator capture pair-specific interaction asymmetries
//! that a latent-utility tower cannot express, at the cost of transitivity
//! guarantees. Per-object utilities are the row means over the ordered-pair
//! score matrix.

use std::path::Path;
use std::time::Instant;

use ndarray::{concatenate, s, Array1, Array2, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checkpoint::{check_version, Checkpointable, CheckpointError};
use crate::config::{FitOptions, Metric, ScoringConfig, TunableParameters};
use crate::data::PairwiseDataset;
use crate::error::{LearnerError, LearnerResult};
use crate::logging;
use crate::models::ranknet::apply_tunables;
use crate::models::{epoch_order, holdout_split, EpochMetrics, EpochObserver, TrainingReport};
use crate::neural::loss::binary_crossentropy;
use crate::neural::stack;
use crate::neural::{Activation, Dense, DenseWeights, HiddenLayer, LayerWeights, Optimizer};

const SNAPSHOT_VERSION: u32 = 1;

struct CmpNetState {
    hidden: Vec<HiddenLayer>,
    output: Dense,
    n_features: usize,
}

fn build_state(config: &ScoringConfig, n_features: usize) -> CmpNetState {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let hidden = stack::build_hidden(config, 2 * n_features, &mut rng);
    let output = Dense::new(
        2 * config.n_units,
        1,
        Activation::Sigmoid,
        config.initializer,
        &mut rng,
    );
    CmpNetState {
        hidden,
        output,
        n_features,
    }
}

/// CmpNet scoring core shared by the ranking and discrete-choice learners.
pub struct CmpNetCore {
    config: ScoringConfig,
    state: Option<CmpNetState>,
}

impl CmpNetCore {
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

    /// Train on pairwise examples with dual-orientation targets `(y, 1-y)`.
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
        let targets = pairs.paired_labels();
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
                let y = targets.select(Axis(0), &batch);

                let (loss, outputs) = train_step(
                    &mut state,
                    &mut optimizer,
                    self.config.regularizer.l2,
                    self.config.n_units,
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
            let val_loss = validation_loss(&state, pairs, &targets, &val_idx);
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
                if let Err(err) = logging::log_epoch("cmpnet", &entry) {
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

    /// Evaluate both orientations of a batch of ordered pairs.
    ///
    /// Column 0 is `N_g` (how favorable the first object is over the
    /// second), column 1 the mirrored `N_l`.
    pub fn predict_pair(
        &self,
        x1: &ArrayView2<f32>,
        x2: &ArrayView2<f32>,
    ) -> LearnerResult<Array2<f32>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| LearnerError::not_fitted("predict_pair"))?;
        if x1.ncols() != state.n_features || x2.ncols() != state.n_features {
            return Err(LearnerError::shape_mismatch(
                state.n_features,
                x1.ncols(),
                "predict_pair feature axis",
            ));
        }
        Ok(pair_outputs_eval(state, &x1.to_owned(), &x2.to_owned()))
    }

    /// Per-object utilities: mean of each object's row of ordered-pair
    /// scores against every competitor.
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
        if n_objects < 2 {
            return Err(LearnerError::empty_batch(
                "pairwise scoring needs at least two objects per query set",
            ));
        }

        let rows: Vec<Array1<f32>> = (0..n_instances)
            .into_par_iter()
            .map(|instance| {
                let set = x.slice(s![instance, .., ..]);
                instance_scores(state, &set, n_objects, n_features)
            })
            .collect();

        let mut scores = Array2::zeros((n_instances, n_objects));
        for (idx, row) in rows.into_iter().enumerate() {
            scores.row_mut(idx).assign(&row);
        }
        debug!("done predicting scores");
        Ok(scores)
    }

    /// Update tunable hyperparameters between fits; unknown keys warn.
    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        apply_tunables(&mut self.config, params, "cmpnet");
        if let Some(state) = self.state.take() {
            self.state = Some(build_state(&self.config, state.n_features));
        }
    }

    /// Serialize weights, tear the network down and restore it from the
    /// snapshot.
    pub fn rebuild_via<P: AsRef<Path>>(&mut self, path: P) -> LearnerResult<()> {
        self.save_checkpoint(&path)?;
        *self = Self::load_checkpoint(&path)?;
        Ok(())
    }
}

/// Score every ordered pair of one query set and average the rows.
///
/// The pair buffer is scoped to this call so bulk prediction releases each
/// instance's scratch memory before moving to the next.
fn instance_scores(
    state: &CmpNetState,
    set: &ArrayView2<f32>,
    n_objects: usize,
    n_features: usize,
) -> Array1<f32> {
    let n_pairs = n_objects * (n_objects - 1);
    let mut x1 = Array2::zeros((n_pairs, n_features));
    let mut x2 = Array2::zeros((n_pairs, n_features));
    let mut k = 0;
    for i in 0..n_objects {
        for j in 0..n_objects {
            if i == j {
                continue;
            }
            x1.row_mut(k).assign(&set.row(i));
            x2.row_mut(k).assign(&set.row(j));
            k += 1;
        }
    }
    let outputs = pair_outputs_eval(state, &x1, &x2);
    let favorable = outputs.column(0).to_owned();
    let matrix = favorable
        .into_shape((n_objects, n_objects - 1))
        .expect("contiguous");
    matrix
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(n_objects))
}

fn pair_outputs_eval(state: &CmpNetState, x1: &Array2<f32>, x2: &Array2<f32>) -> Array2<f32> {
    let c12 = concatenate(Axis(1), &[x1.view(), x2.view()]).expect("same batch size");
    let c21 = concatenate(Axis(1), &[x2.view(), x1.view()]).expect("same batch size");
    let h12 = stack::forward_eval(&state.hidden, &c12);
    let h21 = stack::forward_eval(&state.hidden, &c21);
    let merged_left = concatenate(Axis(1), &[h12.view(), h21.view()]).expect("same batch size");
    let merged_right = concatenate(Axis(1), &[h21.view(), h12.view()]).expect("same batch size");
    let n_g = state.output.eval(&merged_left);
    let n_l = state.output.eval(&merged_right);
    concatenate(Axis(1), &[n_g.view(), n_l.view()]).expect("same batch size")
}

fn train_step(
    state: &mut CmpNetState,
    optimizer: &mut Optimizer,
    weight_decay: f32,
    n_units: usize,
    x1: &Array2<f32>,
    x2: &Array2<f32>,
    targets: &Array2<f32>,
) -> (f32, Array2<f32>) {
    let c12 = concatenate(Axis(1), &[x1.view(), x2.view()]).expect("same batch size");
    let c21 = concatenate(Axis(1), &[x2.view(), x1.view()]).expect("same batch size");
    // One set of hidden layers, invoked on both orientations
    let cache12 = stack::forward_train(&mut state.hidden, &c12);
    let cache21 = stack::forward_train(&mut state.hidden, &c21);

    let merged_left =
        concatenate(Axis(1), &[cache12.output.view(), cache21.output.view()]).expect("same batch size");
    let merged_right =
        concatenate(Axis(1), &[cache21.output.view(), cache12.output.view()]).expect("same batch size");
    let out_left = state.output.forward(&merged_left);
    let out_right = state.output.forward(&merged_right);
    let predictions =
        concatenate(Axis(1), &[out_left.post.view(), out_right.post.view()]).expect("same batch size");

    let (loss, d_pred) = binary_crossentropy(&predictions, targets);
    let d_left = d_pred.slice(s![.., 0..1]).to_owned();
    let d_right = d_pred.slice(s![.., 1..2]).to_owned();

    let (grads_left, d_merged_left) = state.output.backward(&merged_left, &out_left, &d_left);
    let (grads_right, d_merged_right) =
        state.output.backward(&merged_right, &out_right, &d_right);
    let mut out_grads = grads_left;
    out_grads.accumulate(&grads_right);

    let d_h12 = d_merged_left.slice(s![.., 0..n_units]).to_owned()
        + &d_merged_right.slice(s![.., n_units..2 * n_units]);
    let d_h21 = d_merged_left.slice(s![.., n_units..2 * n_units]).to_owned()
        + &d_merged_right.slice(s![.., 0..n_units]);

    let mut grads = stack::empty_grads(&state.hidden);
    stack::backward(&state.hidden, &cache12, d_h12, &mut grads);
    stack::backward(&state.hidden, &cache21, d_h21, &mut grads);

    stack::apply_gradients(&mut state.hidden, "hidden", &grads, optimizer, weight_decay);
    state
        .output
        .apply_gradients("output", &out_grads, optimizer, weight_decay);
    (loss, predictions)
}

fn validation_loss(
    state: &CmpNetState,
    pairs: &PairwiseDataset,
    targets: &Array2<f32>,
    val_idx: &[usize],
) -> Option<f32> {
    if val_idx.is_empty() {
        return None;
    }
    let x1 = pairs.x1.select(Axis(0), val_idx);
    let x2 = pairs.x2.select(Axis(0), val_idx);
    let y = targets.select(Axis(0), val_idx);
    let outputs = pair_outputs_eval(state, &x1, &x2);
    let (loss, _) = binary_crossentropy(&outputs, &y);
    Some(loss)
}

#[derive(Serialize, Deserialize)]
struct CmpNetSnapshot {
    version: u32,
    config: ScoringConfig,
    n_features: usize,
    hidden: Vec<LayerWeights>,
    output: DenseWeights,
}

impl Checkpointable for CmpNetCore {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let state = self.state.as_ref().ok_or_else(|| {
            CheckpointError::InvalidFormat("no trained state to serialize".to_string())
        })?;
        let snapshot = CmpNetSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            n_features: state.n_features,
            hidden: state.hidden.iter().map(HiddenLayer::to_weights).collect(),
            output: state.output.to_weights(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: CmpNetSnapshot = Self::read_snapshot(path)?;
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
            state: Some(CmpNetState {
                hidden,
                output,
                n_features: snapshot.n_features,
            }),
        })
    }
}
