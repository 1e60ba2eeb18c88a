//! First-evaluate-then-aggregate (FETA) network.
//!
//! A CmpNet-style pairwise subnetwork with a linear output unit is applied
//! to every combination of objects in the query set; object `i` collects
//! `N_g` against every later object and `N_l` against every earlier one, so
//! its row always holds `n - 1` entries. The first-order utility is the row
//! mean. Optionally a zeroth-order (context-free) tower scores each object
//! independently, and a small learned sigmoid weighted-sum unit blends the
//! two scores per object; without it the aggregate is passed through a
//! sigmoid. Training and prediction complexity is quadratic in the number
//! of objects, which is why query sets can be subsampled down to
//! `max_number_of_objects` during training.

use std::path::Path;
use std::time::Instant;

use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checkpoint::{check_version, Checkpointable, CheckpointError};
use crate::config::{FitOptions, Metric, ScoringConfig, TunableParameters};
use crate::error::{LearnerError, LearnerResult};
use crate::logging;
use crate::metrics::{binary_accuracy, categorical_accuracy};
use crate::models::ranknet::apply_tunables;
use crate::models::{epoch_order, holdout_split, EpochMetrics, EpochObserver, TrainingReport};
use crate::neural::dense::DenseGrads;
use crate::neural::stack::{self, StackCache};
use crate::neural::{Activation, Dense, DenseCache, DenseWeights, HiddenLayer, LayerWeights, Optimizer};

const SNAPSHOT_VERSION: u32 = 1;

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

struct FetaState {
    hidden: Vec<HiddenLayer>,
    output: Dense,
    zeroth_hidden: Vec<HiddenLayer>,
    zeroth_output: Option<Dense>,
    weighted_sum: Option<Dense>,
    n_features: usize,
}

fn build_state(config: &ScoringConfig, add_zeroth_order: bool, n_features: usize) -> FetaState {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let hidden = stack::build_hidden(config, 2 * n_features, &mut rng);
    let output = Dense::new(
        2 * config.n_units,
        1,
        Activation::Linear,
        config.initializer,
        &mut rng,
    );
    let (zeroth_hidden, zeroth_output, weighted_sum) = if add_zeroth_order {
        let zeroth_hidden = stack::build_hidden(config, n_features, &mut rng);
        let zeroth_output = Dense::new(
            config.n_units,
            1,
            Activation::Linear,
            config.initializer,
            &mut rng,
        );
        let weighted_sum = Dense::new(2, 1, Activation::Sigmoid, config.initializer, &mut rng);
        (zeroth_hidden, Some(zeroth_output), Some(weighted_sum))
    } else {
        (Vec::new(), None, None)
    };
    FetaState {
        hidden,
        output,
        zeroth_hidden,
        zeroth_output,
        weighted_sum,
        n_features,
    }
}

/// FETA scoring core shared by the choice-function and discrete-choice
/// learners.
pub struct FetaCore {
    config: ScoringConfig,
    add_zeroth_order: bool,
    max_number_of_objects: usize,
    num_subsample: usize,
    state: Option<FetaState>,
}

impl FetaCore {
    pub fn new(config: ScoringConfig) -> LearnerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            add_zeroth_order: false,
            max_number_of_objects: 10,
            num_subsample: 5,
            state: None,
        })
    }

    /// Enable the context-free per-object tower and the learned combiner
    pub fn with_zeroth_order(mut self, enabled: bool) -> Self {
        self.add_zeroth_order = enabled;
        self
    }

    /// Bound the training set size: larger query sets are replaced by
    /// `num_subsample` random subsets of `max_number_of_objects` objects
    pub fn with_subsampling(mut self, max_number_of_objects: usize, num_subsample: usize) -> Self {
        self.max_number_of_objects = max_number_of_objects.max(2);
        self.num_subsample = num_subsample.max(1);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn has_zeroth_order(&self) -> bool {
        self.add_zeroth_order
    }

    /// Train on whole query sets with per-object 0/1 targets.
    pub fn fit_sets(
        &mut self,
        x: &ArrayView3<f32>,
        y: &ArrayView2<f32>,
        opts: &FitOptions,
        mut observer: Option<EpochObserver<'_>>,
    ) -> LearnerResult<TrainingReport> {
        self.config.validate()?;
        opts.validate()?;
        let (n_instances, n_objects, n_features) = x.dim();
        if n_instances == 0 {
            return Err(LearnerError::empty_batch("training set"));
        }
        if n_objects < 2 {
            return Err(LearnerError::empty_batch(
                "query sets need at least two objects for pairwise scoring",
            ));
        }
        if y.nrows() != n_instances || y.ncols() != n_objects {
            return Err(LearnerError::shape_mismatch(
                n_instances * n_objects,
                y.nrows() * y.ncols(),
                "label array",
            ));
        }
        for &value in y.iter() {
            if value != 0.0 && value != 1.0 {
                return Err(LearnerError::invalid_labels(
                    "query-set labels",
                    format!("expected 0/1 entries, found {}", value),
                ));
            }
        }

        // Quadratic pair growth bounds feasible set sizes during training
        let (x_train, y_train) = if n_objects > self.max_number_of_objects {
            debug!(
                n_objects,
                max_objects = self.max_number_of_objects,
                "subsampling query sets"
            );
            subsample_sets(
                x,
                y,
                self.max_number_of_objects,
                self.num_subsample,
                self.config.seed.wrapping_add(2),
            )
        } else {
            (x.to_owned(), y.to_owned())
        };

        let mut state = build_state(&self.config, self.add_zeroth_order, n_features);
        let mut optimizer = Optimizer::from_config(&self.config.optimizer);
        let (train_idx, val_idx) = holdout_split(
            x_train.dim().0,
            opts.validation_split,
            self.config.seed.wrapping_add(1),
        );

        let start = Instant::now();
        let mut epochs = Vec::with_capacity(opts.epochs);
        for epoch in 0..opts.epochs {
            let epoch_start = Instant::now();
            let order = epoch_order(train_idx.len(), epoch);

            let mut epoch_loss = 0.0;
            let mut n_batches = 0;
            let mut metric_sums: Vec<f32> = vec![0.0; self.config.metrics.len()];
            for chunk in order.chunks(self.config.batch_size) {
                let batch: Vec<usize> = chunk.iter().map(|&k| train_idx[k]).collect();
                let xb = x_train.select(Axis(0), &batch);
                let yb = y_train.select(Axis(0), &batch);

                let (loss, scores) = train_step(
                    &mut state,
                    &mut optimizer,
                    &self.config,
                    self.add_zeroth_order,
                    &xb,
                    &yb,
                );
                epoch_loss += loss;
                n_batches += 1;
                for (slot, metric) in metric_sums.iter_mut().zip(self.config.metrics.iter()) {
                    *slot += match metric {
                        Metric::BinaryAccuracy => binary_accuracy(&scores.view(), &yb.view()),
                        Metric::CategoricalAccuracy => {
                            categorical_accuracy(&scores.view(), &yb.view())
                        }
                    };
                }
            }

            let train_loss = epoch_loss / n_batches.max(1) as f32;
            let val_loss = if val_idx.is_empty() {
                None
            } else {
                let xv = x_train.select(Axis(0), &val_idx);
                let yv = y_train.select(Axis(0), &val_idx);
                let scores = eval_scores(&state, &xv.view(), self.add_zeroth_order);
                Some(self.config.loss.evaluate(&scores, &yv).0)
            };
            let metric_values: Vec<(String, f32)> = self
                .config
                .metrics
                .iter()
                .zip(metric_sums.iter())
                .map(|(metric, &sum)| (metric.name().to_string(), sum / n_batches.max(1) as f32))
                .collect();

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
                if let Err(err) = logging::log_epoch("feta", &entry) {
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

    /// Per-object utilities for query sets of any size.
    ///
    /// Scoring runs the pairwise subnetwork over every ordered pair and
    /// averages the rows with the shared trained weights, so sizes unseen
    /// during fit need no retraining.
    pub fn predict_scores_fixed(&self, x: &ArrayView3<f32>) -> LearnerResult<Array2<f32>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| LearnerError::not_fitted("predict_scores"))?;
        let (_, n_objects, n_features) = x.dim();
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
        let scores = eval_scores(state, x, self.add_zeroth_order);
        debug!("done predicting scores");
        Ok(scores)
    }

    /// Update tunable hyperparameters between fits; unknown keys warn.
    pub fn set_tunable_parameters(&mut self, params: &TunableParameters) {
        apply_tunables(&mut self.config, params, "feta");
        if let Some(state) = self.state.take() {
            self.state = Some(build_state(&self.config, self.add_zeroth_order, state.n_features));
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

/// Replace oversized query sets by seeded random subsets, always retaining
/// a positively labeled object when one exists.
fn subsample_sets(
    x: &ArrayView3<f32>,
    y: &ArrayView2<f32>,
    max_objects: usize,
    num_subsample: usize,
    seed: u64,
) -> (Array3<f32>, Array2<f32>) {
    let (n_instances, n_objects, n_features) = x.dim();
    let mut rng = StdRng::seed_from_u64(seed);
    let out_instances = n_instances * num_subsample;
    let mut xs = Array3::zeros((out_instances, max_objects, n_features));
    let mut ys = Array2::zeros((out_instances, max_objects));

    let mut row = 0;
    for instance in 0..n_instances {
        let positives: Vec<usize> = y
            .row(instance)
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == 1.0)
            .map(|(idx, _)| idx)
            .collect();
        for _ in 0..num_subsample {
            let mut chosen: Vec<usize> = (0..n_objects).collect();
            chosen.shuffle(&mut rng);
            chosen.truncate(max_objects);
            if !positives.is_empty() && !chosen.iter().any(|c| positives.contains(c)) {
                chosen[0] = positives[rng.gen_range(0..positives.len())];
            }
            chosen.sort_unstable();
            for (slot, &object) in chosen.iter().enumerate() {
                xs.slice_mut(s![row, slot, ..])
                    .assign(&x.slice(s![instance, object, ..]));
                ys[[row, slot]] = y[[instance, object]];
            }
            row += 1;
        }
    }
    (xs, ys)
}

struct PairCache {
    i: usize,
    j: usize,
    cache12: StackCache,
    cache21: StackCache,
    merged_left: Array2<f32>,
    merged_right: Array2<f32>,
    out_left: DenseCache,
    out_right: DenseCache,
}

fn column(matrix: &Array2<f32>, idx: usize) -> Array2<f32> {
    matrix.column(idx).to_owned().insert_axis(Axis(1))
}

fn merge_dense(slot: &mut Option<DenseGrads>, grads: DenseGrads) {
    match slot {
        Some(existing) => existing.accumulate(&grads),
        None => *slot = Some(grads),
    }
}

fn train_step(
    state: &mut FetaState,
    optimizer: &mut Optimizer,
    config: &ScoringConfig,
    add_zeroth_order: bool,
    x: &Array3<f32>,
    y: &Array2<f32>,
) -> (f32, Array2<f32>) {
    let FetaState {
        hidden,
        output,
        zeroth_hidden,
        zeroth_output,
        weighted_sum,
        ..
    } = state;
    let (batch, n_objects, _) = x.dim();
    let n_units = config.n_units;
    let weight_decay = config.regularizer.l2;

    let objects: Vec<Array2<f32>> = (0..n_objects)
        .map(|i| x.slice(s![.., i, ..]).to_owned())
        .collect();

    // Zeroth-order towers, one invocation of the shared layers per object
    let mut zeroth_caches: Vec<(StackCache, DenseCache)> = Vec::new();
    let mut zeroth_scores = Array2::zeros((batch, n_objects));
    if add_zeroth_order {
        let zeroth_out = zeroth_output.as_ref().expect("zeroth output present");
        for (i, object) in objects.iter().enumerate() {
            let chain = stack::forward_train(zeroth_hidden, object);
            let out = zeroth_out.forward(&chain.output);
            zeroth_scores.column_mut(i).assign(&out.post.column(0));
            zeroth_caches.push((chain, out));
        }
    }

    // Pairwise subnetwork over every combination of object indices
    let mut pair_caches: Vec<PairCache> = Vec::with_capacity(n_objects * (n_objects - 1) / 2);
    let mut rows_sum = Array2::zeros((batch, n_objects));
    for i in 0..n_objects {
        for j in (i + 1)..n_objects {
            let c12 = concatenate(Axis(1), &[objects[i].view(), objects[j].view()])
                .expect("same batch size");
            let c21 = concatenate(Axis(1), &[objects[j].view(), objects[i].view()])
                .expect("same batch size");
            let cache12 = stack::forward_train(hidden, &c12);
            let cache21 = stack::forward_train(hidden, &c21);
            let merged_left = concatenate(Axis(1), &[cache12.output.view(), cache21.output.view()])
                .expect("same batch size");
            let merged_right = concatenate(Axis(1), &[cache21.output.view(), cache12.output.view()])
                .expect("same batch size");
            let out_left = output.forward(&merged_left);
            let out_right = output.forward(&merged_right);

            {
                let mut col = rows_sum.column_mut(i);
                col += &out_left.post.column(0);
            }
            {
                let mut col = rows_sum.column_mut(j);
                col += &out_right.post.column(0);
            }
            pair_caches.push(PairCache {
                i,
                j,
                cache12,
                cache21,
                merged_left,
                merged_right,
                out_left,
                out_right,
            });
        }
    }
    let first_order = rows_sum / (n_objects - 1) as f32;

    // Blend with the zeroth-order score through the learned weighted-sum
    // unit, or squash the aggregate directly
    let mut combine_caches: Vec<(Array2<f32>, DenseCache)> = Vec::new();
    let scores = if add_zeroth_order {
        let combiner = weighted_sum.as_ref().expect("combiner present");
        let mut scores = Array2::zeros((batch, n_objects));
        for i in 0..n_objects {
            let input = concatenate(
                Axis(1),
                &[
                    first_order.slice(s![.., i..i + 1]),
                    zeroth_scores.slice(s![.., i..i + 1]),
                ],
            )
            .expect("same batch size");
            let out = combiner.forward(&input);
            scores.column_mut(i).assign(&out.post.column(0));
            combine_caches.push((input, out));
        }
        scores
    } else {
        first_order.mapv(sigmoid)
    };

    let (loss, d_scores) = config.loss.evaluate(&scores, y);

    // Backward through the combination
    let mut d_first = Array2::zeros((batch, n_objects));
    let mut d_zeroth = Array2::zeros((batch, n_objects));
    let mut combiner_grads: Option<DenseGrads> = None;
    if add_zeroth_order {
        let combiner = weighted_sum.as_ref().expect("combiner present");
        for i in 0..n_objects {
            let (input, cache) = &combine_caches[i];
            let d_out = column(&d_scores, i);
            let (grads, d_input) = combiner.backward(input, cache, &d_out);
            merge_dense(&mut combiner_grads, grads);
            d_first.column_mut(i).assign(&d_input.column(0));
            d_zeroth.column_mut(i).assign(&d_input.column(1));
        }
    } else {
        d_first = &d_scores * &scores.mapv(|p| p * (1.0 - p));
    }

    // Backward through the zeroth-order towers
    let mut zeroth_hidden_grads = stack::empty_grads(zeroth_hidden);
    let mut zeroth_out_grads: Option<DenseGrads> = None;
    if add_zeroth_order {
        let zeroth_out = zeroth_output.as_ref().expect("zeroth output present");
        for (i, (chain, out_cache)) in zeroth_caches.iter().enumerate() {
            let d_out = column(&d_zeroth, i);
            let (grads, d_chain) = zeroth_out.backward(&chain.output, out_cache, &d_out);
            merge_dense(&mut zeroth_out_grads, grads);
            stack::backward(zeroth_hidden, chain, d_chain, &mut zeroth_hidden_grads);
        }
    }

    // Backward through every pair; each row entry receives 1/(n-1) of the
    // object's first-order gradient
    let d_rows = d_first / (n_objects - 1) as f32;
    let mut hidden_grads = stack::empty_grads(hidden);
    let mut out_grads: Option<DenseGrads> = None;
    for pair in &pair_caches {
        let d_left = column(&d_rows, pair.i);
        let d_right = column(&d_rows, pair.j);
        let (grads_left, d_merged_left) =
            output.backward(&pair.merged_left, &pair.out_left, &d_left);
        let (grads_right, d_merged_right) =
            output.backward(&pair.merged_right, &pair.out_right, &d_right);
        merge_dense(&mut out_grads, grads_left);
        merge_dense(&mut out_grads, grads_right);

        let d_h12 = d_merged_left.slice(s![.., 0..n_units]).to_owned()
            + &d_merged_right.slice(s![.., n_units..2 * n_units]);
        let d_h21 = d_merged_left.slice(s![.., n_units..2 * n_units]).to_owned()
            + &d_merged_right.slice(s![.., 0..n_units]);
        stack::backward(hidden, &pair.cache12, d_h12, &mut hidden_grads);
        stack::backward(hidden, &pair.cache21, d_h21, &mut hidden_grads);
    }

    stack::apply_gradients(hidden, "hidden", &hidden_grads, optimizer, weight_decay);
    if let Some(grads) = out_grads {
        output.apply_gradients("score", &grads, optimizer, weight_decay);
    }
    if add_zeroth_order {
        stack::apply_gradients(
            zeroth_hidden,
            "hidden_zeroth",
            &zeroth_hidden_grads,
            optimizer,
            weight_decay,
        );
        if let Some(grads) = zeroth_out_grads {
            zeroth_output
                .as_mut()
                .expect("zeroth output present")
                .apply_gradients("zero_score", &grads, optimizer, weight_decay);
        }
        if let Some(grads) = combiner_grads {
            weighted_sum
                .as_mut()
                .expect("combiner present")
                .apply_gradients("weighted_sum", &grads, optimizer, weight_decay);
        }
    }
    (loss, scores)
}

/// Inference scores for a whole batch, one query set at a time.
fn eval_scores(state: &FetaState, x: &ArrayView3<f32>, add_zeroth_order: bool) -> Array2<f32> {
    let (n_instances, n_objects, n_features) = x.dim();
    let rows: Vec<Array1<f32>> = (0..n_instances)
        .into_par_iter()
        .map(|instance| {
            let set = x.slice(s![instance, .., ..]);
            instance_scores(state, &set, n_objects, n_features, add_zeroth_order)
        })
        .collect();
    let mut scores = Array2::zeros((n_instances, n_objects));
    for (idx, row) in rows.into_iter().enumerate() {
        scores.row_mut(idx).assign(&row);
    }
    scores
}

fn instance_scores(
    state: &FetaState,
    set: &ArrayView2<f32>,
    n_objects: usize,
    n_features: usize,
    add_zeroth_order: bool,
) -> Array1<f32> {
    // Pair buffers are scoped per instance so bulk prediction releases them
    // before the next set
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

    let c12 = concatenate(Axis(1), &[x1.view(), x2.view()]).expect("same batch size");
    let c21 = concatenate(Axis(1), &[x2.view(), x1.view()]).expect("same batch size");
    let h12 = stack::forward_eval(&state.hidden, &c12);
    let h21 = stack::forward_eval(&state.hidden, &c21);
    let merged = concatenate(Axis(1), &[h12.view(), h21.view()]).expect("same batch size");
    let favorable = state.output.eval(&merged).column(0).to_owned();
    let matrix = favorable
        .into_shape((n_objects, n_objects - 1))
        .expect("contiguous");
    let first_order = matrix
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(n_objects));

    if add_zeroth_order {
        let zeroth_out = state.zeroth_output.as_ref().expect("zeroth output present");
        let combiner = state.weighted_sum.as_ref().expect("combiner present");
        let encoded = stack::forward_eval(&state.zeroth_hidden, &set.to_owned());
        let zeroth = zeroth_out.eval(&encoded).column(0).to_owned();

        let mut combined = Array1::zeros(n_objects);
        for i in 0..n_objects {
            let input =
                Array2::from_shape_vec((1, 2), vec![first_order[i], zeroth[i]]).expect("pair input");
            combined[i] = combiner.eval(&input)[[0, 0]];
        }
        combined
    } else {
        first_order.mapv(sigmoid)
    }
}

#[derive(Serialize, Deserialize)]
struct FetaSnapshot {
    version: u32,
    config: ScoringConfig,
    add_zeroth_order: bool,
    max_number_of_objects: usize,
    num_subsample: usize,
    n_features: usize,
    hidden: Vec<LayerWeights>,
    output: DenseWeights,
    zeroth_hidden: Vec<LayerWeights>,
    zeroth_output: Option<DenseWeights>,
    weighted_sum: Option<DenseWeights>,
}

impl Checkpointable for FetaCore {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let state = self.state.as_ref().ok_or_else(|| {
            CheckpointError::InvalidFormat("no trained state to serialize".to_string())
        })?;
        let snapshot = FetaSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            add_zeroth_order: self.add_zeroth_order,
            max_number_of_objects: self.max_number_of_objects,
            num_subsample: self.num_subsample,
            n_features: state.n_features,
            hidden: state.hidden.iter().map(HiddenLayer::to_weights).collect(),
            output: state.output.to_weights(),
            zeroth_hidden: state
                .zeroth_hidden
                .iter()
                .map(HiddenLayer::to_weights)
                .collect(),
            zeroth_output: state.zeroth_output.as_ref().map(Dense::to_weights),
            weighted_sum: state.weighted_sum.as_ref().map(Dense::to_weights),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: FetaSnapshot = Self::read_snapshot(path)?;
        check_version(SNAPSHOT_VERSION, snapshot.version)?;
        let restore_layers = |weights: &[LayerWeights]| {
            weights
                .iter()
                .map(HiddenLayer::from_weights)
                .collect::<Result<Vec<_>, _>>()
                .map_err(CheckpointError::InvalidFormat)
        };
        let hidden = restore_layers(&snapshot.hidden)?;
        let zeroth_hidden = restore_layers(&snapshot.zeroth_hidden)?;
        let output = Dense::from_weights(&snapshot.output).map_err(CheckpointError::InvalidFormat)?;
        let zeroth_output = snapshot
            .zeroth_output
            .as_ref()
            .map(Dense::from_weights)
            .transpose()
            .map_err(CheckpointError::InvalidFormat)?;
        let weighted_sum = snapshot
            .weighted_sum
            .as_ref()
            .map(Dense::from_weights)
            .transpose()
            .map_err(CheckpointError::InvalidFormat)?;
        Ok(Self {
            config: snapshot.config,
            add_zeroth_order: snapshot.add_zeroth_order,
            max_number_of_objects: snapshot.max_number_of_objects,
            num_subsample: snapshot.num_subsample,
            state: Some(FetaState {
                hidden,
                output,
                zeroth_hidden,
                zeroth_output,
                weighted_sum,
                n_features: snapshot.n_features,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{linear_discrete_choice, SyntheticConfig};
    use crate::neural::Loss;

    fn tiny_task() -> (Array3<f32>, Array2<f32>) {
        linear_discrete_choice(&SyntheticConfig {
            n_instances: 40,
            n_objects: 4,
            n_features: 2,
            seed: 31,
        })
    }

    fn fast_config() -> ScoringConfig {
        ScoringConfig {
            n_hidden: 1,
            n_units: 6,
            activation: Activation::Selu,
            batch_normalization: false,
            loss: Loss::CategoricalHinge,
            metrics: vec![Metric::CategoricalAccuracy],
            batch_size: 32,
            ..ScoringConfig::default()
        }
    }

    #[test]
    fn test_fit_reduces_training_loss() {
        let (x, y) = tiny_task();
        let mut core = FetaCore::new(fast_config()).unwrap();
        let opts = FitOptions {
            epochs: 15,
            ..FitOptions::default()
        };
        let report = core.fit_sets(&x.view(), &y.view(), &opts, None).unwrap();
        assert!(report.final_train_loss <= report.epochs[0].train_loss);
        assert!(report
            .epochs
            .last()
            .unwrap()
            .metrics
            .iter()
            .any(|(name, _)| name == "categorical_accuracy"));
    }

    #[test]
    fn test_zeroth_order_scores_stay_in_unit_interval() {
        let (x, y) = tiny_task();
        let mut core = FetaCore::new(fast_config()).unwrap().with_zeroth_order(true);
        let opts = FitOptions {
            epochs: 5,
            ..FitOptions::default()
        };
        core.fit_sets(&x.view(), &y.view(), &opts, None).unwrap();
        let scores = core.predict_scores_fixed(&x.view()).unwrap();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_subsampling_bounds_training_sets() {
        let (x, y) = linear_discrete_choice(&SyntheticConfig {
            n_instances: 10,
            n_objects: 8,
            n_features: 2,
            seed: 3,
        });
        let (xs, ys) = subsample_sets(&x.view(), &y.view(), 4, 3, 11);
        assert_eq!(xs.dim(), (30, 4, 2));
        assert_eq!(ys.dim(), (30, 4));
        // The selected object survives every subsample
        for row in ys.axis_iter(Axis(0)) {
            assert!(row.iter().any(|&v| v == 1.0));
        }
    }

    #[test]
    fn test_fit_through_subsampling_path() {
        let (x, y) = linear_discrete_choice(&SyntheticConfig {
            n_instances: 20,
            n_objects: 7,
            n_features: 2,
            seed: 13,
        });
        let mut core = FetaCore::new(fast_config())
            .unwrap()
            .with_subsampling(4, 2);
        let opts = FitOptions {
            epochs: 3,
            ..FitOptions::default()
        };
        core.fit_sets(&x.view(), &y.view(), &opts, None).unwrap();

        // Prediction still runs on the full-size sets
        let scores = core.predict_scores_fixed(&x.view()).unwrap();
        assert_eq!(scores.dim(), (20, 7));
    }

    #[test]
    fn test_rejects_non_binary_labels() {
        let (x, mut y) = tiny_task();
        y[[0, 0]] = 0.3;
        let mut core = FetaCore::new(fast_config()).unwrap();
        let err = core
            .fit_sets(&x.view(), &y.view(), &FitOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, LearnerError::InvalidLabels { .. }));
    }

    #[test]
    fn test_deterministic_refit() {
        let (x, y) = tiny_task();
        let opts = FitOptions {
            epochs: 4,
            ..FitOptions::default()
        };
        let mut core = FetaCore::new(fast_config()).unwrap();
        core.fit_sets(&x.view(), &y.view(), &opts, None).unwrap();
        let first = core.predict_scores_fixed(&x.view()).unwrap();
        core.fit_sets(&x.view(), &y.view(), &opts, None).unwrap();
        let second = core.predict_scores_fixed(&x.view()).unwrap();
        assert_eq!(first, second);
    }
}
