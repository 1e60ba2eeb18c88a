//! Shared hidden-layer chains.
//!
//! The scoring models invoke one set of hidden layers on several inputs per
//! step (both pair orientations, every pair in a query set). These helpers
//! run a chain forward while keeping the per-invocation caches, and walk it
//! backward while accumulating gradients into a single bundle per layer, so
//! the optimizer sees one update for each shared parameter.

use ndarray::Array2;
use rand::rngs::StdRng;

use crate::config::ScoringConfig;
use crate::neural::dense::{HiddenCache, HiddenGrads, HiddenLayer};

/// Per-invocation cache of a hidden chain: the input fed to each layer plus
/// each layer's own cache.
pub struct StackCache {
    pub inputs: Vec<Array2<f32>>,
    pub caches: Vec<HiddenCache>,
    pub output: Array2<f32>,
}

/// Accumulated gradients for a chain, one slot per layer
pub type StackGrads = Vec<Option<HiddenGrads>>;

pub fn empty_grads(layers: &[HiddenLayer]) -> StackGrads {
    layers.iter().map(|_| None).collect()
}

pub fn merge_grad(slot: &mut Option<HiddenGrads>, grads: HiddenGrads) {
    match slot {
        Some(existing) => existing.accumulate(&grads),
        None => *slot = Some(grads),
    }
}

/// Construct the hidden chain described by a scoring configuration
pub fn build_hidden(config: &ScoringConfig, in_dim: usize, rng: &mut StdRng) -> Vec<HiddenLayer> {
    let mut layers = Vec::with_capacity(config.n_hidden);
    let mut dim = in_dim;
    for _ in 0..config.n_hidden {
        let layer = if config.batch_normalization {
            HiddenLayer::normalized(dim, config.n_units, config.activation, config.initializer, rng)
        } else {
            HiddenLayer::plain(dim, config.n_units, config.activation, config.initializer, rng)
        };
        layers.push(layer);
        dim = config.n_units;
    }
    layers
}

/// Run the chain in training mode, retaining caches for the backward pass
pub fn forward_train(layers: &mut [HiddenLayer], input: &Array2<f32>) -> StackCache {
    let mut inputs = Vec::with_capacity(layers.len());
    let mut caches = Vec::with_capacity(layers.len());
    let mut current = input.clone();
    for layer in layers.iter_mut() {
        let cache = layer.forward_train(&current);
        let next = cache.output().clone();
        inputs.push(current);
        caches.push(cache);
        current = next;
    }
    StackCache {
        inputs,
        caches,
        output: current,
    }
}

/// Run the chain in inference mode
pub fn forward_eval(layers: &[HiddenLayer], input: &Array2<f32>) -> Array2<f32> {
    let mut current = input.clone();
    for layer in layers {
        current = layer.forward_eval(&current);
    }
    current
}

/// Walk the chain backward for one invocation, accumulating into `grads`.
///
/// Returns the gradient on the chain input.
pub fn backward(
    layers: &[HiddenLayer],
    cache: &StackCache,
    grad_output: Array2<f32>,
    grads: &mut [Option<HiddenGrads>],
) -> Array2<f32> {
    let mut upstream = grad_output;
    for idx in (0..layers.len()).rev() {
        let (layer_grads, d_input) =
            layers[idx].backward(&cache.inputs[idx], &cache.caches[idx], &upstream);
        merge_grad(&mut grads[idx], layer_grads);
        upstream = d_input;
    }
    upstream
}

/// Apply every accumulated gradient with the layer's name prefix
pub fn apply_gradients(
    layers: &mut [HiddenLayer],
    name: &str,
    grads: &[Option<HiddenGrads>],
    optimizer: &mut crate::neural::optimizer::Optimizer,
    weight_decay: f32,
) {
    for (idx, (layer, slot)) in layers.iter_mut().zip(grads.iter()).enumerate() {
        if let Some(layer_grads) = slot {
            layer.apply_gradients(
                &format!("{}_{}", name, idx),
                layer_grads,
                optimizer,
                weight_decay,
            );
        }
    }
}
