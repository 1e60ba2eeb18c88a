//! Neural building blocks for the pairwise scoring models.
//!
//! This module provides the dense layers, optimizers and loss functions the
//! scoring networks are assembled from. Layers operate on `ndarray` batches
//! and expose explicit forward/backward passes; the models own the layer
//! instances and drive weight sharing by invoking the same layers on every
//! branch of a pair.

pub mod dense;
pub mod loss;
pub mod optimizer;
pub mod stack;

pub use dense::{
    Activation, Dense, DenseCache, DenseGrads, DenseWeights, HiddenCache, HiddenGrads,
    HiddenLayer, Initializer, LayerWeights, NormalizedDense,
};
pub use loss::{binary_crossentropy, categorical_hinge, Loss};
pub use optimizer::{AdamOptimizer, Optimizer, SgdOptimizer};
