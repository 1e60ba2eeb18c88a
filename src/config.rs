//! Learner configuration management.
//!
//! Configuration is split into explicit structs, one per nested component:
//! the scoring network ([`ScoringConfig`]), its optimizer
//! ([`OptimizerConfig`]) and regularizer ([`RegularizerConfig`]), and the
//! fit-time options ([`FitOptions`]). Every identifier-valued field is
//! validated eagerly; an unsupported value fails with the offending key and
//! the allowed set. Configurations can also be loaded from TOML files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::neural::{Activation, Initializer, Loss};

/// Optimizer identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub const ALLOWED: &'static str = "sgd, adam";

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            other => Err(ConfigError::unsupported("optimizer.kind", other, Self::ALLOWED)),
        }
    }
}

/// Evaluation metric identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    BinaryAccuracy,
    CategoricalAccuracy,
}

impl Metric {
    pub const ALLOWED: &'static str = "binary_accuracy, categorical_accuracy";

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "binary_accuracy" => Ok(Metric::BinaryAccuracy),
            "categorical_accuracy" => Ok(Metric::CategoricalAccuracy),
            other => Err(ConfigError::unsupported("metrics", other, Self::ALLOWED)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::BinaryAccuracy => "binary_accuracy",
            Metric::CategoricalAccuracy => "categorical_accuracy",
        }
    }
}

/// Optimizer configuration, one explicit struct instead of `optimizer__*`
/// keyword routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub learning_rate: f32,
    /// Momentum coefficient (SGD only)
    pub momentum: f32,
    /// Nesterov lookahead (SGD only)
    pub nesterov: bool,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl OptimizerConfig {
    pub fn sgd(learning_rate: f32) -> Self {
        Self {
            kind: OptimizerKind::Sgd,
            learning_rate,
            ..Self::default()
        }
    }

    pub fn adam(learning_rate: f32) -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::out_of_range(
                "optimizer.learning_rate",
                format!("{}", self.learning_rate),
                "must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::out_of_range(
                "optimizer.momentum",
                format!("{}", self.momentum),
                "must lie in [0, 1)",
            ));
        }
        for (name, value) in [("optimizer.beta1", self.beta1), ("optimizer.beta2", self.beta2)] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::out_of_range(
                    name,
                    format!("{}", value),
                    "must lie in [0, 1)",
                ));
            }
        }
        if self.epsilon <= 0.0 {
            return Err(ConfigError::out_of_range(
                "optimizer.epsilon",
                format!("{}", self.epsilon),
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Sgd,
            learning_rate: 0.01,
            momentum: 0.0,
            nesterov: false,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// L2 weight regularization, applied as decoupled weight decay on the
/// kernel matrices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegularizerConfig {
    pub l2: f32,
}

impl RegularizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(ConfigError::out_of_range(
                "regularizer.l2",
                format!("{}", self.l2),
                "must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

impl Default for RegularizerConfig {
    fn default() -> Self {
        Self { l2: 1e-4 }
    }
}

/// Construction-time configuration of a pairwise scoring network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Number of hidden layers in the scoring network
    pub n_hidden: usize,
    /// Number of hidden units in each layer
    pub n_units: usize,
    /// Activation function of the hidden layers
    pub activation: Activation,
    /// Whether to batch-normalize each hidden layer
    pub batch_normalization: bool,
    /// Initialization of the hidden weight matrices
    pub initializer: Initializer,
    /// Loss applied to the pairwise (or per-object) outputs
    pub loss: Loss,
    pub regularizer: RegularizerConfig,
    pub optimizer: OptimizerConfig,
    /// Metrics evaluated on the training batches each epoch
    pub metrics: Vec<Metric>,
    /// Mini-batch size during training
    pub batch_size: usize,
    /// Seed for weight initialization and data splits
    pub seed: u64,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_hidden == 0 {
            return Err(ConfigError::out_of_range("n_hidden", "0", "must be >= 1"));
        }
        if self.n_units == 0 {
            return Err(ConfigError::out_of_range("n_units", "0", "must be >= 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::out_of_range("batch_size", "0", "must be >= 1"));
        }
        self.optimizer.validate()?;
        self.regularizer.validate()?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawConfigFile =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let raw = raw.scoring;

        let mut metrics = Vec::with_capacity(raw.metrics.len());
        for name in &raw.metrics {
            metrics.push(Metric::parse(name)?);
        }

        let config = Self {
            n_hidden: raw.n_hidden,
            n_units: raw.n_units,
            activation: Activation::parse(&raw.activation)?,
            batch_normalization: raw.batch_normalization,
            initializer: Initializer::parse(&raw.initializer)?,
            loss: Loss::parse(&raw.loss)?,
            regularizer: RegularizerConfig { l2: raw.regularizer.l2 },
            optimizer: OptimizerConfig {
                kind: OptimizerKind::parse(&raw.optimizer.kind)?,
                learning_rate: raw.optimizer.learning_rate,
                momentum: raw.optimizer.momentum,
                nesterov: raw.optimizer.nesterov,
                beta1: raw.optimizer.beta1,
                beta2: raw.optimizer.beta2,
                epsilon: raw.optimizer.epsilon,
            },
            metrics,
            batch_size: raw.batch_size,
            seed: raw.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            n_hidden: 2,
            n_units: 8,
            activation: Activation::Relu,
            batch_normalization: true,
            initializer: Initializer::LecunNormal,
            loss: Loss::BinaryCrossentropy,
            regularizer: RegularizerConfig::default(),
            optimizer: OptimizerConfig::default(),
            metrics: vec![Metric::BinaryAccuracy],
            batch_size: 256,
            seed: 42,
        }
    }
}

/// Fit-time options shared by every learner variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    /// Number of training epochs
    pub epochs: usize,
    /// Fraction of pair examples (or instances) held out for per-epoch
    /// validation loss
    pub validation_split: f32,
    /// Fraction of instances split off to tune the choice threshold
    /// (choice functions only)
    pub tune_size: f32,
    /// Stride through the candidate thresholds while tuning
    pub thin_thresholds: usize,
    /// Emit a JSONL training log entry per epoch
    pub verbose: bool,
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(ConfigError::out_of_range(
                "validation_split",
                format!("{}", self.validation_split),
                "must lie in [0, 1)",
            ));
        }
        if !(0.0..1.0).contains(&self.tune_size) {
            return Err(ConfigError::out_of_range(
                "tune_size",
                format!("{}", self.tune_size),
                "must lie in [0, 1)",
            ));
        }
        if self.thin_thresholds == 0 {
            return Err(ConfigError::out_of_range(
                "thin_thresholds",
                "0",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            validation_split: 0.1,
            tune_size: 0.1,
            thin_thresholds: 1,
            verbose: false,
        }
    }
}

/// Hyperparameters adjustable between fits.
///
/// Unrecognized keys in `extra` are warned about and ignored, since search
/// spaces may carry knobs that only some variants support.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunableParameters {
    pub n_hidden: Option<usize>,
    pub n_units: Option<usize>,
    pub reg_strength: Option<f32>,
    pub learning_rate: Option<f32>,
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub extra: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct RawConfigFile {
    #[serde(default)]
    scoring: RawScoringConfig,
}

#[derive(Debug, Deserialize)]
struct RawScoringConfig {
    #[serde(default = "default_n_hidden")]
    n_hidden: usize,
    #[serde(default = "default_n_units")]
    n_units: usize,
    #[serde(default = "default_activation")]
    activation: String,
    #[serde(default = "default_batch_normalization")]
    batch_normalization: bool,
    #[serde(default = "default_initializer")]
    initializer: String,
    #[serde(default = "default_loss")]
    loss: String,
    #[serde(default)]
    regularizer: RawRegularizerConfig,
    #[serde(default)]
    optimizer: RawOptimizerConfig,
    #[serde(default = "default_metrics")]
    metrics: Vec<String>,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawScoringConfig {
    fn default() -> Self {
        Self {
            n_hidden: default_n_hidden(),
            n_units: default_n_units(),
            activation: default_activation(),
            batch_normalization: default_batch_normalization(),
            initializer: default_initializer(),
            loss: default_loss(),
            regularizer: RawRegularizerConfig::default(),
            optimizer: RawOptimizerConfig::default(),
            metrics: default_metrics(),
            batch_size: default_batch_size(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRegularizerConfig {
    #[serde(default = "default_l2")]
    l2: f32,
}

impl Default for RawRegularizerConfig {
    fn default() -> Self {
        Self { l2: default_l2() }
    }
}

#[derive(Debug, Deserialize)]
struct RawOptimizerConfig {
    #[serde(default = "default_optimizer_kind")]
    kind: String,
    #[serde(default = "default_learning_rate")]
    learning_rate: f32,
    #[serde(default)]
    momentum: f32,
    #[serde(default)]
    nesterov: bool,
    #[serde(default = "default_beta1")]
    beta1: f32,
    #[serde(default = "default_beta2")]
    beta2: f32,
    #[serde(default = "default_epsilon")]
    epsilon: f32,
}

impl Default for RawOptimizerConfig {
    fn default() -> Self {
        Self {
            kind: default_optimizer_kind(),
            learning_rate: default_learning_rate(),
            momentum: 0.0,
            nesterov: false,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }
}

fn default_n_hidden() -> usize {
    2
}

fn default_n_units() -> usize {
    8
}

fn default_activation() -> String {
    "relu".to_string()
}

fn default_batch_normalization() -> bool {
    true
}

fn default_initializer() -> String {
    "lecun_normal".to_string()
}

fn default_loss() -> String {
    "binary_crossentropy".to_string()
}

fn default_metrics() -> Vec<String> {
    vec!["binary_accuracy".to_string()]
}

fn default_batch_size() -> usize {
    256
}

fn default_seed() -> u64 {
    42
}

fn default_l2() -> f32 {
    1e-4
}

fn default_optimizer_kind() -> String {
    "sgd".to_string()
}

fn default_learning_rate() -> f32 {
    0.01
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    /// An identifier-valued option was set to a value outside its allowed set
    Unsupported {
        parameter: String,
        value: String,
        allowed: String,
    },
    /// A numeric option violated its constraint
    OutOfRange {
        parameter: String,
        value: String,
        constraint: String,
    },
}

impl ConfigError {
    pub fn unsupported(
        parameter: impl Into<String>,
        value: impl Into<String>,
        allowed: impl Into<String>,
    ) -> Self {
        ConfigError::Unsupported {
            parameter: parameter.into(),
            value: value.into(),
            allowed: allowed.into(),
        }
    }

    pub fn out_of_range(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        ConfigError::OutOfRange {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
            ConfigError::Unsupported {
                parameter,
                value,
                allowed,
            } => write!(
                f,
                "Unsupported value '{}' for '{}' (allowed: {})",
                value, parameter, allowed
            ),
            ConfigError::OutOfRange {
                parameter,
                value,
                constraint,
            } => write!(f, "Invalid '{}' = '{}': {}", parameter, value, constraint),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_config_defaults_when_section_missing() {
        let config = ScoringConfig::from_toml_str("").unwrap();
        assert_eq!(config.n_hidden, 2);
        assert_eq!(config.n_units, 8);
        assert_eq!(config.activation, Activation::Relu);
        assert!(config.batch_normalization);
        assert_eq!(config.batch_size, 256);
    }

    #[test]
    fn scoring_config_parses_custom_values() {
        let toml = r#"
[scoring]
n_hidden = 3
n_units = 16
activation = "selu"
batch_normalization = false
loss = "categorical_hinge"
metrics = ["categorical_accuracy"]
seed = 7

[scoring.optimizer]
kind = "adam"
learning_rate = 0.001

[scoring.regularizer]
l2 = 0.001
"#;
        let config = ScoringConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.n_hidden, 3);
        assert_eq!(config.n_units, 16);
        assert_eq!(config.activation, Activation::Selu);
        assert!(!config.batch_normalization);
        assert_eq!(config.loss, Loss::CategoricalHinge);
        assert_eq!(config.metrics, vec![Metric::CategoricalAccuracy]);
        assert_eq!(config.seed, 7);
        assert_eq!(config.optimizer.kind, OptimizerKind::Adam);
        assert!((config.optimizer.learning_rate - 0.001).abs() < f32::EPSILON);
        assert!((config.regularizer.l2 - 0.001).abs() < f32::EPSILON);
    }

    #[test]
    fn scoring_config_rejects_unknown_activation() {
        let toml = "[scoring]\nactivation = \"softplus\"";
        let err = ScoringConfig::from_toml_str(toml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("softplus"));
        assert!(msg.contains("activation"));
        assert!(msg.contains("relu"));
    }

    #[test]
    fn scoring_config_rejects_unknown_optimizer() {
        let toml = "[scoring.optimizer]\nkind = \"rmsprop\"";
        let err = ScoringConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("rmsprop"));
        assert!(err.to_string().contains("sgd, adam"));
    }

    #[test]
    fn scoring_config_rejects_zero_batch_size() {
        let toml = "[scoring]\nbatch_size = 0";
        let err = ScoringConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn optimizer_config_rejects_negative_learning_rate() {
        let config = OptimizerConfig {
            learning_rate: -0.5,
            ..OptimizerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("learning_rate"));
    }

    #[test]
    fn fit_options_reject_full_tune_fraction() {
        let opts = FitOptions {
            tune_size: 1.0,
            ..FitOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn fit_options_defaults() {
        let opts = FitOptions::default();
        assert_eq!(opts.epochs, 10);
        assert!((opts.validation_split - 0.1).abs() < f32::EPSILON);
        assert!((opts.tune_size - 0.1).abs() < f32::EPSILON);
        assert_eq!(opts.thin_thresholds, 1);
        assert!(opts.validate().is_ok());
    }
}
