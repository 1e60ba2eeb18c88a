//! End-to-end learner scenarios on synthetic linear-utility tasks.
//!
//! The discrete-choice benchmark uses 500 query sets of 5 objects with 2
//! features, the true choice being the argmax of a hidden linear utility.
//! Each learner family has to recover that utility from its own pairwise
//! decomposition.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, Axis};
use prefrank::data::{
    linear_discrete_choice, linear_rankings, linear_subset_choice, Batched, SyntheticConfig,
};
use prefrank::learner::{
    ChoiceFunction, CmpNetDiscreteChoiceFunction, DiscreteChooser, FetaDiscreteChoiceFunction,
    ObjectRanker, RankNetChoiceFunction, RankNetDiscreteChoiceFunction, RankNetRanker,
    ScoreProducer, Trainable,
};
use prefrank::metrics::{categorical_accuracy, f1_samples, mean_kendall_tau};
use prefrank::{FitOptions, Metric, OptimizerConfig, ScoringConfig};

const N_INSTANCES: usize = 500;
const N_OBJECTS: usize = 5;
const N_FEATURES: usize = 2;
const EPOCHS: usize = 100;
const ACCURACY_FLOOR: f32 = 0.95;
const RTOL: f32 = 1e-2;
const ATOL: f32 = 5e-2;

fn trivial_discrete_choice_problem() -> (Array3<f32>, Array2<f32>) {
    linear_discrete_choice(&SyntheticConfig {
        n_instances: N_INSTANCES,
        n_objects: N_OBJECTS,
        n_features: N_FEATURES,
        seed: 42,
    })
}

fn sgd_common() -> OptimizerConfig {
    OptimizerConfig {
        learning_rate: 1e-3,
        momentum: 0.9,
        nesterov: true,
        ..OptimizerConfig::default()
    }
}

fn assert_all_close(a: &Array2<f32>, b: &Array2<f32>, rtol: f32, atol: f32) {
    assert_eq!(a.dim(), b.dim());
    for (&x, &y) in a.iter().zip(b.iter()) {
        assert!(
            (x - y).abs() <= atol + rtol * y.abs(),
            "values diverge: {} vs {}",
            x,
            y
        );
    }
}

fn choices_to_one_hot(choices: &ndarray::Array1<usize>, n_objects: usize) -> Array2<f32> {
    let mut one_hot = Array2::zeros((choices.len(), n_objects));
    for (row, &choice) in choices.iter().enumerate() {
        one_hot[[row, choice]] = 1.0;
    }
    one_hot
}

#[test]
fn feta_discrete_choice_recovers_linear_utility() {
    let (x, y) = trivial_discrete_choice_problem();
    let mut learner = FetaDiscreteChoiceFunction::new(ScoringConfig {
        n_hidden: 1,
        optimizer: OptimizerConfig {
            learning_rate: 2e-3,
            ..sgd_common()
        },
        batch_size: 128,
        ..FetaDiscreteChoiceFunction::default_config()
    })
    .unwrap();

    let opts = FitOptions {
        epochs: EPOCHS,
        validation_split: 0.0,
        ..FitOptions::default()
    };
    learner.fit(&x.view(), &y, &opts).unwrap();

    let scores = learner.predict_scores_fixed(&x.view()).unwrap();
    let accuracy = categorical_accuracy(&scores.view(), &y.view());
    assert!(
        accuracy >= ACCURACY_FLOOR,
        "categorical accuracy too low: {}",
        accuracy
    );

    // predict is exactly predict_for_scores over the same scores
    let batched = Batched::single(x);
    let score_batches = learner.predict_scores(&batched).unwrap();
    let from_scores = learner.predict_for_scores(&score_batches);
    let direct = learner.predict(&batched).unwrap();
    assert_eq!(from_scores, direct);
}

#[test]
fn ranknet_discrete_choice_recovers_linear_utility() {
    let (x, y) = trivial_discrete_choice_problem();
    let mut learner = RankNetDiscreteChoiceFunction::new(ScoringConfig {
        optimizer: sgd_common(),
        ..ScoringConfig::default()
    })
    .unwrap();

    let opts = FitOptions {
        epochs: EPOCHS,
        validation_split: 0.0,
        ..FitOptions::default()
    };
    learner.fit(&x.view(), &y, &opts).unwrap();

    let scores = learner.predict_scores_fixed(&x.view()).unwrap();
    let accuracy = categorical_accuracy(&scores.view(), &y.view());
    assert!(
        accuracy >= ACCURACY_FLOOR,
        "categorical accuracy too low: {}",
        accuracy
    );

    let predicted = learner.predict(&Batched::single(x)).unwrap();
    let predicted = predicted.as_single().unwrap();
    let accuracy_pred =
        categorical_accuracy(&choices_to_one_hot(predicted, N_OBJECTS).view(), &y.view());
    assert!((accuracy - accuracy_pred).abs() <= ATOL + RTOL * accuracy_pred.abs());
}

#[test]
fn cmpnet_discrete_choice_recovers_linear_utility() {
    let (x, y) = trivial_discrete_choice_problem();
    let mut learner =
        CmpNetDiscreteChoiceFunction::new(CmpNetDiscreteChoiceFunction::default_config()).unwrap();

    let opts = FitOptions {
        epochs: EPOCHS,
        validation_split: 0.0,
        ..FitOptions::default()
    };
    learner.fit(&x.view(), &y, &opts).unwrap();

    let scores = learner.predict_scores_fixed(&x.view()).unwrap();
    let accuracy = categorical_accuracy(&scores.view(), &y.view());
    assert!(
        accuracy >= ACCURACY_FLOOR,
        "categorical accuracy too low: {}",
        accuracy
    );
}

#[test]
fn ranknet_scores_induce_transitive_preferences() {
    let (x, rankings) = linear_rankings(&SyntheticConfig {
        n_instances: 100,
        n_objects: N_OBJECTS,
        n_features: N_FEATURES,
        seed: 42,
    });
    let mut ranker = RankNetRanker::new(ScoringConfig {
        optimizer: sgd_common(),
        ..ScoringConfig::default()
    })
    .unwrap();
    let opts = FitOptions {
        epochs: 30,
        ..FitOptions::default()
    };
    ranker.fit(&x.view(), &rankings, &opts).unwrap();

    let scores = ranker.predict_scores_fixed(&x.view()).unwrap();
    for row in scores.axis_iter(Axis(0)) {
        for a in 0..N_OBJECTS {
            for b in 0..N_OBJECTS {
                for c in 0..N_OBJECTS {
                    if row[a] > row[b] && row[b] > row[c] {
                        // The pairwise decision for (a, c) derived from the
                        // utilities must also prefer a
                        assert!(row[a] > row[c]);
                    }
                }
            }
        }
    }

    let predicted = ranker.predict(&Batched::single(x)).unwrap();
    let predicted = predicted.as_single().unwrap();
    let tau = mean_kendall_tau(&predicted.view(), &rankings.view());
    assert!(tau > 0.7, "kendall tau too low: {}", tau);
}

#[test]
fn fit_is_idempotent_under_identical_seed() {
    let (x, y) = trivial_discrete_choice_problem();
    let opts = FitOptions {
        epochs: 10,
        validation_split: 0.0,
        ..FitOptions::default()
    };

    let config = ScoringConfig {
        optimizer: sgd_common(),
        ..ScoringConfig::default()
    };
    let mut learner = RankNetDiscreteChoiceFunction::new(config.clone()).unwrap();
    learner.fit(&x.view(), &y, &opts).unwrap();
    let first = learner.predict_scores_fixed(&x.view()).unwrap();

    learner.fit(&x.view(), &y, &opts).unwrap();
    let second = learner.predict_scores_fixed(&x.view()).unwrap();
    assert_all_close(&first, &second, RTOL, ATOL);

    // A fresh learner with the same configuration agrees as well
    let mut fresh = RankNetDiscreteChoiceFunction::new(config).unwrap();
    fresh.fit(&x.view(), &y, &opts).unwrap();
    let third = fresh.predict_scores_fixed(&x.view()).unwrap();
    assert_all_close(&first, &third, RTOL, ATOL);
}

#[test]
fn per_size_batches_round_trip() {
    let (x, y) = trivial_discrete_choice_problem();
    let mut learner = FetaDiscreteChoiceFunction::new(ScoringConfig {
        n_hidden: 1,
        batch_size: 128,
        optimizer: sgd_common(),
        ..FetaDiscreteChoiceFunction::default_config()
    })
    .unwrap();
    let opts = FitOptions {
        epochs: 10,
        ..FitOptions::default()
    };
    learner.fit(&x.view(), &y, &opts).unwrap();

    let (x4, _) = linear_discrete_choice(&SyntheticConfig {
        n_instances: 7,
        n_objects: 4,
        n_features: N_FEATURES,
        seed: 1,
    });
    let (x6, _) = linear_discrete_choice(&SyntheticConfig {
        n_instances: 3,
        n_objects: 6,
        n_features: N_FEATURES,
        seed: 2,
    });
    let mut map = BTreeMap::new();
    map.insert(4, x4);
    map.insert(6, x6);

    let scores = learner.predict_scores(&Batched::by_size(map)).unwrap();
    match &scores {
        Batched::BySize(by_size) => {
            assert_eq!(by_size[&4].dim(), (7, 4));
            assert_eq!(by_size[&6].dim(), (3, 6));
        }
        Batched::Single(_) => panic!("expected per-size scores"),
    }

    let choices = learner.predict_for_scores(&scores);
    match choices {
        Batched::BySize(by_size) => {
            assert_eq!(by_size[&4].len(), 7);
            assert_eq!(by_size[&6].len(), 3);
        }
        Batched::Single(_) => panic!("expected per-size choices"),
    }
}

#[test]
fn choice_function_learns_subset_threshold() {
    let (x, y) = linear_subset_choice(&SyntheticConfig {
        n_instances: 300,
        n_objects: N_OBJECTS,
        n_features: N_FEATURES,
        seed: 42,
    });
    let mut learner = RankNetChoiceFunction::new(ScoringConfig {
        metrics: vec![Metric::BinaryAccuracy],
        optimizer: sgd_common(),
        ..ScoringConfig::default()
    })
    .unwrap();

    let opts = FitOptions {
        epochs: 50,
        tune_size: 0.2,
        thin_thresholds: 1,
        ..FitOptions::default()
    };
    learner.fit(&x.view(), &y, &opts).unwrap();

    let predicted = learner.predict(&Batched::single(x)).unwrap();
    let predicted = predicted.as_single().unwrap();
    let f1 = f1_samples(&y.view(), &predicted.view());
    assert!(f1 > 0.7, "sample-averaged F1 too low: {}", f1);
    assert!(learner.tuned_f1().unwrap() > 0.7);
}
