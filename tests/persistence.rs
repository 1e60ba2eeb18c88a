//! Weight persistence and the clear-and-rebuild memory-reclaim cycle.

use ndarray::{Array2, Array3};
use prefrank::data::{linear_discrete_choice, linear_rankings, SyntheticConfig};
use prefrank::learner::{
    FetaDiscreteChoiceFunction, RankNetRanker, ScoreProducer, Trainable,
};
use prefrank::{Checkpointable, CmpNetCore, FetaCore, FitOptions, RankNetCore, ScoringConfig};

fn assert_scores_match(a: &Array2<f32>, b: &Array2<f32>) {
    assert_eq!(a.dim(), b.dim());
    for (&x, &y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-6, "scores diverge: {} vs {}", x, y);
    }
}

fn ranking_task() -> (Array3<f32>, ndarray::Array2<usize>) {
    linear_rankings(&SyntheticConfig {
        n_instances: 60,
        n_objects: 4,
        n_features: 3,
        seed: 11,
    })
}

fn fast_config() -> ScoringConfig {
    ScoringConfig {
        n_hidden: 2,
        batch_normalization: true,
        batch_size: 128,
        ..ScoringConfig::default()
    }
}

#[test]
fn ranknet_rebuild_preserves_predictions() {
    let (x, rankings) = ranking_task();
    let mut ranker = RankNetRanker::new(fast_config()).unwrap();
    let opts = FitOptions {
        epochs: 10,
        ..FitOptions::default()
    };
    ranker.fit(&x.view(), &rankings, &opts).unwrap();
    let before = ranker.predict_scores_fixed(&x.view()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ranknet.weights");
    ranker.rebuild_via(&path).unwrap();

    let after = ranker.predict_scores_fixed(&x.view()).unwrap();
    assert_scores_match(&before, &after);
}

#[test]
fn cmpnet_checkpoint_round_trips() {
    let (x, rankings) = ranking_task();
    let pairs = prefrank::data::from_rankings(&x.view(), &rankings.view()).unwrap();
    let mut core = CmpNetCore::new(ScoringConfig {
        batch_normalization: false,
        ..fast_config()
    })
    .unwrap();
    core.fit_pairs(&pairs, &FitOptions::default(), None).unwrap();
    let before = core.predict_scores_fixed(&x.view()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmpnet.weights");
    core.save_checkpoint(&path).unwrap();
    let restored = CmpNetCore::load_checkpoint(&path).unwrap();

    let after = restored.predict_scores_fixed(&x.view()).unwrap();
    assert_scores_match(&before, &after);
}

#[test]
fn feta_zeroth_order_rebuild_preserves_predictions() {
    let (x, y) = linear_discrete_choice(&SyntheticConfig {
        n_instances: 50,
        n_objects: 4,
        n_features: 2,
        seed: 19,
    });
    let mut learner = FetaDiscreteChoiceFunction::new(ScoringConfig {
        n_hidden: 1,
        batch_size: 64,
        ..FetaDiscreteChoiceFunction::default_config()
    })
    .unwrap()
    .with_zeroth_order(true);
    let opts = FitOptions {
        epochs: 5,
        ..FitOptions::default()
    };
    learner.fit(&x.view(), &y, &opts).unwrap();
    let before = learner.predict_scores_fixed(&x.view()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feta.weights");
    learner.rebuild_via(&path).unwrap();

    let after = learner.predict_scores_fixed(&x.view()).unwrap();
    assert_scores_match(&before, &after);
}

#[test]
fn unfitted_model_refuses_to_serialize() {
    let core = RankNetCore::new(fast_config()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unfitted.weights");
    assert!(core.save_checkpoint(&path).is_err());
}

#[test]
fn snapshots_are_not_interchangeable_across_models() {
    let (x, rankings) = ranking_task();
    let pairs = prefrank::data::from_rankings(&x.view(), &rankings.view()).unwrap();
    let mut ranknet = RankNetCore::new(fast_config()).unwrap();
    ranknet
        .fit_pairs(&pairs, &FitOptions::default(), None)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ranknet.weights");
    ranknet.save_checkpoint(&path).unwrap();

    // A FETA snapshot has a different structure; loading must fail cleanly
    assert!(FetaCore::load_checkpoint(&path).is_err());
}
