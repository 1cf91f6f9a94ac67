use super::*;
use crate::matrix::Matrix;
use crate::nn::{Activation, Dense};
use rand::Rng;

fn quiet_config() -> TrainingConfig {
    TrainingConfig {
        batch_size: 16,
        epochs: 5,
        learning_rate: 0.01,
        validation_split: 0.2,
        early_stopping_patience: 0,
        augment_noise_std: None,
        min_delta: 0.0,
        checkpoint_every: 0,
        ..TrainingConfig::default()
    }
}

fn linear_samples(n: usize, seed: u64) -> Vec<Sample> {
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x0: f32 = rng.random_range(-1.0..1.0);
            let x1: f32 = rng.random_range(-1.0..1.0);
            Sample {
                input: vec![x0, x1],
                target: vec![0.5 * x0 - 0.3 * x1],
            }
        })
        .collect()
}

fn two_two_one() -> Network {
    let hidden = Dense {
        weights: Matrix::from_vec(2, 2, vec![0.5, -0.4, 0.3, 0.8]).unwrap(),
        bias: vec![0.1, 0.2],
        activation: Activation::Relu,
    };
    let out = Dense {
        weights: Matrix::from_vec(2, 1, vec![0.7, -0.6]).unwrap(),
        bias: vec![0.05],
        activation: Activation::Linear,
    };
    Network::from_layers(vec![hidden, out]).unwrap()
}

#[test]
fn backprop_matches_finite_differences() {
    let net = two_two_one();
    let input = [1.0, 0.5];
    let target = [0.3];

    let mut grads = Gradients::zeros_like(&net);
    net.accumulate_mse(&input, &target, &mut grads).unwrap();

    let eps = 1e-3;
    let numeric = |perturb: &dyn Fn(&mut Network, f32)| {
        let mut plus = net.clone();
        perturb(&mut plus, eps);
        let mut minus = net.clone();
        perturb(&mut minus, -eps);
        (plus.mse(&input, &target).unwrap() - minus.mse(&input, &target).unwrap()) / (2.0 * eps)
    };

    for k in 0..2 {
        let (gw, gb) = grads.layer(k);
        for idx in 0..gw.len() {
            let n = numeric(&|m: &mut Network, d: f32| m.layers_mut()[k].weights.as_mut_slice()[idx] += d);
            let a = gw.as_slice()[idx];
            assert!((n - a).abs() < 1e-3, "layer {k} weight {idx}: numeric {n} vs analytic {a}");
        }
        for idx in 0..gb.len() {
            let n = numeric(&|m: &mut Network, d: f32| m.layers_mut()[k].bias[idx] += d);
            let a = gb[idx];
            assert!((n - a).abs() < 1e-3, "layer {k} bias {idx}: numeric {n} vs analytic {a}");
        }
    }
}

#[test]
fn learns_a_linear_target() {
    let topology = Topology::new(vec![2, 8, 1]).unwrap();
    let config = TrainingConfig {
        epochs: 200,
        ..quiet_config()
    };
    let mut trainer = Trainer::new(config, topology).unwrap();
    let samples = linear_samples(200, 3);
    let before = evaluate(trainer.network(), &samples).unwrap();

    let outcome = trainer.train_samples(samples.clone()).unwrap();
    let after = evaluate(&outcome.network, &samples).unwrap();

    assert!(after < 0.02, "loss stayed at {after}");
    let early: Vec<f32> = outcome.stats.history[..5].iter().map(|e| e.train_loss).collect();
    assert!(
        early.windows(2).all(|w| w[1] < w[0]),
        "training loss not strictly decreasing: {early:?}"
    );
    assert!(after < before / 5.0, "before {before}, after {after}");
    assert_eq!(outcome.stats.train_samples, 160);
    assert_eq!(outcome.stats.validation_samples, 40);
    assert_eq!(outcome.stats.epochs_completed, 200);
    assert!(outcome.stats.validation_accuracy.is_none());
    assert_eq!(&outcome.network, trainer.network());
}

#[test]
fn optimizer_state_carries_across_train_calls() {
    // One full batch per epoch and no validation split, so each epoch is a
    // single Adam update on the whole set.
    let config = TrainingConfig {
        batch_size: 1000,
        epochs: 1,
        validation_split: 0.0,
        ..quiet_config()
    };
    let topology = Topology::new(vec![2, 1]).unwrap();
    let samples = linear_samples(64, 21);

    let mut split = Trainer::new(config.clone(), topology.clone()).unwrap();
    split.train_samples(samples.clone()).unwrap();
    assert_eq!(split.optimizer_steps(), 1);
    split.train_samples(samples.clone()).unwrap();
    assert_eq!(split.optimizer_steps(), 2);

    let mut joined = Trainer::new(TrainingConfig { epochs: 2, ..config }, topology).unwrap();
    let outcome = joined.train_samples(samples).unwrap();
    assert_eq!(outcome.stats.best_epoch, 2);
    assert_eq!(joined.optimizer_steps(), 2);

    let a = split.network().layers()[0].weights.as_slice();
    let b = joined.network().layers()[0].weights.as_slice();
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "split {a:?} vs joined {b:?}");
    }

    split.reinitialize();
    assert_eq!(split.optimizer_steps(), 0);
}

#[test]
fn same_seed_same_network() {
    let run = || {
        let mut t = Trainer::new(quiet_config(), Topology::new(vec![2, 4, 1]).unwrap()).unwrap();
        t.train_samples(linear_samples(50, 9)).unwrap().network
    };
    assert_eq!(run(), run());
}

#[test]
fn empty_input_is_no_data() {
    let mut t = Trainer::new(quiet_config(), Topology::new(vec![2, 1]).unwrap()).unwrap();
    assert!(matches!(t.train(&[]), Err(TrainError::NoData)));
    assert!(matches!(
        t.train(&[Episode::default()]),
        Err(TrainError::NoData)
    ));
}

#[test]
fn wrong_sample_shape_is_rejected() {
    let mut t = Trainer::new(quiet_config(), Topology::new(vec![2, 1]).unwrap()).unwrap();
    let mut samples = linear_samples(4, 1);
    samples[2].input.push(0.0);
    match t.train_samples(samples) {
        Err(TrainError::DimensionMismatch {
            sample,
            expected,
            actual,
        }) => {
            assert_eq!(sample, 2);
            assert_eq!(expected, (2, 1));
            assert_eq!(actual, (3, 1));
        }
        other => panic!("expected dimension mismatch, got {other:?}"),
    }
}

#[test]
fn cancelled_before_first_batch() {
    let mut t = Trainer::new(quiet_config(), Topology::new(vec![2, 1]).unwrap()).unwrap();
    t.cancel_token().cancel();
    assert!(matches!(
        t.train_samples(linear_samples(20, 2)),
        Err(TrainError::Cancelled { epoch: 1 })
    ));
}

#[test]
fn nan_target_is_reported() {
    let mut t = Trainer::new(
        TrainingConfig {
            validation_split: 0.0,
            ..quiet_config()
        },
        Topology::new(vec![2, 1]).unwrap(),
    )
    .unwrap();
    let mut samples = linear_samples(8, 4);
    samples[0].target[0] = f32::NAN;
    assert!(matches!(
        t.train_samples(samples),
        Err(TrainError::NonFinite { epoch: 1, .. })
    ));
}

#[test]
fn negligible_improvement_does_not_reset_patience() {
    // At this learning rate each epoch improves the loss by far less than the
    // default margin, so only epoch 1 counts as progress.
    let config = TrainingConfig {
        epochs: 100,
        learning_rate: 1e-7,
        early_stopping_patience: 3,
        min_delta: crate::config::DEFAULT_MIN_DELTA,
        ..quiet_config()
    };
    let mut t = Trainer::new(config, Topology::new(vec![2, 4, 1]).unwrap()).unwrap();
    let outcome = t.train_samples(linear_samples(64, 5)).unwrap();
    assert!(outcome.stats.stopped_early);
    assert_eq!(outcome.stats.best_epoch, 1);
    assert_eq!(outcome.stats.epochs_completed, 4);
}

#[test]
fn early_stopping_after_patience() {
    let config = TrainingConfig {
        epochs: 100,
        early_stopping_patience: 3,
        // Nothing after the first epoch can beat the best by this much.
        min_delta: 10.0,
        ..quiet_config()
    };
    let mut t = Trainer::new(config, Topology::new(vec![2, 4, 1]).unwrap()).unwrap();
    let outcome = t.train_samples(linear_samples(40, 5)).unwrap();
    assert!(outcome.stats.stopped_early);
    assert_eq!(outcome.stats.best_epoch, 1);
    assert_eq!(outcome.stats.epochs_completed, 4);
    assert_eq!(outcome.stats.history.len(), 4);
    assert!(outcome.stats.history[0].improved);
    assert!(outcome.stats.history[1..].iter().all(|e| !e.improved));
}

#[test]
fn empty_validation_split_uses_training_loss() {
    let config = TrainingConfig {
        validation_split: 0.0,
        epochs: 3,
        ..quiet_config()
    };
    let mut t = Trainer::new(config, Topology::new(vec![2, 4, 1]).unwrap()).unwrap();
    let outcome = t.train_samples(linear_samples(30, 6)).unwrap();
    assert_eq!(outcome.stats.validation_samples, 0);
    for e in &outcome.stats.history {
        assert_eq!(e.train_loss, e.validation_loss);
    }
}

#[test]
fn checkpoints_are_written_and_best_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let topology = Topology::new(vec![2, 4, 1]).unwrap();
    let config = TrainingConfig {
        epochs: 4,
        checkpoint_every: 2,
        checkpoint_dir: Some(dir.path().to_path_buf()),
        ..quiet_config()
    };
    let mut t = Trainer::new(config, topology.clone()).unwrap();
    let outcome = t.train_samples(linear_samples(40, 7)).unwrap();

    assert!(dir.path().join("model_epoch_2.bin").exists());
    assert!(dir.path().join("model_epoch_4.bin").exists());
    assert!(!dir.path().join("model_epoch_3.bin").exists());
    let best = codec::load_file(best_model_path(dir.path()), &topology).unwrap();
    assert_eq!(best, outcome.network);
}

#[test]
fn unwritable_checkpoint_dir_is_an_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let config = TrainingConfig {
        checkpoint_dir: Some(file.path().to_path_buf()),
        ..quiet_config()
    };
    let mut t = Trainer::new(config, Topology::new(vec![2, 1]).unwrap()).unwrap();
    let err = t.train_samples(linear_samples(10, 8)).unwrap_err();
    assert!(matches!(err, TrainError::Checkpoint(_)));
    assert!(err.source().is_some());
}

#[test]
fn action_samples_report_accuracy() {
    let mut rng = ChaCha12Rng::seed_from_u64(10);
    let samples: Vec<Sample> = (0..60)
        .map(|_| {
            let action = Action::random(&mut rng);
            let mut input = vec![0.0; 4];
            input[(action.move_x + 1) as usize] = 1.0;
            input[3] = if action.use_energy { 1.0 } else { 0.0 };
            Sample {
                input,
                target: action.to_target().to_vec(),
            }
        })
        .collect();
    let config = TrainingConfig {
        epochs: 300,
        ..quiet_config()
    };
    let mut t = Trainer::new(config, Topology::new(vec![4, 16, 2]).unwrap()).unwrap();
    let outcome = t.train_samples(samples).unwrap();
    let accuracy = outcome.stats.validation_accuracy.unwrap();
    assert!(accuracy > 0.9, "accuracy {accuracy}");
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let config = TrainingConfig {
        batch_size: 0,
        ..TrainingConfig::default()
    };
    assert!(matches!(
        Trainer::new(config, Topology::standard()),
        Err(TrainError::Config(TrainingConfigError::InvalidBatchSize))
    ));
}
