#[cfg(test)]
mod tests;

use crate::action::Action;
use crate::codec::{self, CodecError, ModelFormat};
use crate::config::{TrainingConfig, TrainingConfigError};
use crate::features::FeatureVector;
use crate::nn::{Network, NetworkError, Topology};
use crate::optim::{Adam, Gradients};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use std::{error::Error, fmt, fs};
use tracing::{debug, info, warn};

pub const BEST_MODEL_FILE: &str = "best_model.bin";

/// One supervised example: normalized features in, action target out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

impl Sample {
    pub fn new(features: &FeatureVector, action: Action) -> Self {
        Self {
            input: features.to_vec(),
            target: action.to_target().to_vec(),
        }
    }
}

/// Samples from one play-through, in recording order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub samples: Vec<Sample>,
    pub success: bool,
}

/// Flatten episodes into one sample list.
pub fn flatten(episodes: &[Episode]) -> Vec<Sample> {
    episodes
        .iter()
        .flat_map(|e| e.samples.iter().cloned())
        .collect()
}

/// Shared stop flag, polled by the trainer once per batch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub enum TrainError {
    Config(TrainingConfigError),
    NoData,
    DimensionMismatch {
        sample: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    NonFinite { epoch: usize, batch: usize },
    Cancelled { epoch: usize },
    Checkpoint(CodecError),
    Network(NetworkError),
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainError::Config(e) => write!(f, "{e}"),
            TrainError::NoData => write!(f, "no training samples"),
            TrainError::DimensionMismatch {
                sample,
                expected,
                actual,
            } => write!(
                f,
                "sample {sample} has shape {}→{}, network expects {}→{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            TrainError::NonFinite { epoch, batch } => {
                write!(f, "non-finite loss or gradient at epoch {epoch}, batch {batch}")
            }
            TrainError::Cancelled { epoch } => write!(f, "training cancelled during epoch {epoch}"),
            TrainError::Checkpoint(e) => write!(f, "checkpoint failed: {e}"),
            TrainError::Network(e) => write!(f, "{e}"),
        }
    }
}

impl Error for TrainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainError::Config(e) => Some(e),
            TrainError::Checkpoint(e) => Some(e),
            TrainError::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TrainingConfigError> for TrainError {
    fn from(e: TrainingConfigError) -> Self {
        TrainError::Config(e)
    }
}

impl From<NetworkError> for TrainError {
    fn from(e: NetworkError) -> Self {
        TrainError::Network(e)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based.
    pub epoch: usize,
    pub train_loss: f32,
    pub validation_loss: f32,
    pub improved: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub epochs_completed: usize,
    pub best_epoch: usize,
    pub best_validation_loss: f32,
    pub stopped_early: bool,
    /// Share of held-out samples whose discretized prediction matches the
    /// recorded action. `None` without a validation split or for non-action outputs.
    pub validation_accuracy: Option<f32>,
    pub elapsed_secs: f64,
    pub history: Vec<EpochStats>,
}

#[derive(Clone, Debug)]
pub struct TrainOutcome {
    pub network: Network,
    pub stats: TrainingStats,
}

/// Owns the network under training, its optimizer state and its RNG.
///
/// Adam moments and the step counter live as long as the network: consecutive
/// `train` calls continue them, `reinitialize` clears them.
pub struct Trainer {
    config: TrainingConfig,
    network: Network,
    adam: Adam,
    rng: ChaCha12Rng,
    cancel: CancelToken,
}

impl Trainer {
    /// Fresh Xavier-initialized network seeded from `config.seed`.
    pub fn new(config: TrainingConfig, topology: Topology) -> Result<Self, TrainError> {
        config.validate()?;
        let mut rng = ChaCha12Rng::seed_from_u64(config.seed);
        let network = Network::xavier(topology, &mut rng);
        let adam = Adam::new(&network, config.learning_rate);
        Ok(Self {
            config,
            network,
            adam,
            rng,
            cancel: CancelToken::new(),
        })
    }

    /// Continue training an existing network.
    pub fn with_network(config: TrainingConfig, network: Network) -> Result<Self, TrainError> {
        config.validate()?;
        let rng = ChaCha12Rng::seed_from_u64(config.seed);
        let adam = Adam::new(&network, config.learning_rate);
        Ok(Self {
            config,
            network,
            adam,
            rng,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Adam updates applied to the current weights so far.
    pub fn optimizer_steps(&self) -> u64 {
        self.adam.steps()
    }

    /// Re-draw the weights from the trainer's RNG and forget the optimizer state.
    pub fn reinitialize(&mut self) {
        let topology = self.network.topology().clone();
        self.network = Network::xavier(topology, &mut self.rng);
        self.adam.reset();
    }

    pub fn train(&mut self, episodes: &[Episode]) -> Result<TrainOutcome, TrainError> {
        self.train_samples(flatten(episodes))
    }

    pub fn train_samples(&mut self, mut samples: Vec<Sample>) -> Result<TrainOutcome, TrainError> {
        if samples.is_empty() {
            return Err(TrainError::NoData);
        }
        self.check_shapes(&samples)?;
        if let Some(dir) = &self.config.checkpoint_dir {
            fs::create_dir_all(dir).map_err(|source| {
                TrainError::Checkpoint(CodecError::Io {
                    path: dir.clone(),
                    source,
                })
            })?;
        }

        let started = Instant::now();
        samples.shuffle(&mut self.rng);
        let val_len = (samples.len() as f32 * self.config.validation_split) as usize;
        let val_set = samples.split_off(samples.len() - val_len);
        let mut train_set = samples;
        if train_set.is_empty() {
            return Err(TrainError::NoData);
        }
        self.augment(&mut train_set)?;

        info!(
            train = train_set.len(),
            validation = val_set.len(),
            topology = %self.network.topology(),
            "starting training"
        );

        let cfg = self.config.clone();
        let mut grads = Gradients::zeros_like(&self.network);
        let mut order: Vec<usize> = (0..train_set.len()).collect();

        let mut stats = TrainingStats {
            train_samples: train_set.len(),
            validation_samples: val_set.len(),
            best_validation_loss: f32::INFINITY,
            ..TrainingStats::default()
        };
        let mut best = self.network.clone();
        let mut stale_epochs = 0;

        for epoch in 1..=cfg.epochs {
            order.shuffle(&mut self.rng);
            let mut loss_sum = 0.0f32;

            for (batch, chunk) in order.chunks(cfg.batch_size).enumerate() {
                if self.cancel.is_cancelled() {
                    warn!(epoch, batch, "training cancelled");
                    return Err(TrainError::Cancelled { epoch });
                }
                grads.reset();
                let mut batch_loss = 0.0f32;
                for &i in chunk {
                    let s = &train_set[i];
                    batch_loss += self.network.accumulate_mse(&s.input, &s.target, &mut grads)?;
                }
                grads.scale(1.0 / chunk.len() as f32);
                if !batch_loss.is_finite() || !grads.is_finite() {
                    return Err(TrainError::NonFinite { epoch, batch });
                }
                if let Some(max_norm) = cfg.gradient_clip_norm {
                    grads.clip_global_norm(max_norm);
                }
                self.adam.step(&mut self.network, &grads);
                loss_sum += batch_loss;
                debug!(
                    epoch,
                    batch,
                    loss = batch_loss / chunk.len() as f32,
                    "batch done"
                );
            }

            let train_loss = loss_sum / train_set.len() as f32;
            let validation_loss = if val_set.is_empty() {
                train_loss
            } else {
                self.evaluate(&val_set)?
            };
            if !validation_loss.is_finite() {
                return Err(TrainError::NonFinite { epoch, batch: 0 });
            }

            let improved = validation_loss < stats.best_validation_loss - cfg.min_delta;
            if improved {
                stats.best_validation_loss = validation_loss;
                stats.best_epoch = epoch;
                stale_epochs = 0;
                best = self.network.clone();
                if let Some(dir) = &cfg.checkpoint_dir {
                    save_checkpoint(&dir.join(BEST_MODEL_FILE), &best)?;
                }
            } else {
                stale_epochs += 1;
            }
            stats.history.push(EpochStats {
                epoch,
                train_loss,
                validation_loss,
                improved,
            });
            stats.epochs_completed = epoch;
            info!(epoch, train_loss, validation_loss, improved, "epoch done");

            if let Some(dir) = &cfg.checkpoint_dir {
                if cfg.checkpoint_every > 0 && epoch % cfg.checkpoint_every == 0 {
                    let path = dir.join(format!("model_epoch_{epoch}.bin"));
                    save_checkpoint(&path, &self.network)?;
                    debug!(path = %path.display(), "saved intermediate model");
                }
            }

            if cfg.early_stopping_patience > 0 && stale_epochs >= cfg.early_stopping_patience {
                warn!(
                    epoch,
                    best_epoch = stats.best_epoch,
                    "early stopping: no improvement for {stale_epochs} epochs"
                );
                stats.stopped_early = true;
                break;
            }
        }

        self.network = best;
        if !val_set.is_empty() && self.network.output_dim() == 2 {
            stats.validation_accuracy = Some(action_accuracy(&self.network, &val_set)?);
        }
        stats.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            best_epoch = stats.best_epoch,
            best_validation_loss = stats.best_validation_loss,
            "training finished"
        );

        Ok(TrainOutcome {
            network: self.network.clone(),
            stats,
        })
    }

    /// Mean MSE of the current network over `samples`.
    pub fn evaluate(&self, samples: &[Sample]) -> Result<f32, TrainError> {
        evaluate(&self.network, samples)
    }

    fn check_shapes(&self, samples: &[Sample]) -> Result<(), TrainError> {
        let expected = (self.network.input_dim(), self.network.output_dim());
        for (i, s) in samples.iter().enumerate() {
            let actual = (s.input.len(), s.target.len());
            if actual != expected {
                return Err(TrainError::DimensionMismatch {
                    sample: i,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn augment(&mut self, samples: &mut [Sample]) -> Result<(), TrainError> {
        let Some(sigma) = self.config.augment_noise_std.filter(|&s| s > 0.0) else {
            return Ok(());
        };
        let noise = Normal::new(0.0f32, sigma)
            .map_err(|_| TrainError::Config(TrainingConfigError::InvalidNoiseStd(sigma)))?;
        for s in samples {
            for v in &mut s.input {
                *v += noise.sample(&mut self.rng);
            }
        }
        Ok(())
    }
}

/// Mean MSE of `network` over `samples`. Empty input gives 0.
pub fn evaluate(network: &Network, samples: &[Sample]) -> Result<f32, TrainError> {
    if samples.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0f32;
    for s in samples {
        total += network.mse(&s.input, &s.target)?;
    }
    Ok(total / samples.len() as f32)
}

/// Share of samples whose discretized output equals the discretized target.
pub fn action_accuracy(network: &Network, samples: &[Sample]) -> Result<f32, TrainError> {
    if samples.is_empty() {
        return Ok(0.0);
    }
    let mut hits = 0usize;
    for s in samples {
        let out = network.forward(&s.input)?;
        let (Some(&p0), Some(&p1), Some(&t0), Some(&t1)) =
            (out.first(), out.get(1), s.target.first(), s.target.get(1))
        else {
            continue;
        };
        if Action::discretize([p0, p1]) == Action::discretize([t0, t1]) {
            hits += 1;
        }
    }
    Ok(hits as f32 / samples.len() as f32)
}

fn save_checkpoint(path: &Path, network: &Network) -> Result<(), TrainError> {
    codec::save_file(path, network, ModelFormat::Versioned).map_err(TrainError::Checkpoint)
}

/// Path of the best-model checkpoint inside `dir`.
pub fn best_model_path(dir: &Path) -> PathBuf {
    dir.join(BEST_MODEL_FILE)
}
