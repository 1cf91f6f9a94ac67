use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::{error::Error, fmt};

/// Smallest validation-loss drop that counts as progress for early stopping.
pub const DEFAULT_MIN_DELTA: f32 = 1e-4;

/// Hyperparameters for supervised training.
///
/// Deserializes with per-field defaults, so a partial JSON file overrides only
/// the keys it names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Fraction of samples held out for validation, in `[0, 1)`.
    pub validation_split: f32,
    /// Consecutive non-improving epochs before stopping. 0 disables early stopping.
    pub early_stopping_patience: usize,
    /// Validation loss must drop by more than this to count as an improvement.
    /// Defaults to `DEFAULT_MIN_DELTA`; 0 counts any decrease.
    pub min_delta: f32,
    /// Std-dev of Gaussian noise added once to the training inputs.
    pub augment_noise_std: Option<f32>,
    pub gradient_clip_norm: Option<f32>,
    pub seed: u64,
    /// Write `model_epoch_<n>.bin` every this many epochs. 0 disables.
    pub checkpoint_every: usize,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            epochs: 1000,
            learning_rate: 0.001,
            validation_split: 0.2,
            early_stopping_patience: 10,
            min_delta: DEFAULT_MIN_DELTA,
            augment_noise_std: Some(0.01),
            gradient_clip_norm: None,
            seed: 42,
            checkpoint_every: 20,
            checkpoint_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingConfigError {
    InvalidBatchSize,
    InvalidEpochs,
    TooManyEpochs { max: usize, actual: usize },
    InvalidLearningRate(f32),
    InvalidValidationSplit(f32),
    InvalidMinDelta(f32),
    InvalidNoiseStd(f32),
    InvalidClipNorm(f32),
}

impl fmt::Display for TrainingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingConfigError::InvalidBatchSize => write!(f, "batch_size must be positive"),
            TrainingConfigError::InvalidEpochs => write!(f, "epochs must be positive"),
            TrainingConfigError::TooManyEpochs { max, actual } => {
                write!(f, "epochs ({actual}) exceed supported maximum ({max})")
            }
            TrainingConfigError::InvalidLearningRate(v) => {
                write!(f, "learning_rate must be finite and positive, got {v}")
            }
            TrainingConfigError::InvalidValidationSplit(v) => {
                write!(f, "validation_split must be in [0, 1), got {v}")
            }
            TrainingConfigError::InvalidMinDelta(v) => {
                write!(f, "min_delta must be finite and non-negative, got {v}")
            }
            TrainingConfigError::InvalidNoiseStd(v) => {
                write!(f, "augment_noise_std must be finite and non-negative, got {v}")
            }
            TrainingConfigError::InvalidClipNorm(v) => {
                write!(f, "gradient_clip_norm must be finite and positive, got {v}")
            }
        }
    }
}

impl Error for TrainingConfigError {}

impl TrainingConfig {
    pub const MAX_EPOCHS: usize = 1_000_000;

    /// Settings of the stock behavior-cloning run: fewer, larger batches.
    pub fn behavior_cloning() -> Self {
        Self {
            batch_size: 256,
            epochs: 50,
            learning_rate: 0.002,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrainingConfigError> {
        if self.batch_size == 0 {
            return Err(TrainingConfigError::InvalidBatchSize);
        }
        if self.epochs == 0 {
            return Err(TrainingConfigError::InvalidEpochs);
        }
        if self.epochs > Self::MAX_EPOCHS {
            return Err(TrainingConfigError::TooManyEpochs {
                max: Self::MAX_EPOCHS,
                actual: self.epochs,
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingConfigError::InvalidLearningRate(self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(TrainingConfigError::InvalidValidationSplit(
                self.validation_split,
            ));
        }
        if !(self.min_delta.is_finite() && self.min_delta >= 0.0) {
            return Err(TrainingConfigError::InvalidMinDelta(self.min_delta));
        }
        if let Some(std) = self.augment_noise_std {
            if !(std.is_finite() && std >= 0.0) {
                return Err(TrainingConfigError::InvalidNoiseStd(std));
            }
        }
        if let Some(norm) = self.gradient_clip_norm {
            if !(norm.is_finite() && norm > 0.0) {
                return Err(TrainingConfigError::InvalidClipNorm(norm));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TrainingConfig::default().validate(), Ok(()));
        assert_eq!(TrainingConfig::behavior_cloning().validate(), Ok(()));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let cfg: TrainingConfig =
            serde_json::from_str(r#"{"epochs": 5, "gradient_clip_norm": 1.5}"#).unwrap();
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.gradient_clip_norm, Some(1.5));
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.augment_noise_std, Some(0.01));
        assert_eq!(cfg.min_delta, DEFAULT_MIN_DELTA);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad = |f: fn(&mut TrainingConfig)| {
            let mut c = TrainingConfig::default();
            f(&mut c);
            c.validate().unwrap_err()
        };
        assert_eq!(bad(|c| c.batch_size = 0), TrainingConfigError::InvalidBatchSize);
        assert_eq!(bad(|c| c.epochs = 0), TrainingConfigError::InvalidEpochs);
        assert!(matches!(
            bad(|c| c.learning_rate = f32::NAN),
            TrainingConfigError::InvalidLearningRate(_)
        ));
        assert_eq!(
            bad(|c| c.validation_split = 1.0),
            TrainingConfigError::InvalidValidationSplit(1.0)
        );
        assert_eq!(
            bad(|c| c.augment_noise_std = Some(-0.1)),
            TrainingConfigError::InvalidNoiseStd(-0.1)
        );
        assert_eq!(
            bad(|c| c.gradient_clip_norm = Some(0.0)),
            TrainingConfigError::InvalidClipNorm(0.0)
        );
    }
}
