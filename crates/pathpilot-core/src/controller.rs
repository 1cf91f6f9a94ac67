use crate::action::Action;
use crate::codec::{self, CodecError};
use crate::features::{self, FeatureError, FeatureVector, WorldState};
use crate::grid::TileGrid;
use crate::nn::{Network, NetworkError, Topology};
use crate::raycast::{RayCaster, RayHit, DEBUG_RAYS_PER_QUADRANT};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::path::{Path, PathBuf};
use std::{error::Error, fmt};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Disabled,
    EnabledNoModel,
    EnabledWithModel,
}

/// A model-backed decision with the outputs it was derived from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub raw: [f32; 2],
}

/// Why the model could not produce a decision this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    Disabled,
    NoModel,
    Feature(FeatureError),
    Network(NetworkError),
    /// Model produced this many outputs instead of two.
    OutputWidth(usize),
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Disabled => write!(f, "controller is disabled"),
            InferenceError::NoModel => write!(f, "no model loaded"),
            InferenceError::Feature(e) => write!(f, "feature extraction failed: {e}"),
            InferenceError::Network(e) => write!(f, "forward pass failed: {e}"),
            InferenceError::OutputWidth(n) => write!(f, "model produced {n} outputs, expected 2"),
        }
    }
}

impl Error for InferenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InferenceError::Feature(e) => Some(e),
            InferenceError::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FeatureError> for InferenceError {
    fn from(e: FeatureError) -> Self {
        InferenceError::Feature(e)
    }
}

impl From<NetworkError> for InferenceError {
    fn from(e: NetworkError) -> Self {
        InferenceError::Network(e)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    Codec(CodecError),
    /// Model does not map features to a two-value action.
    IncompatibleModel { expected: Topology, actual: Topology },
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Codec(e) => write!(f, "failed to load model: {e}"),
            ControllerError::IncompatibleModel { expected, actual } => {
                write!(f, "model topology {actual} does not match {expected}")
            }
        }
    }
}

impl Error for ControllerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControllerError::Codec(e) => Some(e),
            ControllerError::IncompatibleModel { .. } => None,
        }
    }
}

impl From<CodecError> for ControllerError {
    fn from(e: CodecError) -> Self {
        ControllerError::Codec(e)
    }
}

/// Per-tick decision maker for the agent.
///
/// Without a model it plays uniformly random actions from its own seeded RNG.
/// When the model fails on a frame it falls back the same way and logs a warning.
pub struct InferenceController {
    enabled: bool,
    topology: Topology,
    model: Option<Network>,
    model_path: Option<PathBuf>,
    caster: RayCaster,
    rng: ChaCha12Rng,
}

impl InferenceController {
    /// Enabled, no model, standard topology.
    pub fn new(seed: u64) -> Self {
        Self::with_topology(Topology::standard(), seed)
    }

    pub fn with_topology(topology: Topology, seed: u64) -> Self {
        Self {
            enabled: true,
            topology,
            model: None,
            model_path: None,
            caster: RayCaster::default(),
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    pub fn state(&self) -> ControllerState {
        match (self.enabled, &self.model) {
            (false, _) => ControllerState::Disabled,
            (true, None) => ControllerState::EnabledNoModel,
            (true, Some(_)) => ControllerState::EnabledWithModel,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn model(&self) -> Option<&Network> {
        self.model.as_ref()
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    /// Load a model file. On failure the previous model is dropped, so the
    /// controller falls back to random play rather than a stale network.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), ControllerError> {
        let path = path.as_ref();
        self.model = None;
        self.model_path = None;
        let network = codec::load_file(path, &self.topology)?;
        self.model = Some(network);
        self.model_path = Some(path.to_path_buf());
        info!(path = %path.display(), topology = %self.topology, "model loaded");
        Ok(())
    }

    /// Install an in-memory network. It must match the controller topology.
    pub fn set_model(&mut self, network: Network) -> Result<(), ControllerError> {
        if network.topology() != &self.topology {
            return Err(ControllerError::IncompatibleModel {
                expected: self.topology.clone(),
                actual: network.topology().clone(),
            });
        }
        self.model = Some(network);
        self.model_path = None;
        Ok(())
    }

    pub fn clear_model(&mut self) {
        self.model = None;
        self.model_path = None;
    }

    /// Action for this tick. Never fails: see [`InferenceController::try_decide`]
    /// for the explicit path.
    pub fn decide(&mut self, state: &WorldState, grid: &TileGrid) -> Action {
        let result = self.try_decide(state, grid);
        self.resolve(result)
    }

    /// Action for an already-built feature vector.
    pub fn decide_features(&mut self, features: &[f32]) -> Action {
        let result = self.try_decide_features(features);
        self.resolve(result)
    }

    pub fn try_decide(
        &self,
        state: &WorldState,
        grid: &TileGrid,
    ) -> Result<Decision, InferenceError> {
        let network = self.ready_model()?;
        let features = features::extract_from_world(state, grid, &self.caster)?;
        Self::run(network, &features)
    }

    pub fn try_decide_features(&self, features: &[f32]) -> Result<Decision, InferenceError> {
        let network = self.ready_model()?;
        let features = FeatureVector::from_normalized(features)?;
        Self::run(network, &features)
    }

    /// Rays for the on-screen overlay, cast from the player center.
    pub fn debug_rays(&self, state: &WorldState, grid: &TileGrid) -> Vec<RayHit> {
        self.caster
            .cast(state.player_center(), grid, DEBUG_RAYS_PER_QUADRANT)
    }

    fn ready_model(&self) -> Result<&Network, InferenceError> {
        if !self.enabled {
            return Err(InferenceError::Disabled);
        }
        self.model.as_ref().ok_or(InferenceError::NoModel)
    }

    fn run(network: &Network, features: &FeatureVector) -> Result<Decision, InferenceError> {
        let out = network.forward(features.as_slice())?;
        let raw = match out.as_slice() {
            &[move_x, use_energy] => [move_x, use_energy],
            other => return Err(InferenceError::OutputWidth(other.len())),
        };
        Ok(Decision {
            action: Action::discretize(raw),
            raw,
        })
    }

    fn resolve(&mut self, result: Result<Decision, InferenceError>) -> Action {
        match result {
            Ok(decision) => decision.action,
            Err(InferenceError::Disabled) => Action::NONE,
            Err(InferenceError::NoModel) => Action::random(&mut self.rng),
            Err(e) => {
                warn!(error = %e, "model inference failed, falling back to random action");
                Action::random(&mut self.rng)
            }
        }
    }
}
