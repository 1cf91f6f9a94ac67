use pathpilot_core::codec::{self, ModelFormat};
use pathpilot_core::dataset;
use pathpilot_core::features;
use pathpilot_core::training::{Episode, Trainer};
use pathpilot_core::{
    ControllerState, InferenceController, RayCaster, TileGrid, Topology, TrainingConfig, Vec2, WorldState,
};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

/// Python bindings over pathpilot-core for the game loop and training scripts.
#[pyfunction]
fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn world_state(
    position: (f32, f32),
    velocity: (f32, f32),
    energy: f32,
    grounded: bool,
    target: (f32, f32),
) -> WorldState {
    WorldState {
        player_position: Vec2::new(position.0, position.1),
        player_velocity: Vec2::new(velocity.0, velocity.1),
        energy,
        grounded,
        target: Vec2::new(target.0, target.1),
    }
}

/// Normalized 130-feature vector for one frame of the given level.
#[pyfunction]
fn extract_features(
    level: Vec<String>,
    position: (f32, f32),
    velocity: (f32, f32),
    energy: f32,
    grounded: bool,
    target: (f32, f32),
) -> PyResult<Vec<f32>> {
    let grid = TileGrid::from_rows(&level);
    let state = world_state(position, velocity, energy, grounded, target);
    let caster = RayCaster::default();
    features::extract_from_world(&state, &grid, &caster)
        .map(|v| v.to_vec())
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Train the standard network on recorded CSV files and write it to `out`.
/// `config_json` may name any subset of the training config keys. Returns the
/// training statistics as JSON.
#[pyfunction]
#[pyo3(signature = (paths, out, config_json=None))]
fn train(paths: Vec<String>, out: String, config_json: Option<String>) -> PyResult<String> {
    let config: TrainingConfig = match config_json {
        Some(text) => {
            serde_json::from_str(&text).map_err(|e| PyValueError::new_err(e.to_string()))?
        }
        None => TrainingConfig::behavior_cloning(),
    };
    let episodes = paths
        .iter()
        .map(|p| {
            let frames = dataset::read_csv_file(p)?;
            dataset::frames_to_episode(&frames, true)
        })
        .collect::<Result<Vec<Episode>, _>>()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let mut trainer = Trainer::new(config, Topology::standard())
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let outcome = trainer
        .train(&episodes)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    codec::save_file(&out, &outcome.network, ModelFormat::Versioned)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    serde_json::to_string(&outcome.stats).map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

#[pyclass(name = "Controller")]
struct PyController {
    inner: InferenceController,
}

#[pymethods]
impl PyController {
    #[new]
    #[pyo3(signature = (seed=0))]
    fn new(seed: u64) -> Self {
        Self {
            inner: InferenceController::new(seed),
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.inner.set_enabled(enabled);
    }

    fn load_model(&mut self, path: String) -> PyResult<()> {
        self.inner
            .load_model(&path)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn clear_model(&mut self) {
        self.inner.clear_model();
    }

    /// One of "disabled", "enabled_no_model", "enabled_with_model".
    fn state(&self) -> &'static str {
        match self.inner.state() {
            ControllerState::Disabled => "disabled",
            ControllerState::EnabledNoModel => "enabled_no_model",
            ControllerState::EnabledWithModel => "enabled_with_model",
        }
    }

    /// `(move_x, use_energy)` for a prepared feature vector.
    fn decide_features(&mut self, features: Vec<f32>) -> (i8, bool) {
        let a = self.inner.decide_features(&features);
        (a.move_x, a.use_energy)
    }

    #[pyo3(signature = (level, position, velocity, energy, grounded, target))]
    fn decide(
        &mut self,
        level: Vec<String>,
        position: (f32, f32),
        velocity: (f32, f32),
        energy: f32,
        grounded: bool,
        target: (f32, f32),
    ) -> (i8, bool) {
        let grid = TileGrid::from_rows(&level);
        let state = world_state(position, velocity, energy, grounded, target);
        let a = self.inner.decide(&state, &grid);
        (a.move_x, a.use_energy)
    }
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(version, m)?)?;
    m.add_function(wrap_pyfunction!(extract_features, m)?)?;
    m.add_function(wrap_pyfunction!(train, m)?)?;
    m.add_class::<PyController>()?;
    Ok(())
}
