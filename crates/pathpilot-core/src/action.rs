use rand::Rng;
use serde::{Deserialize, Serialize};

/// Raw output above which (below the negative of which) the agent moves.
pub const MOVE_THRESHOLD: f32 = 0.33;
/// Raw output above which energy is used.
pub const ENERGY_THRESHOLD: f32 = 0.5;

/// One tick of agent input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// -1 left, 0 none, 1 right.
    pub move_x: i8,
    pub use_energy: bool,
}

impl Action {
    pub const NONE: Action = Action {
        move_x: 0,
        use_energy: false,
    };

    /// Clamps `move_x` into `{-1, 0, 1}`.
    pub fn new(move_x: i8, use_energy: bool) -> Self {
        Self {
            move_x: move_x.signum(),
            use_energy,
        }
    }

    /// Action a human is giving: opposing horizontal keys cancel out, and
    /// energy is only used while some remains.
    pub fn from_input(left: bool, right: bool, fly: bool, energy: f32) -> Self {
        let move_x = match (left, right) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        Self {
            move_x,
            use_energy: fly && energy > 0.0,
        }
    }

    /// Map raw network outputs to an action. Thresholds are strict:
    /// `0.33` stays idle, `0.34` moves right.
    pub fn discretize(raw: [f32; 2]) -> Self {
        let move_x = if raw[0] > MOVE_THRESHOLD {
            1
        } else if raw[0] < -MOVE_THRESHOLD {
            -1
        } else {
            0
        };
        Self {
            move_x,
            use_energy: raw[1] > ENERGY_THRESHOLD,
        }
    }

    /// Uniform over the six possible actions.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            move_x: rng.random_range(-1..=1),
            use_energy: rng.random_bool(0.5),
        }
    }

    /// Regression target used when training on this action.
    pub fn to_target(self) -> [f32; 2] {
        [self.move_x as f32, if self.use_energy { 1.0 } else { 0.0 }]
    }

    /// Neither moving nor using energy.
    pub fn is_idle(self) -> bool {
        self == Self::NONE
    }
}
