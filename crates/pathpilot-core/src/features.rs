use crate::geometry::Vec2;
use crate::grid::TileGrid;
use crate::raycast::{RayCaster, RayHit, PERCEPTION_RAYS_PER_QUADRANT};
use std::f32::consts::{PI, SQRT_2};
use std::ops::Range;
use std::{error::Error, fmt};

pub const RAY_COUNT: usize = 4 * PERCEPTION_RAYS_PER_QUADRANT;

/// Fixed 130-feature encoding of one frame.
///
/// Layout (indices):
/// - `0..2`   player position
/// - `2..4`   player velocity
/// - `4`      energy
/// - `5`      grounded flag
/// - `6`      distance to target
/// - `7`      bearing to target
/// - `8..10`  target position
/// - `10..70` ray distances
/// - `70..130` ray hit flags
///
/// The scaling constants below are part of the model file contract: every saved
/// model was trained against exactly this table.
pub const FEATURE_COUNT: usize = 10 + 2 * RAY_COUNT;

pub const MAX_WORLD_DISTANCE: f32 = 1350.0;
pub const MAX_VELOCITY: f32 = 240.832;
pub const MAX_ENERGY: f32 = 150.0;
pub const MAX_RAY_DISTANCE: f32 = 150.0;

/// Offset from the player's top-left corner to its center.
pub const PLAYER_HALF_EXTENT: f32 = 7.5;

pub const POSITION: Range<usize> = 0..2;
pub const VELOCITY: Range<usize> = 2..4;
pub const ENERGY: usize = 4;
pub const GROUNDED: usize = 5;
pub const TARGET_DISTANCE: usize = 6;
pub const TARGET_ANGLE: usize = 7;
pub const TARGET_POSITION: Range<usize> = 8..10;
pub const RAY_DISTANCES: Range<usize> = 10..10 + RAY_COUNT;
pub const RAY_HITS: Range<usize> = 10 + RAY_COUNT..FEATURE_COUNT;

/// Player and target state as reported by the game each tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorldState {
    /// Top-left corner of the player's bounding box.
    pub player_position: Vec2,
    pub player_velocity: Vec2,
    pub energy: f32,
    pub grounded: bool,
    pub target: Vec2,
}

impl WorldState {
    pub fn player_center(&self) -> Vec2 {
        self.player_position + Vec2::new(PLAYER_HALF_EXTENT, PLAYER_HALF_EXTENT)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureError {
    RayCount { expected: usize, actual: usize },
    Length { expected: usize, actual: usize },
    NonFinite { index: usize },
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureError::RayCount { expected, actual } => {
                write!(f, "expected {expected} ray hits, got {actual}")
            }
            FeatureError::Length { expected, actual } => {
                write!(f, "feature vector must have {expected} values, got {actual}")
            }
            FeatureError::NonFinite { index } => {
                write!(f, "feature {index} ({}) is not finite", feature_name(*index))
            }
        }
    }
}

impl Error for FeatureError {}

/// Normalized feature vector. Read-only once built.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector([f32; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }

    /// Wrap values that were already normalized elsewhere.
    pub fn from_normalized(values: &[f32]) -> Result<Self, FeatureError> {
        let arr: [f32; FEATURE_COUNT] =
            values.try_into().map_err(|_| FeatureError::Length {
                expected: FEATURE_COUNT,
                actual: values.len(),
            })?;
        if let Some(index) = arr.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite { index });
        }
        Ok(Self(arr))
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Build the normalized feature vector from raw game quantities.
///
/// `ray_distances` and `ray_hits` are in perception-cast order.
pub fn extract_raw(
    player_position: Vec2,
    player_velocity: Vec2,
    energy: f32,
    grounded: bool,
    target: Vec2,
    ray_distances: &[f32],
    ray_hits: &[bool],
) -> Result<FeatureVector, FeatureError> {
    for len in [ray_distances.len(), ray_hits.len()] {
        if len != RAY_COUNT {
            return Err(FeatureError::RayCount {
                expected: RAY_COUNT,
                actual: len,
            });
        }
    }

    let distance = player_position.distance(target);
    let angle = player_position.angle_to(target);

    let mut f = [0.0f32; FEATURE_COUNT];
    f[0] = player_position.x / MAX_WORLD_DISTANCE;
    f[1] = player_position.y / MAX_WORLD_DISTANCE;
    f[2] = player_velocity.x / MAX_VELOCITY;
    f[3] = player_velocity.y / MAX_VELOCITY;
    f[ENERGY] = energy / MAX_ENERGY;
    f[GROUNDED] = if grounded { 1.0 } else { 0.0 };
    f[TARGET_DISTANCE] = (distance / (MAX_WORLD_DISTANCE * SQRT_2)).min(1.0);
    f[TARGET_ANGLE] = angle / PI;
    f[8] = target.x / MAX_WORLD_DISTANCE;
    f[9] = target.y / MAX_WORLD_DISTANCE;
    for (slot, d) in f[RAY_DISTANCES].iter_mut().zip(ray_distances) {
        *slot = (d / MAX_RAY_DISTANCE).min(1.0);
    }
    for (slot, &h) in f[RAY_HITS].iter_mut().zip(ray_hits) {
        *slot = if h { 1.0 } else { 0.0 };
    }

    if let Some(index) = f.iter().position(|v| !v.is_finite()) {
        return Err(FeatureError::NonFinite { index });
    }
    Ok(FeatureVector(f))
}

/// Build the feature vector from a perception cast.
pub fn extract(
    player_position: Vec2,
    player_velocity: Vec2,
    energy: f32,
    grounded: bool,
    target: Vec2,
    rays: &[RayHit],
) -> Result<FeatureVector, FeatureError> {
    let distances: Vec<f32> = rays.iter().map(|r| r.distance).collect();
    let hits: Vec<bool> = rays.iter().map(|r| r.hit).collect();
    extract_raw(
        player_position,
        player_velocity,
        energy,
        grounded,
        target,
        &distances,
        &hits,
    )
}

/// Cast the perception rays from the player center and encode the frame.
pub fn extract_from_world(
    state: &WorldState,
    grid: &TileGrid,
    caster: &RayCaster,
) -> Result<FeatureVector, FeatureError> {
    let rays = caster.cast(state.player_center(), grid, PERCEPTION_RAYS_PER_QUADRANT);
    extract(
        state.player_position,
        state.player_velocity,
        state.energy,
        state.grounded,
        state.target,
        &rays,
    )
}

/// Inclusive range every normalized feature lies in when the raw inputs are
/// inside the world (positions in `[0, 1350]`, speed within `MAX_VELOCITY`,
/// energy within `MAX_ENERGY`).
pub fn feature_bounds(index: usize) -> (f32, f32) {
    match index {
        i if VELOCITY.contains(&i) || i == TARGET_ANGLE => (-1.0, 1.0),
        _ => (0.0, 1.0),
    }
}

/// Human-readable name of a feature slot.
pub fn feature_name(index: usize) -> String {
    match index {
        0 => "pos_x".into(),
        1 => "pos_y".into(),
        2 => "vel_x".into(),
        3 => "vel_y".into(),
        ENERGY => "energy".into(),
        GROUNDED => "is_grounded".into(),
        TARGET_DISTANCE => "dist_target".into(),
        TARGET_ANGLE => "angle_target".into(),
        8 => "target_x".into(),
        9 => "target_y".into(),
        i if RAY_DISTANCES.contains(&i) => format!("ray_dist_{}", i - RAY_DISTANCES.start),
        i if RAY_HITS.contains(&i) => format!("ray_hit_{}", i - RAY_HITS.start),
        i => format!("feature_{i}"),
    }
}
