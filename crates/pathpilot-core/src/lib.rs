pub mod action;
pub mod analysis;
pub mod codec;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod features;
pub mod geometry;
pub mod grid;
pub mod matrix;
pub mod nn;
pub mod optim;
pub mod raycast;
pub mod recorder;
pub mod training;

pub use action::Action;
pub use config::TrainingConfig;
pub use controller::{ControllerState, InferenceController};
pub use features::{FeatureVector, WorldState, FEATURE_COUNT};
pub use geometry::Vec2;
pub use grid::TileGrid;
pub use nn::{Network, Topology};
pub use raycast::{RayCaster, RayHit};
pub use training::{Episode, Sample, Trainer};
