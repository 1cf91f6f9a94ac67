use crate::action::Action;
use crate::dataset::{self, DatasetError, RecordedFrame};
use crate::features::WorldState;
use crate::grid::TileGrid;
use crate::raycast::{RayCaster, PERCEPTION_RAYS_PER_QUADRANT};
use crate::training::Episode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_EPISODE_LIMIT: usize = 10_000;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEpisode {
    pub id: u64,
    pub frames: Vec<RecordedFrame>,
    pub success: bool,
    /// Wall-clock length of the run, 0 when the game did not report it.
    pub duration_secs: f32,
    pub average_fps: f32,
}

impl RecordedEpisode {
    /// The frame the episode ended on.
    pub fn terminal_frame(&self) -> Option<&RecordedFrame> {
        self.frames.last()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderStats {
    pub total_episodes: usize,
    pub successful_episodes: usize,
    pub success_rate: f32,
    pub average_steps: f32,
    pub average_duration_secs: f32,
}

/// Collects human play episode by episode.
pub struct EpisodeRecorder {
    episodes: VecDeque<RecordedEpisode>,
    current: Option<RecordedEpisode>,
    /// 0 keeps every episode.
    limit: usize,
    next_id: u64,
    enabled: bool,
    caster: RayCaster,
}

impl Default for EpisodeRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_EPISODE_LIMIT)
    }
}

impl EpisodeRecorder {
    pub fn new(limit: usize) -> Self {
        Self {
            episodes: VecDeque::new(),
            current: None,
            limit,
            next_id: 1,
            enabled: true,
            caster: RayCaster::default(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    /// Begin a new episode, discarding any unfinished one.
    pub fn start_episode(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(stale) = self.current.take() {
            warn!(id = stale.id, frames = stale.frames.len(), "previous episode not ended, discarding");
        }
        let id = self.next_id;
        self.next_id += 1;
        self.current = Some(RecordedEpisode {
            id,
            frames: Vec::new(),
            success: false,
            duration_secs: 0.0,
            average_fps: 0.0,
        });
        debug!(id, "episode started");
    }

    /// Append a frame to the open episode. Returns false when nothing is recording.
    pub fn record(&mut self, frame: RecordedFrame) -> bool {
        if !self.enabled {
            return false;
        }
        match &mut self.current {
            Some(ep) => {
                ep.frames.push(frame);
                true
            }
            None => {
                warn!("frame recorded with no active episode");
                false
            }
        }
    }

    /// Perceive the world and record it with the action the player took.
    pub fn record_world(&mut self, state: &WorldState, grid: &TileGrid, action: Action) -> bool {
        let rays = self
            .caster
            .cast(state.player_center(), grid, PERCEPTION_RAYS_PER_QUADRANT);
        self.record(RecordedFrame::capture(state, &rays, action))
    }

    /// Close the open episode. The oldest episode is dropped once the limit is
    /// exceeded.
    pub fn end_episode(&mut self, success: bool) -> Option<u64> {
        self.end_episode_timed(success, 0.0, 0.0)
    }

    /// `end_episode` with the run's duration and frame rate as measured by the game.
    pub fn end_episode_timed(
        &mut self,
        success: bool,
        duration_secs: f32,
        average_fps: f32,
    ) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let Some(mut ep) = self.current.take() else {
            warn!("end_episode called with no active episode");
            return None;
        };
        ep.success = success;
        ep.duration_secs = duration_secs;
        ep.average_fps = average_fps;
        let id = ep.id;
        info!(
            id,
            success,
            steps = ep.frames.len(),
            duration_secs,
            average_fps,
            "episode ended"
        );
        self.episodes.push_back(ep);
        if self.limit > 0 && self.episodes.len() > self.limit {
            self.episodes.pop_front();
        }
        Some(id)
    }

    pub fn episodes(&self) -> impl Iterator<Item = &RecordedEpisode> {
        self.episodes.iter()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.episodes.clear();
        self.current = None;
    }

    pub fn stats(&self) -> RecorderStats {
        let total = self.episodes.len();
        if total == 0 {
            return RecorderStats::default();
        }
        let successful = self.episodes.iter().filter(|e| e.success).count();
        let steps: usize = self.episodes.iter().map(|e| e.frames.len()).sum();
        let duration: f32 = self.episodes.iter().map(|e| e.duration_secs).sum();
        RecorderStats {
            total_episodes: total,
            successful_episodes: successful,
            success_rate: successful as f32 / total as f32,
            average_steps: steps as f32 / total as f32,
            average_duration_secs: duration / total as f32,
        }
    }

    /// Normalized training episodes.
    pub fn to_episodes(&self) -> Result<Vec<Episode>, DatasetError> {
        self.episodes
            .iter()
            .map(|e| dataset::frames_to_episode(&e.frames, e.success))
            .collect()
    }

    /// Append every stored frame to a CSV file.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<usize, DatasetError> {
        let frames: Vec<RecordedFrame> = self
            .episodes
            .iter()
            .flat_map(|e| e.frames.iter().cloned())
            .collect();
        dataset::append_csv_file(path, &frames)?;
        Ok(frames.len())
    }
}
