use crate::geometry::Vec2;
use crate::grid::TileGrid;
use std::f32::consts::FRAC_PI_2;

/// Longest probe distance in pixels.
pub const MAX_DISTANCE: f32 = 150.0;
/// March increment in pixels.
pub const STEP_SIZE: f32 = 1.0;

/// Density of the on-screen debug scan.
pub const DEBUG_RAYS_PER_QUADRANT: usize = 8;
/// Density of the scan feeding the feature extractor (60 rays total).
pub const PERCEPTION_RAYS_PER_QUADRANT: usize = 15;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub hit_point: Vec2,
    /// Distance to the hit, or `MAX_DISTANCE` when nothing was hit.
    pub distance: f32,
    pub hit: bool,
    /// Unit direction of the ray.
    pub direction: Vec2,
}

/// March-based obstacle scanner. Stateless apart from its two constants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayCaster {
    pub max_distance: f32,
    pub step_size: f32,
}

impl Default for RayCaster {
    fn default() -> Self {
        Self {
            max_distance: MAX_DISTANCE,
            step_size: STEP_SIZE,
        }
    }
}

impl RayCaster {
    /// Cast `4 * rays_per_quadrant` rays from `origin`.
    ///
    /// Rays are evenly spaced inside each quadrant `[qπ/2, (q+1)π/2)`, ordered
    /// quadrant-major then by ascending angle.
    pub fn cast(&self, origin: Vec2, grid: &TileGrid, rays_per_quadrant: usize) -> Vec<RayHit> {
        Self::angles(rays_per_quadrant)
            .into_iter()
            .map(|angle| self.cast_single(origin, Vec2::from_angle(angle), grid))
            .collect()
    }

    /// Angles (radians, in `[0, 2π)`) that `cast` would use.
    pub fn angles(rays_per_quadrant: usize) -> Vec<f32> {
        (0..4 * rays_per_quadrant)
            .map(|k| {
                let (q, i) = (k / rays_per_quadrant, k % rays_per_quadrant);
                q as f32 * FRAC_PI_2 + FRAC_PI_2 * i as f32 / rays_per_quadrant as f32
            })
            .collect()
    }

    pub fn cast_single(&self, origin: Vec2, direction: Vec2, grid: &TileGrid) -> RayHit {
        let miss = RayHit {
            hit_point: origin + direction * self.max_distance,
            distance: self.max_distance,
            hit: false,
            direction,
        };
        if self.step_size <= 0.0 {
            return miss;
        }

        let mut step = 0u32;
        loop {
            let distance = step as f32 * self.step_size;
            if distance >= self.max_distance {
                return miss;
            }
            let point = origin + direction * distance;
            let (cx, cy) = TileGrid::cell_at(point);
            if grid.cell(cx, cy).is_none() {
                return miss;
            }
            if grid.is_obstacle(cx, cy) {
                return RayHit {
                    hit_point: point,
                    distance,
                    hit: true,
                    direction,
                };
            }
            step += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TILE;
    use std::f32::consts::PI;

    fn open_room(size: usize) -> TileGrid {
        let mut rows = Vec::with_capacity(size);
        for y in 0..size {
            let row: String = (0..size)
                .map(|x| {
                    if x == 0 || y == 0 || x == size - 1 || y == size - 1 {
                        '1'
                    } else {
                        '0'
                    }
                })
                .collect();
            rows.push(row);
        }
        TileGrid::from_rows(&rows)
    }

    #[test]
    fn cast_returns_four_rays_per_quadrant_step() {
        let caster = RayCaster::default();
        let grids = [TileGrid::default(), open_room(5), open_room(30)];
        for grid in &grids {
            for rpq in [0, 1, 4, DEBUG_RAYS_PER_QUADRANT, PERCEPTION_RAYS_PER_QUADRANT] {
                let hits = caster.cast(Vec2::new(37.5, 37.5), grid, rpq);
                assert_eq!(hits.len(), 4 * rpq);
                assert!(hits
                    .iter()
                    .all(|h| (0.0..=MAX_DISTANCE).contains(&h.distance)));
            }
        }
    }

    #[test]
    fn adjacent_wall_hit_within_one_step() {
        // Origin at the center of cell (1, 1); wall column at x = 2 starts at 30px.
        let grid = TileGrid::from_rows(&["000", "001", "000"]);
        let origin = Vec2::new(1.5 * TILE, 1.5 * TILE);
        let hits = RayCaster::default().cast(origin, &grid, 4);
        let east = hits[0];
        assert!(east.hit);
        let true_distance = 2.0 * TILE - origin.x;
        assert!((east.distance - true_distance).abs() <= STEP_SIZE);
        assert!((east.direction.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn leaving_the_grid_is_a_miss_at_max_distance() {
        let grid = TileGrid::from_rows(&["000"]);
        let hits = RayCaster::default().cast(Vec2::new(22.5, 7.5), &grid, 2);
        for h in hits {
            assert!(!h.hit);
            assert_eq!(h.distance, MAX_DISTANCE);
        }
    }

    #[test]
    fn rays_ordered_quadrant_major() {
        let angles = RayCaster::angles(3);
        assert_eq!(angles.len(), 12);
        assert!(angles.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(angles[0], 0.0);
        assert!((angles[3] - FRAC_PI_2).abs() < 1e-6);
        assert!((angles[6] - PI).abs() < 1e-6);
    }

    #[test]
    fn open_space_beyond_range_is_a_miss() {
        let grid = open_room(40);
        let center = Vec2::new(20.0 * TILE, 20.0 * TILE);
        let hits = RayCaster::default().cast(center, &grid, 4);
        assert!(hits.iter().all(|h| !h.hit && h.distance == MAX_DISTANCE));
    }

    #[test]
    fn cast_is_deterministic() {
        let grid = open_room(8);
        let caster = RayCaster::default();
        let o = Vec2::new(40.0, 52.0);
        assert_eq!(
            caster.cast(o, &grid, PERCEPTION_RAYS_PER_QUADRANT),
            caster.cast(o, &grid, PERCEPTION_RAYS_PER_QUADRANT)
        );
    }
}
