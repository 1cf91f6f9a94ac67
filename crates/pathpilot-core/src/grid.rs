use crate::geometry::Vec2;

/// Edge length of one tile in world pixels.
pub const TILE: f32 = 15.0;

/// Tile characters that block rays.
pub const OBSTACLE_TILES: [char; 5] = ['1', 'M', 'W', '3', '4'];

pub const SPAWN_TILE: char = 'P';
pub const TARGET_TILE: char = 'T';

/// Level layout as rows of tile characters. Rows may be ragged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileGrid {
    rows: Vec<Vec<char>>,
}

impl TileGrid {
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Self {
        Self {
            rows: rows.iter().map(|r| r.as_ref().chars().collect()).collect(),
        }
    }

    /// Parse a level file: one row per line, trailing whitespace stripped,
    /// blank lines skipped.
    pub fn parse(text: &str) -> Self {
        let rows: Vec<&str> = text
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        Self::from_rows(&rows)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tile at cell `(x, y)`, or `None` outside the grid.
    pub fn cell(&self, x: i64, y: i64) -> Option<char> {
        if x < 0 || y < 0 {
            return None;
        }
        self.rows.get(y as usize)?.get(x as usize).copied()
    }

    /// Whether cell `(x, y)` blocks rays. Cells outside the grid count as obstacles.
    pub fn is_obstacle(&self, x: i64, y: i64) -> bool {
        match self.cell(x, y) {
            Some(c) => OBSTACLE_TILES.contains(&c),
            None => true,
        }
    }

    /// Cell containing world point `p`.
    pub fn cell_at(p: Vec2) -> (i64, i64) {
        ((p.x / TILE).floor() as i64, (p.y / TILE).floor() as i64)
    }

    /// World position (top-left corner) of the first tile matching `tile`.
    pub fn find(&self, tile: char) -> Option<Vec2> {
        self.rows.iter().enumerate().find_map(|(y, row)| {
            row.iter()
                .position(|&c| c == tile)
                .map(|x| Vec2::new(x as f32 * TILE, y as f32 * TILE))
        })
    }

    pub fn spawn(&self) -> Option<Vec2> {
        self.find(SPAWN_TILE)
    }

    pub fn target(&self) -> Option<Vec2> {
        self.find(TARGET_TILE)
    }
}
