//! Map grid and the immutable world definition handed to the engine

use std::collections::BTreeMap;

use super::rules::Rules;
use super::state::TeamId;

/// Classification of one map cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Wall,
    /// Spawn point for a team
    Start(TeamId),
    /// Team flag marker
    Flag(TeamId),
    /// Pre-placed mine
    Mine,
}

/// Terrain construction errors
#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("Terrain dimensions must be non-zero")]
    Empty,

    #[error("Expected {expected} cells for the grid, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Arena of {width}x{height} cannot hold {units} units per team")]
    TooSmall { width: u32, height: u32, units: u32 },
}

/// Rectangular cell grid. Rows are stored top row first; cell `(tx, ty)`
/// counts `ty` upward from the bottom row. Anything outside the grid is wall.
#[derive(Debug, Clone)]
pub struct Terrain {
    cells: Vec<Cell>,
    width: u32,
    height: u32,
    scale: u32,
}

impl Terrain {
    /// Build a terrain from row-major cells (top row first)
    pub fn from_cells(width: u32, height: u32, scale: u32, cells: Vec<Cell>) -> Result<Self, TerrainError> {
        if width == 0 || height == 0 || scale == 0 {
            return Err(TerrainError::Empty);
        }
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(TerrainError::DimensionMismatch {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            cells,
            width,
            height,
            scale,
        })
    }

    /// Open water with no interior features
    pub fn open(width: u32, height: u32, scale: u32) -> Result<Self, TerrainError> {
        let count = width as usize * height as usize;
        Self::from_cells(width, height, scale, vec![Cell::Empty; count])
    }

    /// Walled arena: team 0 starts along the west edge, team 1 along the east
    /// edge, each with a flag behind its line, and a column of mines mid-map.
    pub fn arena(width: u32, height: u32, scale: u32, units_per_team: u32) -> Result<Self, TerrainError> {
        if width < 10 || height < units_per_team.saturating_mul(2).saturating_add(3) {
            return Err(TerrainError::TooSmall {
                width,
                height,
                units: units_per_team,
            });
        }

        let mut terrain = Self::open(width, height, scale)?;
        let (w, h) = (i64::from(width), i64::from(height));

        for tx in 0..w {
            terrain.set(tx, 0, Cell::Wall);
            terrain.set(tx, h - 1, Cell::Wall);
        }
        for ty in 0..h {
            terrain.set(0, ty, Cell::Wall);
            terrain.set(w - 1, ty, Cell::Wall);
        }

        for unit in 0..i64::from(units_per_team) {
            let ty = 2 + unit * 2;
            terrain.set(3, ty, Cell::Start(0));
            terrain.set(w - 4, ty, Cell::Start(1));
        }
        terrain.set(1, h / 2, Cell::Flag(0));
        terrain.set(w - 2, h / 2, Cell::Flag(1));

        let mid = w / 2;
        for ty in (2..h - 2).step_by(4) {
            terrain.set(mid, ty, Cell::Mine);
        }

        Ok(terrain)
    }

    fn set(&mut self, tx: i64, ty: i64, cell: Cell) {
        if let Some(idx) = self.index(tx, ty) {
            self.cells[idx] = cell;
        }
    }

    /// Replace one cell, ignoring coordinates outside the grid
    pub fn with_cell(mut self, tx: i64, ty: i64, cell: Cell) -> Self {
        self.set(tx, ty, cell);
        self
    }

    fn index(&self, tx: i64, ty: i64) -> Option<usize> {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        if tx < 0 || tx >= w || ty < 0 || ty >= h {
            return None;
        }
        Some((tx + (h - 1 - ty) * w) as usize)
    }

    pub fn cell_at(&self, tx: i64, ty: i64) -> Cell {
        self.index(tx, ty).map_or(Cell::Wall, |idx| self.cells[idx])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// World units per cell
    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// World coordinates of the centre of a cell
    pub fn cell_center(&self, tx: i64, ty: i64) -> (i64, i64) {
        let s = i64::from(self.scale);
        (tx * s + s / 2, ty * s + s / 2)
    }

    /// Cell containing a world position
    pub fn world_to_cell(&self, x: i64, y: i64) -> (i64, i64) {
        let s = i64::from(self.scale);
        (x.div_euclid(s), y.div_euclid(s))
    }

    /// Centre of the cell containing a world position
    pub fn snap_to_cell(&self, x: i64, y: i64) -> (i64, i64) {
        let (tx, ty) = self.world_to_cell(x, y);
        self.cell_center(tx, ty)
    }

    /// True for walls and anything off the map
    pub fn is_blocked(&self, x: i64, y: i64) -> bool {
        let (tx, ty) = self.world_to_cell(x, y);
        self.cell_at(tx, ty) == Cell::Wall
    }

    /// Cells in deterministic order: bottom row first, west to east
    fn cells_bottom_up(&self) -> impl Iterator<Item = (i64, i64, Cell)> + '_ {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        (0..h).flat_map(move |ty| (0..w).map(move |tx| (tx, ty, self.cell_at(tx, ty))))
    }
}

/// Immutable world definition: terrain, rule constants, and the feature
/// positions extracted from the terrain. Shared read-only by the engine.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub terrain: Terrain,
    pub rules: Rules,
    pub start_locations: BTreeMap<TeamId, Vec<(i64, i64)>>,
    pub flags: BTreeMap<TeamId, Vec<(i64, i64)>>,
    pub mines: Vec<(i64, i64)>,
}

impl GameConfig {
    /// Extract start, flag and mine positions (cell centres) from the terrain
    pub fn new(terrain: Terrain, rules: Rules) -> Self {
        let mut start_locations: BTreeMap<TeamId, Vec<(i64, i64)>> = BTreeMap::new();
        let mut flags: BTreeMap<TeamId, Vec<(i64, i64)>> = BTreeMap::new();
        let mut mines = Vec::new();

        for (tx, ty, cell) in terrain.cells_bottom_up() {
            let center = terrain.cell_center(tx, ty);
            match cell {
                Cell::Start(team) => start_locations.entry(team).or_default().push(center),
                Cell::Flag(team) => flags.entry(team).or_default().push(center),
                Cell::Mine => mines.push(center),
                Cell::Empty | Cell::Wall => {}
            }
        }

        Self {
            terrain,
            rules,
            start_locations,
            flags,
            mines,
        }
    }

    /// Number of start locations a team can spawn on
    pub fn start_count(&self, team: TeamId) -> usize {
        self.start_locations.get(&team).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_the_grid_reads_as_wall() {
        let terrain = Terrain::open(4, 3, 100).unwrap();
        assert_eq!(terrain.cell_at(0, 0), Cell::Empty);
        assert_eq!(terrain.cell_at(-1, 0), Cell::Wall);
        assert_eq!(terrain.cell_at(4, 0), Cell::Wall);
        assert_eq!(terrain.cell_at(0, 3), Cell::Wall);
        assert!(terrain.is_blocked(-1, 50));
        assert!(!terrain.is_blocked(0, 0));
    }

    #[test]
    fn rows_count_upward_from_the_bottom() {
        // Top row first: the wall sits in the top-left corner.
        let mut cells = vec![Cell::Empty; 4];
        cells[0] = Cell::Wall;
        let terrain = Terrain::from_cells(2, 2, 10, cells).unwrap();
        assert_eq!(terrain.cell_at(0, 1), Cell::Wall);
        assert_eq!(terrain.cell_at(0, 0), Cell::Empty);
    }

    #[test]
    fn mismatched_cell_count_is_rejected() {
        let result = Terrain::from_cells(3, 3, 10, vec![Cell::Empty; 8]);
        assert!(matches!(
            result,
            Err(TerrainError::DimensionMismatch { expected: 9, actual: 8 })
        ));
    }

    #[test]
    fn snapping_uses_cell_centres_for_negative_coordinates() {
        let terrain = Terrain::open(4, 4, 100).unwrap();
        assert_eq!(terrain.snap_to_cell(130, 270), (150, 250));
        assert_eq!(terrain.world_to_cell(-1, -1), (-1, -1));
    }

    #[test]
    fn arena_exposes_starts_flags_and_mines() {
        let terrain = Terrain::arena(16, 12, 1000, 2).unwrap();
        let config = GameConfig::new(terrain, Rules::default());

        assert_eq!(config.start_locations[&0].len(), 2);
        assert_eq!(config.start_locations[&1].len(), 2);
        assert_eq!(config.flags[&0].len(), 1);
        assert!(!config.mines.is_empty());
        assert_eq!(config.start_locations[&0][0], (3500, 2500));
        assert_eq!(config.start_count(1), 2);
        assert_eq!(config.start_count(7), 0);
    }

    #[test]
    fn arena_rejects_undersized_maps() {
        assert!(matches!(
            Terrain::arena(6, 6, 100, 1),
            Err(TerrainError::TooSmall { .. })
        ));
    }
}
