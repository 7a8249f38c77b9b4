use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{
    ARTILLERY_COUNT, ARTILLERY_NEUTRAL_GARRISON, GENERAL_START_TROOPS, GRID_SIZE,
    MOUNTAIN_DENSITY, OUTPOST_COUNT, OUTPOST_NEUTRAL_GARRISON,
};
use crate::types::{Cell, Coord, PlayerColor, Terrain, Unit};

/// The authoritative board for one room. A fixed-size square of cells stored
/// row-major.
#[derive(Clone, Debug)]
pub struct Grid {
    size: i32,
    cells: Vec<Cell>,
}

impl Grid {
    /// Procedurally generates terrain and neutral structures. Generals are
    /// placed later, one per joining player.
    pub fn generate(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut grid = Self {
            size: GRID_SIZE,
            cells: vec![Cell::default(); (GRID_SIZE * GRID_SIZE) as usize],
        };

        for cell in &mut grid.cells {
            if rng.random_bool(MOUNTAIN_DENSITY) {
                cell.terrain = Terrain::Mountain;
            }
        }

        grid.scatter_structures(
            &mut rng,
            Terrain::Outpost,
            OUTPOST_COUNT,
            OUTPOST_NEUTRAL_GARRISON,
        );
        grid.scatter_structures(
            &mut rng,
            Terrain::Artillery,
            ARTILLERY_COUNT,
            ARTILLERY_NEUTRAL_GARRISON,
        );
        grid
    }

    fn scatter_structures(
        &mut self,
        rng: &mut StdRng,
        terrain: Terrain,
        count: usize,
        garrison: (u32, u32),
    ) {
        let mut placed = 0;
        let mut attempts = 0;
        while placed < count && attempts < 1_000 {
            attempts += 1;
            let at = Coord::new(
                rng.random_range(0..self.size),
                rng.random_range(0..self.size),
            );
            let troops = rng.random_range(garrison.0..=garrison.1);
            let cell = self.cell_mut(at);
            if cell.terrain != Terrain::Empty {
                continue;
            }
            cell.terrain = terrain;
            cell.troops = troops;
            placed += 1;
        }
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn in_bounds(&self, at: Coord) -> bool {
        at.x >= 0 && at.x < self.size && at.y >= 0 && at.y < self.size
    }

    fn index(&self, at: Coord) -> usize {
        (at.y * self.size + at.x) as usize
    }

    pub fn get(&self, at: Coord) -> Option<&Cell> {
        self.in_bounds(at).then(|| &self.cells[self.index(at)])
    }

    pub fn get_mut(&mut self, at: Coord) -> Option<&mut Cell> {
        if self.in_bounds(at) {
            let index = self.index(at);
            Some(&mut self.cells[index])
        } else {
            None
        }
    }

    fn cell_mut(&mut self, at: Coord) -> &mut Cell {
        let index = self.index(at);
        &mut self.cells[index]
    }

    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        let size = self.size;
        (0..size).flat_map(move |y| (0..size).map(move |x| Coord::new(x, y)))
    }

    pub fn neighbors(&self, at: Coord) -> impl Iterator<Item = Coord> + '_ {
        [(0, -1), (0, 1), (-1, 0), (1, 0)]
            .into_iter()
            .map(move |(dx, dy)| Coord::new(at.x + dx, at.y + dy))
            .filter(|coord| self.in_bounds(*coord))
    }

    /// Drops a fresh General for `color` on an empty cell far from the other
    /// Generals and clears the mountains immediately around it so the player
    /// is never boxed in.
    pub fn place_general(&mut self, color: PlayerColor, bonus: u32, rng: &mut StdRng) -> Coord {
        let generals: Vec<Coord> = self
            .coords()
            .filter(|at| self.cells[self.index(*at)].unit == Unit::General)
            .collect();

        let mut best: Option<(i32, Coord)> = None;
        for at in self.coords() {
            let cell = &self.cells[self.index(at)];
            if cell.terrain != Terrain::Empty || cell.owner.is_some() {
                continue;
            }
            let spread = generals
                .iter()
                .map(|general| at.manhattan(*general))
                .min()
                .unwrap_or(2 * GRID_SIZE);
            // Random jitter keeps repeated placements from stacking along one
            // edge while preserving the max-spread preference.
            let score = spread.saturating_mul(4) + rng.random_range(0..4);
            if best.map(|(top, _)| score > top).unwrap_or(true) {
                best = Some((score, at));
            }
        }

        let at = best.map(|(_, at)| at).unwrap_or(Coord::new(0, 0));
        for dy in -1..=1 {
            for dx in -1..=1 {
                let around = Coord::new(at.x + dx, at.y + dy);
                if let Some(cell) = self.get_mut(around) {
                    if cell.terrain == Terrain::Mountain {
                        cell.terrain = Terrain::Empty;
                    }
                }
            }
        }

        let cell = self.cell_mut(at);
        cell.terrain = Terrain::Empty;
        cell.owner = Some(color);
        cell.troops = GENERAL_START_TROOPS + bonus;
        cell.unit = Unit::General;
        at
    }

    pub fn general_coord(&self, color: PlayerColor) -> Option<Coord> {
        self.coords().find(|at| {
            let cell = &self.cells[self.index(*at)];
            cell.unit == Unit::General && cell.owner == Some(color)
        })
    }

    pub fn owned_count(&self, color: PlayerColor) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.owner == Some(color))
            .count()
    }

    /// Full territorial absorption after a General capture.
    pub fn transfer_territory(&mut self, loser: PlayerColor, winner: PlayerColor) {
        for cell in &mut self.cells {
            if cell.owner == Some(loser) {
                cell.owner = Some(winner);
            }
        }
    }

    /// Decay to neutral: cells keep their garrisons but lose ownership, and
    /// the color's General marker is removed.
    pub fn release_territory(&mut self, color: PlayerColor) {
        for cell in &mut self.cells {
            if cell.owner == Some(color) {
                cell.owner = None;
                if cell.unit == Unit::General {
                    cell.unit = Unit::None;
                }
            }
        }
    }
}
