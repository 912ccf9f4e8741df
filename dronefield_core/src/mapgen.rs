//! Seeded map generation for the obstacles and targets workers.

use crate::config::{FieldParams, GRID_HEIGHT, GRID_WIDTH};
use crate::grid::{Cell, Grid, Position};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Salt mixed into the episode seed for the obstacles worker.
pub const OBSTACLE_SALT: u64 = 0x6f62;

/// Salt mixed into the episode seed for the targets worker.
pub const TARGET_SALT: u64 = 0x7467;

/// Places obstacles and targets on free cells.
///
/// The same seed always yields the same field. Nothing is ever placed on
/// the grid border or on the centre cell where the drone starts.
pub struct MapGenerator {
    seed: u64,
    rng: ChaCha8Rng,
}

impl MapGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Derives an independent generator for one worker from the episode seed.
    pub fn for_role(episode_seed: u64, salt: u64) -> Self {
        Self::new(episode_seed.wrapping_mul(0x9e3779b97f4a7c15) ^ salt)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Free cells with every coordinate in `[lo, hi_x] x [lo, hi_y]`.
    fn candidates(grid: &Grid, lo: i32, hi_x: i32, hi_y: i32) -> Vec<Position> {
        let centre = Position::centre();
        (lo..=hi_y)
            .flat_map(|y| (lo..=hi_x).map(move |x| Position::new(x, y)))
            .filter(|pos| *pos != centre && grid.get(*pos) == Cell::Empty)
            .collect()
    }

    /// Places up to `count` obstacles on free interior cells.
    ///
    /// Returns how many were placed.
    pub fn place_obstacles(&mut self, grid: &mut Grid, count: usize) -> usize {
        let free = Self::candidates(grid, 1, GRID_WIDTH as i32 - 2, GRID_HEIGHT as i32 - 2);
        let chosen: Vec<Position> = free.choose_multiple(&mut self.rng, count).copied().collect();
        for pos in &chosen {
            grid.set(*pos, Cell::Obstacle);
        }
        chosen.len()
    }

    /// Places up to `count` targets labelled '9', '8', ... on free cells the
    /// drone can reach (at least `margin` cells from every edge).
    ///
    /// Returns how many were placed.
    pub fn place_targets(&mut self, grid: &mut Grid, count: usize) -> usize {
        let margin = FieldParams::default().margin;
        let free = Self::candidates(
            grid,
            margin,
            GRID_WIDTH as i32 - 1 - margin,
            GRID_HEIGHT as i32 - 1 - margin,
        );
        let chosen: Vec<Position> = free
            .choose_multiple(&mut self.rng, count.min(10))
            .copied()
            .collect();
        for (i, pos) in chosen.iter().enumerate() {
            grid.set(*pos, Cell::Target(9 - i as u8));
        }
        chosen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OBSTACLE_COUNT, TARGET_COUNT};

    fn field(seed: u64) -> Grid {
        let mut grid = Grid::empty();
        MapGenerator::for_role(seed, OBSTACLE_SALT).place_obstacles(&mut grid, OBSTACLE_COUNT);
        MapGenerator::for_role(seed, TARGET_SALT).place_targets(&mut grid, TARGET_COUNT);
        grid
    }

    #[test]
    fn test_counts_and_labels() {
        let grid = field(42);
        assert_eq!(grid.count_obstacles(), OBSTACLE_COUNT);
        assert_eq!(grid.count_targets(), TARGET_COUNT);

        let mut digits: Vec<u8> = grid
            .occupied()
            .filter_map(|(_, cell)| match cell {
                Cell::Target(d) => Some(d),
                _ => None,
            })
            .collect();
        digits.sort();
        assert_eq!(digits, (1..=9).collect::<Vec<u8>>());
    }

    #[test]
    fn test_border_and_centre_stay_free() {
        for seed in 0..20 {
            let grid = field(seed);
            assert_eq!(grid.get(Position::centre()), Cell::Empty);
            for (pos, _) in grid.occupied() {
                assert!(pos.x > 0 && pos.y > 0);
                assert!(pos.x < GRID_WIDTH as i32 - 1 && pos.y < GRID_HEIGHT as i32 - 1);
            }
        }
    }

    #[test]
    fn test_same_seed_same_field() {
        assert_eq!(field(7), field(7));
        assert_ne!(field(7), field(8));
    }

    #[test]
    fn test_targets_never_overwrite_obstacles() {
        let mut grid = Grid::empty();
        let placed = MapGenerator::new(1).place_obstacles(&mut grid, 500);
        assert_eq!(placed, 500);
        MapGenerator::new(2).place_targets(&mut grid, TARGET_COUNT);
        assert_eq!(grid.count_obstacles(), 500);
        assert_eq!(grid.count_targets(), TARGET_COUNT);
    }
}
