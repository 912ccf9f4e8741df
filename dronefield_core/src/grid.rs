//! The shared field: a fixed-size grid of cells.
//!
//! Cells are stored row-major; `x` is the column and `y` the row. On the
//! wire every cell is one byte from the alphabet `{' ', 'o', '0'..='9'}`.
//! Bytes outside the alphabet decode to an empty cell, so corruption is
//! repaired locally and never aborts a frame.

use crate::config::{GRID_HEIGHT, GRID_WIDTH};
use crate::error::FleetError;
use serde::{Deserialize, Serialize};

/// Number of bytes of an encoded grid.
pub const GRID_BYTES: usize = GRID_WIDTH * GRID_HEIGHT;

/// A cell coordinate (or a signed offset between two cells).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The grid centre, where every episode starts.
    pub fn centre() -> Self {
        Self::new(GRID_WIDTH as i32 / 2, GRID_HEIGHT as i32 / 2)
    }

    /// Manhattan distance to `other`.
    pub fn manhattan(&self, other: Position) -> u64 {
        (self.x - other.x).unsigned_abs() as u64 + (self.y - other.y).unsigned_abs() as u64
    }

    /// Returns true when the coordinate lies on the grid.
    pub fn in_bounds(&self) -> bool {
        self.x >= 0 && self.y >= 0 && (self.x as usize) < GRID_WIDTH && (self.y as usize) < GRID_HEIGHT
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Content of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Empty,
    Obstacle,
    /// A target labelled with a digit 0-9
    Target(u8),
    /// View-only drone marker; travels as an empty cell
    Drone,
}

impl Cell {
    /// Decodes a wire byte, mapping anything outside the alphabet to `Empty`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'o' => Cell::Obstacle,
            b'0'..=b'9' => Cell::Target(byte - b'0'),
            _ => Cell::Empty,
        }
    }

    /// Encodes the cell as its wire byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Cell::Obstacle => b'o',
            Cell::Target(digit) => b'0' + digit.min(9),
            Cell::Empty | Cell::Drone => b' ',
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, Cell::Target(_))
    }
}

/// The field shared by the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: Vec<Cell>,
}

impl Grid {
    /// Creates an all-empty grid.
    pub fn empty() -> Self {
        Self {
            cells: vec![Cell::Empty; GRID_BYTES],
        }
    }

    /// Decodes (and sanitizes) an encoded grid.
    ///
    /// # Errors
    /// Returns a protocol error when `bytes` is not exactly one grid long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FleetError> {
        if bytes.len() != GRID_BYTES {
            return Err(FleetError::protocol(format!(
                "grid message is {} bytes, expected {}",
                bytes.len(),
                GRID_BYTES
            )));
        }
        Ok(Self {
            cells: bytes.iter().map(|b| Cell::from_byte(*b)).collect(),
        })
    }

    /// Encodes the grid into `buf`, one byte per cell.
    pub fn encode_into(&self, buf: &mut [u8; GRID_BYTES]) {
        for (slot, cell) in buf.iter_mut().zip(&self.cells) {
            *slot = cell.to_byte();
        }
    }

    /// Encodes the grid into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|c| c.to_byte()).collect()
    }

    fn index(pos: Position) -> Option<usize> {
        pos.in_bounds()
            .then(|| pos.y as usize * GRID_WIDTH + pos.x as usize)
    }

    /// Returns the cell at `pos`, or `Empty` off the grid.
    pub fn get(&self, pos: Position) -> Cell {
        Self::index(pos).map(|i| self.cells[i]).unwrap_or(Cell::Empty)
    }

    /// Sets the cell at `pos`; positions off the grid are ignored.
    pub fn set(&mut self, pos: Position, cell: Cell) {
        if let Some(i) = Self::index(pos) {
            self.cells[i] = cell;
        }
    }

    /// Iterates over every non-empty cell with its position.
    pub fn occupied(&self) -> impl Iterator<Item = (Position, Cell)> + '_ {
        self.cells.iter().enumerate().filter_map(|(i, cell)| {
            (*cell != Cell::Empty).then(|| {
                (
                    Position::new((i % GRID_WIDTH) as i32, (i / GRID_WIDTH) as i32),
                    *cell,
                )
            })
        })
    }

    pub fn count_obstacles(&self) -> usize {
        self.cells.iter().filter(|c| **c == Cell::Obstacle).count()
    }

    pub fn count_targets(&self) -> usize {
        self.cells.iter().filter(|c| c.is_target()).count()
    }

    /// Removes every drone marker, leaving a grid fit for the wire.
    pub fn clear_drone(&mut self) {
        for cell in self.cells.iter_mut().filter(|c| **c == Cell::Drone) {
            *cell = Cell::Empty;
        }
    }

    /// Erases every target on the straight segment `from` -> `to`.
    ///
    /// The segment is rasterised with Bresenham's algorithm, both end
    /// points included. Returns the number of targets erased.
    pub fn erase_targets_on_line(&mut self, from: Position, to: Position) -> usize {
        let mut erased = 0;
        let dx = (to.x - from.x).abs();
        let dy = -(to.y - from.y).abs();
        let sx = if from.x < to.x { 1 } else { -1 };
        let sy = if from.y < to.y { 1 } else { -1 };
        let mut err = dx + dy;
        let mut cur = from;

        loop {
            if self.get(cur).is_target() {
                self.set(cur, Cell::Empty);
                erased += 1;
            }
            if cur == to {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                cur.x += sx;
            }
            if e2 <= dx {
                err += dx;
                cur.y += sy;
            }
        }
        erased
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::empty()
    }
}
