//! Episode scoring.
//!
//! The score starts at `MAX_SCORE` and every frame loses
//! `elapsed_secs * 10 + distance * 5 + obstacles / (3000 * (consumed + 1))`,
//! where `distance` is the cumulative Manhattan distance travelled and
//! `consumed` the number of targets collected so far. It never drops
//! below zero.

use crate::config::MAX_SCORE;
use crate::grid::Position;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tracks score, distance travelled and targets consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreKeeper {
    score: u64,
    distance: u64,
    obstacles: u64,
    initial_targets: u64,
    consumed: u64,
}

impl ScoreKeeper {
    /// Starts an episode with the given field composition.
    pub fn new(obstacles: usize, targets: usize) -> Self {
        Self::with_initial_score(MAX_SCORE, obstacles, targets)
    }

    pub fn with_initial_score(score: u64, obstacles: usize, targets: usize) -> Self {
        Self {
            score,
            distance: 0,
            obstacles: obstacles as u64,
            initial_targets: targets as u64,
            consumed: 0,
        }
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn distance(&self) -> u64 {
        self.distance
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Penalty for one frame, given the current totals.
    pub fn penalty(&self, elapsed: Duration) -> u64 {
        let time = elapsed.as_secs().saturating_mul(10);
        let travel = self.distance.saturating_mul(5);
        let clutter = self.obstacles / (3000 * (self.consumed + 1));
        time.saturating_add(travel).saturating_add(clutter)
    }

    /// Records one frame's move and returns the updated score.
    pub fn frame(&mut self, from: Position, to: Position, remaining_targets: usize, elapsed: Duration) -> u64 {
        self.distance = self.distance.saturating_add(from.manhattan(to));
        self.consumed = self.initial_targets.saturating_sub(remaining_targets as u64);
        self.score = self.score.saturating_sub(self.penalty(elapsed));
        self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_frame_costs_nothing_at_start() {
        let mut keeper = ScoreKeeper::new(10, 9);
        let p = Position::centre();
        assert_eq!(keeper.frame(p, p, 9, Duration::ZERO), MAX_SCORE);
    }

    #[test]
    fn test_penalty_accumulates_distance_and_time() {
        let mut keeper = ScoreKeeper::new(10, 9);
        keeper.frame(Position::new(50, 50), Position::new(52, 49), 9, Duration::from_secs(2));
        // 2s * 10 + 3 cells * 5
        assert_eq!(keeper.score(), MAX_SCORE - 35);
        assert_eq!(keeper.distance(), 3);

        keeper.frame(Position::new(52, 49), Position::new(52, 50), 7, Duration::from_secs(2));
        assert_eq!(keeper.consumed(), 2);
        assert_eq!(keeper.score(), MAX_SCORE - 35 - (20 + 4 * 5));
    }

    #[test]
    fn test_score_floors_at_zero() {
        let mut keeper = ScoreKeeper::with_initial_score(12, 10, 9);
        let score = keeper.frame(Position::new(10, 10), Position::new(20, 20), 9, Duration::ZERO);
        assert_eq!(score, 0);
    }

    #[test]
    fn test_clutter_term_with_no_targets() {
        // No division by zero when nothing was placed or consumed
        let keeper = ScoreKeeper::with_initial_score(100, 9000, 0);
        assert_eq!(keeper.penalty(Duration::ZERO), 3);
    }
}
