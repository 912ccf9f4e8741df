//! The navigation engine - artificial potential field + damped integrator
//!
//! Every frame the drone feels:
//! - a repulsive force from each obstacle within `rep_radius`, directed
//!   from the obstacle towards the drone;
//! - an attractive force from each target within `att_radius`, directed
//!   from the drone towards the target;
//! - the operator's thrust scaled by `thrust_scale`.
//!
//! The net force drives one step of a damped second-order system:
//!
//! ```text
//! x_new = (T^2 * F + (2M + D*T) * x_cur - M * x_prev) / (M + D*T)
//! ```
//!
//! rounded to the nearest cell and clamped `margin` cells inside the grid.
//! The step is a pure function of its inputs: no I/O and no allocation.

use crate::config::{FieldParams, GRID_HEIGHT, GRID_WIDTH};
use crate::grid::{Cell, Grid, Position};
use crate::keys::Thrust;
use crate::protocol::KinematicMessage;
use nalgebra::Vector2;

fn to_vector(pos: Position) -> Vector2<f64> {
    Vector2::new(pos.x as f64, pos.y as f64)
}

/// Stateless per-frame navigation step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationEngine {
    params: FieldParams,
}

impl NavigationEngine {
    pub fn new(params: FieldParams) -> Self {
        Self { params }
    }

    /// Repulsion exerted by an obstacle at `obstacle` on a drone at `drone`.
    pub fn repulsion(&self, drone: Position, obstacle: Position) -> Vector2<f64> {
        let p = &self.params;
        let r = to_vector(drone) - to_vector(obstacle);
        let d = r.norm().max(p.rep_min);
        if d >= p.rep_radius {
            return Vector2::zeros();
        }
        r * (p.k_rep * (1.0 / d - 1.0 / p.rep_radius) / d.powi(3))
    }

    /// Attraction exerted by a target at `target` on a drone at `drone`.
    pub fn attraction(&self, drone: Position, target: Position) -> Vector2<f64> {
        let p = &self.params;
        let s = to_vector(target) - to_vector(drone);
        let d = s.norm().max(p.att_min);
        if d >= p.att_radius {
            return Vector2::zeros();
        }
        s * (p.k_att / d)
    }

    /// Sum of all obstacle and target contributions at `drone`.
    pub fn field_force(&self, grid: &Grid, drone: Position) -> Vector2<f64> {
        grid.occupied()
            .fold(Vector2::zeros(), |force, (pos, cell)| match cell {
                Cell::Obstacle => force + self.repulsion(drone, pos),
                Cell::Target(_) => force + self.attraction(drone, pos),
                Cell::Empty | Cell::Drone => force,
            })
    }

    /// Field force plus the scaled operator thrust.
    pub fn net_force(&self, grid: &Grid, drone: Position, thrust: Thrust) -> Vector2<f64> {
        let scaled = Vector2::new(thrust.x as f64, thrust.y as f64) * self.params.thrust_scale;
        self.field_force(grid, drone) + scaled
    }

    /// One damped second-order integration step, rounded and clamped.
    pub fn integrate(&self, previous: Position, current: Position, force: Vector2<f64>) -> Position {
        let p = &self.params;
        let t = p.timestep;
        let next = (force * (t * t) + to_vector(current) * (2.0 * p.mass + p.damping * t)
            - to_vector(previous) * p.mass)
            / (p.mass + p.damping * t);
        self.clamp(next)
    }

    /// Rounds to the nearest cell, keeping `margin` cells from every edge.
    pub fn clamp(&self, pos: Vector2<f64>) -> Position {
        let margin = self.params.margin as f64;
        let max_x = (GRID_WIDTH as f64) - 1.0 - margin;
        let max_y = (GRID_HEIGHT as f64) - 1.0 - margin;
        let x = if pos.x.is_nan() { margin } else { pos.x.round().clamp(margin, max_x) };
        let y = if pos.y.is_nan() { margin } else { pos.y.round().clamp(margin, max_y) };
        Position::new(x as i32, y as i32)
    }

    /// Computes the next drone position for one frame.
    pub fn step(&self, grid: &Grid, msg: &KinematicMessage) -> Position {
        let force = self.net_force(grid, msg.current, msg.thrust);
        self.integrate(msg.previous, msg.current, force)
    }
}
