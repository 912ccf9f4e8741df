//! Dronefield Core - the pure domain of the drone fleet
//!
//! Everything in this crate is free of process and terminal I/O:
//! 1. **Field**: the shared grid, map generation and the wire protocol
//!    exchanged between fleet members every frame
//! 2. **Navigation**: the artificial potential field and the damped
//!    second-order integrator that moves the drone
//! 3. **Arbitration**: the blackboard state machine that owns the grid,
//!    scores the episode and decides when it ends
//! 4. **Supervision**: the heartbeat policy that probes every worker and
//!    escalates from graceful to forced termination

pub mod blackboard;
pub mod config;
pub mod error;
pub mod grid;
pub mod keys;
pub mod mapgen;
pub mod navigation;
pub mod protocol;
pub mod score;
pub mod supervisor;

// Re-export key types for convenience
pub use blackboard::{Arbiter, ArbiterState, EpisodeSummary, Outcome};
pub use config::{FieldParams, LivenessSource, SupervisorConfig};
pub use error::FleetError;
pub use grid::{Cell, Grid, Position};
pub use keys::{Key, Thrust};
pub use mapgen::MapGenerator;
pub use navigation::NavigationEngine;
pub use protocol::{KinematicMessage, PositionReply, StatusRecord};
pub use score::ScoreKeeper;
pub use supervisor::{EscalationReport, Supervisor};
