//! Compile-time constants and runtime configuration structs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Grid width in cells.
pub const GRID_WIDTH: usize = 100;

/// Grid height in cells.
pub const GRID_HEIGHT: usize = 100;

/// Arbiter frame rate in Hz.
pub const FRAME_RATE: u32 = 60;

/// Obstacles placed per episode (one per thousand cells).
pub const OBSTACLE_COUNT: usize = GRID_WIDTH * GRID_HEIGHT / 1000;

/// Targets placed per episode, digits '9' down to '1'.
pub const TARGET_COUNT: usize = 9;

/// Score at the start of an episode.
pub const MAX_SCORE: u64 = 500_000_000;

/// Default path of the status FIFO read by the inspector.
pub const STATUS_FIFO: &str = "/tmp/dronefield_inspector";

/// Default path of the shared log file.
pub const LOG_FILE: &str = "logfile.txt";

/// Duration of one arbiter frame; also the bound on every key poll.
pub fn frame_period() -> Duration {
    Duration::from_micros(1_000_000 / FRAME_RATE as u64)
}

/// Physical constants of the potential field and integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldParams {
    /// Drone mass
    pub mass: f64,

    /// Viscous damping coefficient
    pub damping: f64,

    /// Integration step
    pub timestep: f64,

    /// Repulsion gain
    pub k_rep: f64,

    /// Obstacles farther than this exert no force
    pub rep_radius: f64,

    /// Distances below this are clamped up before computing repulsion
    pub rep_min: f64,

    /// Attraction gain
    pub k_att: f64,

    /// Targets farther than this exert no force
    pub att_radius: f64,

    /// Distances below this are clamped up before computing attraction
    pub att_min: f64,

    /// Scale applied to the operator's integer thrust
    pub thrust_scale: f64,

    /// Cells kept free between the drone and the grid edge
    pub margin: i32,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            damping: 1.0,
            timestep: 10.0,
            k_rep: 3.0,
            rep_radius: 6.0,
            rep_min: 4.0,
            k_att: 1.0,
            att_radius: 6.0,
            att_min: 4.0,
            thrust_scale: 0.1,
            margin: 2,
        }
    }
}

/// How the supervisor decides that the fleet is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessSource {
    /// A successfully delivered probe counts as activity
    Probe,
    /// The shared log must have been written since the previous cycle
    LogActivity,
}

impl std::str::FromStr for LivenessSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "probe" => Ok(Self::Probe),
            "log-activity" | "log_activity" | "log" => Ok(Self::LogActivity),
            _ => Err(format!("Unknown liveness source: {}", s)),
        }
    }
}

impl std::fmt::Display for LivenessSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::LogActivity => write!(f, "log-activity"),
        }
    }
}

/// Supervisor timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Pause between two probe cycles (default: 1s)
    pub poll_interval: Duration,

    /// Inactivity after which the fleet is terminated (default: 5s)
    pub timeout: Duration,

    /// Delay between the graceful and the forced signal (default: 1s)
    pub grace: Duration,

    /// Upper bound of the random extra delay added to each cycle (default: none)
    pub jitter: Duration,

    /// Liveness evidence (default: probe delivery)
    pub source: LivenessSource,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            grace: Duration::from_secs(1),
            jitter: Duration::ZERO,
            source: LivenessSource::Probe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(OBSTACLE_COUNT, 10);
        assert_eq!(frame_period(), Duration::from_micros(16_666));
    }

    #[test]
    fn test_supervisor_config_default() {
        let config = SupervisorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.grace, Duration::from_secs(1));
        assert_eq!(config.source, LivenessSource::Probe);
    }

    #[test]
    fn test_liveness_source_parse() {
        assert_eq!("probe".parse::<LivenessSource>().unwrap(), LivenessSource::Probe);
        assert_eq!(
            "log-activity".parse::<LivenessSource>().unwrap(),
            LivenessSource::LogActivity
        );
        assert!("heartbeat".parse::<LivenessSource>().is_err());
    }
}
