//! Common types for the Dronefield environment abstraction.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Operating-system process id of a fleet member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerPid(pub i32);

impl WorkerPid {
    /// Returns the raw pid.
    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl From<u32> for WorkerPid {
    fn from(pid: u32) -> Self {
        Self(pid as i32)
    }
}

impl std::fmt::Display for WorkerPid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkerPid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Self(pid)),
            _ => Err(format!("Invalid pid: {}", s)),
        }
    }
}

/// Control signals the fleet exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlSignal {
    /// Liveness probe (SIGUSR1); the receiver only logs that it is active
    Probe,
    /// Graceful shutdown (SIGTERM)
    Shutdown,
    /// Forced termination (SIGKILL)
    Kill,
}

impl ControlSignal {
    /// Returns the conventional signal name.
    pub fn name(&self) -> &'static str {
        match self {
            ControlSignal::Probe => "SIGUSR1",
            ControlSignal::Shutdown => "SIGTERM",
            ControlSignal::Kill => "SIGKILL",
        }
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pid_parse() {
        assert_eq!("1234".parse::<WorkerPid>().unwrap(), WorkerPid(1234));
        assert_eq!(" 7 ".parse::<WorkerPid>().unwrap(), WorkerPid(7));
        assert!("0".parse::<WorkerPid>().is_err());
        assert!("-5".parse::<WorkerPid>().is_err());
        assert!("abc".parse::<WorkerPid>().is_err());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(ControlSignal::Probe.to_string(), "SIGUSR1");
        assert_eq!(ControlSignal::Shutdown.to_string(), "SIGTERM");
        assert_eq!(ControlSignal::Kill.to_string(), "SIGKILL");
    }
}
