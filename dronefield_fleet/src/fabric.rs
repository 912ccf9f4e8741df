//! The channel fabric - every unidirectional pipe of the fleet
//!
//! All six channels are created by the orchestrator before the first fork,
//! so every worker can inherit exactly the ends it needs:
//!
//! ```text
//!  input -----InputToArbiter-----> blackboard
//!  obstacles --ObstaclesToArbiter-> blackboard
//!  blackboard --ArbiterToTargets--> targets --TargetsToArbiter--> blackboard
//!  blackboard --ArbiterToDynamics-> dynamics --DynamicsToArbiter-> blackboard
//! ```
//!
//! Allocation is all-or-nothing: if any pipe fails, the ones already
//! created are closed before the error is returned.

use dronefield_core::FleetError;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// One channel of the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    InputToArbiter,
    ObstaclesToArbiter,
    ArbiterToTargets,
    TargetsToArbiter,
    ArbiterToDynamics,
    DynamicsToArbiter,
}

impl ChannelId {
    /// Every channel, in allocation order.
    pub const ALL: [ChannelId; 6] = [
        ChannelId::InputToArbiter,
        ChannelId::ObstaclesToArbiter,
        ChannelId::ArbiterToTargets,
        ChannelId::TargetsToArbiter,
        ChannelId::ArbiterToDynamics,
        ChannelId::DynamicsToArbiter,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelId::InputToArbiter => "input->blackboard",
            ChannelId::ObstaclesToArbiter => "obstacles->blackboard",
            ChannelId::ArbiterToTargets => "blackboard->targets",
            ChannelId::TargetsToArbiter => "targets->blackboard",
            ChannelId::ArbiterToDynamics => "blackboard->dynamics",
            ChannelId::DynamicsToArbiter => "dynamics->blackboard",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which end of a channel a process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Owner of both ends of every channel until the workers are launched.
#[derive(Debug)]
pub struct ChannelFabric {
    /// (read end, write end), indexed by `ChannelId`
    ends: Vec<(OwnedFd, OwnedFd)>,
}

impl ChannelFabric {
    /// Creates every channel with `pipe(2)`.
    pub fn allocate() -> Result<Self, FleetError> {
        Self::allocate_with(|_| nix::unistd::pipe().map_err(io::Error::from))
    }

    /// Creates every channel with a custom pipe constructor.
    ///
    /// On failure, every pipe created so far is closed.
    pub fn allocate_with<F>(mut make: F) -> Result<Self, FleetError>
    where
        F: FnMut(ChannelId) -> io::Result<(OwnedFd, OwnedFd)>,
    {
        let mut ends = Vec::with_capacity(ChannelId::ALL.len());
        for id in ChannelId::ALL {
            match make(id) {
                Ok(pair) => ends.push(pair),
                Err(e) => {
                    // Dropping the owned ends closes them
                    drop(ends);
                    return Err(FleetError::setup(format!("cannot create channel {}: {}", id, e)));
                }
            }
        }
        Ok(Self { ends })
    }

    /// Descriptor number of one end of a channel.
    pub fn raw(&self, id: ChannelId, direction: Direction) -> RawFd {
        let (read, write) = &self.ends[id.index()];
        match direction {
            Direction::Read => read.as_raw_fd(),
            Direction::Write => write.as_raw_fd(),
        }
    }

    /// Every descriptor the fabric owns.
    pub fn all_raw(&self) -> Vec<RawFd> {
        self.ends
            .iter()
            .flat_map(|(r, w)| [r.as_raw_fd(), w.as_raw_fd()])
            .collect()
    }
}
