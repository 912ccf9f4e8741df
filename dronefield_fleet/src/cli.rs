//! Command-line interface of the `dronefield` binary.
//!
//! `run` is the operator's entry point. `worker` and `supervise` are the
//! re-exec targets used by the orchestrator; their argument layout is
//! produced by [`WorkerOptions`](crate::launcher::WorkerOptions).

use crate::launcher::{WorkerOptions, WorkerRole};
use clap::{Args, Parser, Subcommand};
use dronefield_core::config::{LOG_FILE, STATUS_FIFO};
use dronefield_core::{FleetError, LivenessSource, SupervisorConfig};
use dronefield_env::WorkerPid;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dronefield")]
#[command(about = "Multi-process drone fleet steering through a potential field")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the whole fleet and play one episode
    Run(RunArgs),
    /// Run one fleet worker (launched by `run`)
    Worker(WorkerArgs),
    /// Run the supervisor (launched by `run`)
    Supervise(SuperviseArgs),
    /// Print the blackboard's status records
    Inspect(InspectArgs),
}

/// Supervisor timing, shared by `run` and `supervise`.
#[derive(Args, Debug, Clone)]
pub struct SupervisionArgs {
    /// Interval between probes
    #[arg(long, default_value_t = 1000)]
    pub poll_ms: u64,

    /// Silence after which the fleet is terminated
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Wait between the graceful and the forced signal
    #[arg(long, default_value_t = 1000)]
    pub grace_ms: u64,

    /// Random extra delay added to each interval
    #[arg(long, default_value_t = 0)]
    pub jitter_ms: u64,

    /// Liveness source (probe, log-activity)
    #[arg(long, default_value_t = LivenessSource::Probe)]
    pub source: LivenessSource,
}

impl SupervisionArgs {
    pub fn to_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(self.poll_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            grace: Duration::from_millis(self.grace_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            source: self.source,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Episode seed (0 = derived from the clock)
    #[arg(short, long, default_value_t = 0)]
    pub seed: u64,

    /// Shared log file
    #[arg(long, default_value = LOG_FILE)]
    pub log: PathBuf,

    /// Status FIFO written by the blackboard
    #[arg(long, default_value = STATUS_FIFO)]
    pub status_fifo: PathBuf,

    /// Shell command the blackboard launches to display status records
    #[arg(long)]
    pub inspector_cmd: Option<String>,

    #[command(flatten)]
    pub supervision: SupervisionArgs,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the exit report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value = STATUS_FIFO)]
    pub status_fifo: PathBuf,

    #[arg(long)]
    pub inspector_cmd: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,

    /// input, obstacles, targets, dynamics or blackboard
    pub role: WorkerRole,

    /// Channel descriptors in role order, then the log descriptor
    #[arg(required = true)]
    pub descriptors: Vec<String>,
}

impl WorkerArgs {
    pub fn options(&self) -> WorkerOptions {
        WorkerOptions {
            seed: self.seed,
            status_fifo: self.status_fifo.clone(),
            inspector_cmd: self.inspector_cmd.clone(),
            verbose: self.verbose,
        }
    }
}

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    #[command(flatten)]
    pub supervision: SupervisionArgs,

    /// Seed for the interval jitter
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(short, long)]
    pub verbose: bool,

    /// Monitored pids, then the log descriptor
    #[arg(required = true, num_args = 2..)]
    pub operands: Vec<String>,
}

impl SuperviseArgs {
    /// Splits the operands into the monitored pids and the log descriptor.
    pub fn split(&self) -> Result<(Vec<WorkerPid>, &str), FleetError> {
        let (log, pids) = self
            .operands
            .split_last()
            .ok_or_else(|| FleetError::argument("missing log descriptor"))?;
        if pids.is_empty() {
            return Err(FleetError::argument("no pids to supervise"));
        }
        let pids = pids
            .iter()
            .map(|p| p.parse::<WorkerPid>().map_err(FleetError::argument))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((pids, log.as_str()))
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Status FIFO to read
    #[arg(long, default_value = STATUS_FIFO)]
    pub fifo: PathBuf,
}
