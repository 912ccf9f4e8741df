//! Dronefield Fleet - the process layer of the drone fleet
//!
//! One binary plays every part. `dronefield run` is the orchestrator: it
//! allocates the channel fabric, re-executes itself once per worker role
//! and once as the supervisor, then reaps them all.
//!
//! ```text
//!                  +-------------- orchestrator --------------+
//!                  |                                          |
//!   input ---+     |                                          |
//!   obstacles+--> blackboard <--> targets                supervisor
//!            |         ^                                 (probes all)
//!            |         v
//!            |     dynamics
//! ```
//!
//! Each process runs a single-threaded tokio runtime, logs to the shared
//! log and answers SIGUSR1 probes through its [`control::ControlChannel`].

pub mod cli;
pub mod control;
pub mod fabric;
pub mod launcher;
pub mod links;
pub mod logging;
pub mod orchestrator;
pub mod status;
pub mod terminal;
pub mod workers;

pub use control::{Control, ControlChannel};
pub use fabric::{ChannelFabric, ChannelId, Direction};
pub use launcher::{LaunchedProcess, Launcher, WorkerOptions, WorkerRole, WorkerSpec};
pub use logging::{LogContext, SharedLog};
pub use orchestrator::{ExitRecord, FleetConfig, FleetReport, Orchestrator, Reaper};
