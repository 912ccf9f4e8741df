//! Main loops of the five worker roles.
//!
//! Every loop selects on the process's [`ControlChannel`]: probes are
//! answered by logging, a shutdown makes the worker drop its endpoints and
//! return.

use crate::control::{guarded, idle_until_shutdown, Control, ControlChannel, Guarded};
use crate::fabric::ChannelId;
use crate::launcher::{LaunchedProcess, WorkerOptions, WorkerRole, WorkerSpec};
use crate::links::{self, DynamicsLink, PipeKeySource, PipeMapSource, PipeNavigationLink};
use crate::logging::{LogActivity, LogContext};
use crate::status::{ensure_fifo, FifoStatusSink};
use crate::terminal::{self, KeyReader};
use anyhow::Context;
use dronefield_core::blackboard::ArbiterLinks;
use dronefield_core::config::{OBSTACLE_COUNT, TARGET_COUNT};
use dronefield_core::mapgen::{OBSTACLE_SALT, TARGET_SALT};
use dronefield_core::{
    Arbiter, Grid, Key, MapGenerator, NavigationEngine, Outcome, PositionReply, Supervisor, SupervisorConfig,
};
use dronefield_env::{NixProcessControl, TokioContext, WorkerPid};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// How long the final screen stays up after a win or a loss.
const FINAL_SCREEN: Duration = Duration::from_secs(2);

/// Grace period given to the inspector command on exit.
const INSPECTOR_GRACE: Duration = Duration::from_secs(1);

/// Runs the role `spec` was built for. Returns the blackboard's outcome,
/// or `Outcome::Shutdown` for every other role.
pub async fn run_worker(
    mut spec: WorkerSpec,
    options: &WorkerOptions,
    control: &mut ControlChannel,
    log: &LogContext,
) -> anyhow::Result<Outcome> {
    info!(parent: log.span(), "Worker started (seed {})", options.seed);
    let outcome = match spec.role() {
        WorkerRole::Input => run_input(&mut spec, control, log).await.map(|_| Outcome::Shutdown),
        WorkerRole::Obstacles => run_obstacles(&mut spec, options.seed, control, log)
            .await
            .map(|_| Outcome::Shutdown),
        WorkerRole::Targets => run_targets(&mut spec, options.seed, control, log)
            .await
            .map(|_| Outcome::Shutdown),
        WorkerRole::Dynamics => run_dynamics(&mut spec, control, log).await.map(|_| Outcome::Shutdown),
        WorkerRole::Blackboard => run_blackboard(&mut spec, options, control, log).await,
    }?;
    info!(parent: log.span(), "Worker exiting");
    Ok(outcome)
}

async fn next_key(reader: &mut Option<KeyReader>) -> Option<Key> {
    match reader {
        Some(reader) => reader.next_key().await,
        None => std::future::pending().await,
    }
}

/// Forwards key-map presses, one byte each, to the blackboard.
async fn run_input(spec: &mut WorkerSpec, control: &mut ControlChannel, log: &LogContext) -> anyhow::Result<()> {
    let mut tx = links::sender(spec.take(ChannelId::InputToArbiter)?)?;
    let mut reader = match KeyReader::open() {
        Ok(reader) => Some(reader),
        Err(e) => {
            warn!(parent: log.span(), "No keyboard available: {}", e);
            None
        }
    };

    loop {
        tokio::select! {
            key = next_key(&mut reader) => match key {
                Some(key) => tx
                    .write_all(&[key.as_byte()])
                    .await
                    .context("forwarding key to the blackboard")?,
                None => {
                    warn!(parent: log.span(), "Keyboard closed");
                    reader = None;
                }
            },
            event = control.recv() => match event {
                Control::Probe => log.active(),
                Control::Shutdown => break,
            },
        }
    }
    Ok(())
}

/// Generates the obstacle field once, then stays resident.
async fn run_obstacles(
    spec: &mut WorkerSpec,
    seed: u64,
    control: &mut ControlChannel,
    log: &LogContext,
) -> anyhow::Result<()> {
    let mut tx = links::sender(spec.take(ChannelId::ObstaclesToArbiter)?)?;
    let mut grid = Grid::empty();
    let placed = MapGenerator::for_role(seed, OBSTACLE_SALT).place_obstacles(&mut grid, OBSTACLE_COUNT);
    info!(parent: log.span(), "Placed {} obstacles", placed);

    match guarded(links::write_grid(&mut tx, &grid), control, log).await {
        Guarded::Completed(result) => result.context("sending obstacles")?,
        Guarded::Shutdown => return Ok(()),
    }
    idle_until_shutdown(control, log).await;
    Ok(())
}

/// Adds targets to the field the blackboard hands over, then stays resident.
async fn run_targets(
    spec: &mut WorkerSpec,
    seed: u64,
    control: &mut ControlChannel,
    log: &LogContext,
) -> anyhow::Result<()> {
    let mut rx = links::receiver(spec.take(ChannelId::ArbiterToTargets)?)?;
    let mut tx = links::sender(spec.take(ChannelId::TargetsToArbiter)?)?;

    let mut grid = match guarded(links::read_grid(&mut rx), control, log).await {
        Guarded::Completed(result) => match result.context("reading obstacle field")? {
            Some(grid) => grid,
            None => {
                info!(parent: log.span(), "Blackboard closed the channel before starting");
                return Ok(());
            }
        },
        Guarded::Shutdown => return Ok(()),
    };

    let placed = MapGenerator::for_role(seed, TARGET_SALT).place_targets(&mut grid, TARGET_COUNT);
    info!(parent: log.span(), "Placed {} targets", placed);
    match guarded(links::write_grid(&mut tx, &grid), control, log).await {
        Guarded::Completed(result) => result.context("sending targets")?,
        Guarded::Shutdown => return Ok(()),
    }
    idle_until_shutdown(control, log).await;
    Ok(())
}

/// Answers one position per frame until the blackboard closes the channel.
async fn run_dynamics(spec: &mut WorkerSpec, control: &mut ControlChannel, log: &LogContext) -> anyhow::Result<()> {
    let rx = links::receiver(spec.take(ChannelId::ArbiterToDynamics)?)?;
    let tx = links::sender(spec.take(ChannelId::DynamicsToArbiter)?)?;
    let mut link = DynamicsLink::new(rx, tx);
    let engine = NavigationEngine::default();
    let mut frames: u64 = 0;

    loop {
        let (grid, msg) = match guarded(link.next_frame(), control, log).await {
            Guarded::Completed(frame) => match frame.context("reading frame")? {
                Some(frame) => frame,
                None => {
                    info!(parent: log.span(), "Blackboard closed the channel after {} frames", frames);
                    break;
                }
            },
            Guarded::Shutdown => break,
        };
        let next = engine.step(&grid, &msg);
        link.reply(&PositionReply::new(next)).await.context("sending position")?;
        frames += 1;
    }
    Ok(())
}

/// Launches the inspector command in its own process group.
fn spawn_inspector(cmd: &str, log: &LogContext) -> Option<LaunchedProcess> {
    match Command::new("sh").arg("-c").arg(cmd).process_group(0).spawn() {
        Ok(child) => {
            info!(parent: log.span(), "Inspector started as pid {}", child.id());
            Some(LaunchedProcess::new("inspector", child))
        }
        Err(e) => {
            warn!(parent: log.span(), "Cannot start inspector '{}': {}", cmd, e);
            None
        }
    }
}

/// Signals the inspector's whole group and reaps it.
async fn stop_inspector(mut inspector: LaunchedProcess) {
    let group = nix::unistd::Pid::from_raw(inspector.pid().as_raw());
    if let Err(e) = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGTERM) {
        debug!("Inspector group already gone: {}", e);
    }
    let status = inspector.terminate(INSPECTOR_GRACE).await;
    info!("Inspector exited: {:?}", status);
}

/// Runs one episode of the state arbiter.
async fn run_blackboard(
    spec: &mut WorkerSpec,
    options: &WorkerOptions,
    control: &mut ControlChannel,
    log: &LogContext,
) -> anyhow::Result<Outcome> {
    let keys = links::receiver(spec.take(ChannelId::InputToArbiter)?)?;
    let obstacles = links::receiver(spec.take(ChannelId::ObstaclesToArbiter)?)?;
    let to_targets = links::sender(spec.take(ChannelId::ArbiterToTargets)?)?;
    let from_targets = links::receiver(spec.take(ChannelId::TargetsToArbiter)?)?;
    let to_dynamics = links::sender(spec.take(ChannelId::ArbiterToDynamics)?)?;
    let from_dynamics = links::receiver(spec.take(ChannelId::DynamicsToArbiter)?)?;

    if let Err(e) = ensure_fifo(&options.status_fifo) {
        warn!(parent: log.span(), "Status telemetry disabled: {}", e);
    }
    let inspector = options.inspector_cmd.as_deref().and_then(|cmd| spawn_inspector(cmd, log));

    let arbiter_links = ArbiterLinks {
        maps: Box::new(PipeMapSource::new(obstacles, to_targets, from_targets)),
        keys: Box::new(PipeKeySource::new(keys)),
        navigation: Box::new(PipeNavigationLink::new(to_dynamics, from_dynamics)),
        status: Box::new(FifoStatusSink::new(&options.status_fifo)),
        view: terminal::open_view(),
    };
    let mut arbiter = Arbiter::new(TokioContext::shared(), arbiter_links);

    let episode = guarded(arbiter.run(), control, log).await;
    let outcome = match episode {
        Guarded::Completed(outcome) => outcome,
        Guarded::Shutdown => {
            arbiter.shutdown();
            Outcome::Shutdown
        }
    };

    if matches!(outcome, Outcome::Win | Outcome::Lose) {
        // Leave the final screen up unless asked to stop
        let _ = guarded(tokio::time::sleep(FINAL_SCREEN), control, log).await;
    }

    // Releases every channel end and restores the terminal
    let summary = arbiter.into_summary();
    match serde_json::to_string(&summary) {
        Ok(json) => info!(parent: log.span(), "Episode summary: {}", json),
        Err(e) => warn!(parent: log.span(), "Cannot encode summary: {}", e),
    }

    if let Some(inspector) = inspector {
        stop_inspector(inspector).await;
    }
    Ok(outcome)
}

/// Supervises `pids` until the fleet stops responding or a shutdown
/// arrives. Returns true when the supervisor terminated the fleet.
pub async fn run_supervisor(
    pids: &[WorkerPid],
    config: SupervisorConfig,
    seed: u64,
    activity: Option<LogActivity>,
    control: &mut ControlChannel,
    log: &LogContext,
) -> bool {
    let ctx = Arc::new(TokioContext::with_seed(seed));
    let mut supervisor = Supervisor::new(ctx, NixProcessControl::new(), pids, config);
    if let Some(activity) = activity {
        supervisor = supervisor.with_activity_source(Box::new(activity));
    }

    let watch = guarded(supervisor.run(), control, log).await;
    match watch {
        Guarded::Completed(report) => {
            info!(
                parent: log.span(),
                "Escalated after {} cycles: stale={:?} killed={:?}",
                supervisor.cycles(),
                report.stale,
                report.killed
            );
            true
        }
        Guarded::Shutdown => {
            info!(parent: log.span(), "Supervisor stopped after {} cycles", supervisor.cycles());
            false
        }
    }
}
