//! The orchestrator: builds the channel fabric, launches the fleet and the
//! supervisor, then reaps everything.
//!
//! Shutdown order once the blackboard has exited (or the orchestrator is
//! interrupted): graceful signal to the remaining workers, forced kill
//! after the grace period, then the same for the supervisor.

use crate::fabric::ChannelFabric;
use crate::launcher::{LaunchedProcess, Launcher, WorkerOptions, WorkerRole};
use crate::logging::SharedLog;
use dronefield_core::config::LOG_FILE;
use dronefield_core::{FleetError, SupervisorConfig};
use dronefield_env::{ControlSignal, NixProcessControl, ProcessControl};
use serde::Serialize;
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Role name of the supervisor process.
pub const SUPERVISOR: &str = "supervisor";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Binary re-executed for every fleet member
    pub program: PathBuf,
    pub log_path: PathBuf,
    pub workers: WorkerOptions,
    pub supervisor: SupervisorConfig,
    /// How often children are polled for exit
    pub reap_poll: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dronefield"),
            log_path: PathBuf::from(LOG_FILE),
            workers: WorkerOptions::default(),
            supervisor: SupervisorConfig::default(),
            reap_poll: Duration::from_millis(50),
        }
    }
}

/// How one child ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    pub role: String,
    pub pid: i32,
    /// Exit code, when the child exited normally
    pub code: Option<i32>,
    /// Terminating signal, when the child was killed
    pub signal: Option<i32>,
}

impl ExitRecord {
    fn new(process: &LaunchedProcess, status: Option<ExitStatus>) -> Self {
        Self {
            role: process.role().to_string(),
            pid: process.pid().as_raw(),
            code: status.and_then(|s| s.code()),
            signal: status.and_then(|s| s.signal()),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Result of a whole fleet run.
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub seed: u64,
    pub exits: Vec<ExitRecord>,
    /// The orchestrator itself was asked to stop
    pub interrupted: bool,
}

impl FleetReport {
    pub fn exit_of(&self, role: &str) -> Option<&ExitRecord> {
        self.exits.iter().find(|e| e.role == role)
    }

    /// True when the blackboard finished its episode cleanly and the
    /// supervisor never had to step in.
    pub fn success(&self) -> bool {
        let finished = self
            .exit_of(WorkerRole::Blackboard.name())
            .map(ExitRecord::success)
            .unwrap_or(false);
        finished && !self.supervisor_escalated()
    }

    /// True when the supervisor gave up on the fleet.
    pub fn supervisor_escalated(&self) -> bool {
        self.exit_of(SUPERVISOR).map(|e| e.code == Some(1)).unwrap_or(false)
    }
}

struct Tracked {
    process: LaunchedProcess,
    status: Option<ExitStatus>,
}

/// Reaps the orchestrator's own children without ever blocking on one.
pub struct Reaper {
    tracked: Vec<Tracked>,
    primary: Option<String>,
    poll: Duration,
    control: NixProcessControl,
}

impl Reaper {
    pub fn new(processes: Vec<LaunchedProcess>, poll: Duration) -> Self {
        Self {
            tracked: processes
                .into_iter()
                .map(|process| Tracked { process, status: None })
                .collect(),
            primary: None,
            poll,
            control: NixProcessControl::new(),
        }
    }

    /// Ends the watch phase as soon as `role` exits. Without a primary the
    /// watch lasts until every child has exited.
    pub fn with_primary(mut self, role: &str) -> Self {
        self.primary = Some(role.to_string());
        self
    }

    /// Reaps every child that has exited. Returns how many were reaped.
    pub fn poll_once(&mut self) -> usize {
        let mut reaped = 0;
        for tracked in self.tracked.iter_mut().filter(|t| t.status.is_none()) {
            if let Some(status) = tracked.process.try_reap() {
                let record = ExitRecord::new(&tracked.process, Some(status));
                info!(
                    "{} ({}) exited: code={:?} signal={:?}",
                    record.role, record.pid, record.code, record.signal
                );
                tracked.status = Some(status);
                reaped += 1;
            }
        }
        reaped
    }

    /// Number of children not yet reaped.
    pub fn pending(&self) -> usize {
        self.tracked.iter().filter(|t| t.status.is_none()).count()
    }

    fn watch_over(&self) -> bool {
        match &self.primary {
            Some(role) => self
                .tracked
                .iter()
                .any(|t| t.process.role() == role && t.status.is_some()),
            None => self.pending() == 0,
        }
    }

    /// Graceful signal to every pending child matching `select`, forced
    /// kill for whoever is left after `grace`.
    async fn stop<S: Fn(&str) -> bool>(&mut self, select: S, grace: Duration) {
        let pending = |t: &Tracked| t.status.is_none() && select(t.process.role());
        for tracked in self.tracked.iter().filter(|t| pending(t)) {
            debug!("Stopping {} ({})", tracked.process.role(), tracked.process.pid());
            if let Err(e) = self.control.deliver(tracked.process.pid(), ControlSignal::Shutdown) {
                debug!("Shutdown to {} failed: {}", tracked.process.role(), e);
            }
        }

        let deadline = Instant::now() + grace;
        while self.tracked.iter().any(|t| pending(t)) && Instant::now() < deadline {
            tokio::time::sleep(self.poll).await;
            self.poll_once();
        }

        for tracked in self.tracked.iter_mut().filter(|t| pending(t)) {
            warn!("{} ({}) outlived the grace period", tracked.process.role(), tracked.process.pid());
            tracked.status = tracked.process.terminate(Duration::ZERO).await;
        }
    }

    /// Watches the children, then shuts down whatever is left.
    ///
    /// Returns every child's exit and whether `interrupt` fired.
    pub async fn run<F: Future>(mut self, interrupt: F, grace: Duration) -> (Vec<ExitRecord>, bool) {
        tokio::pin!(interrupt);
        let mut interrupted = false;
        loop {
            self.poll_once();
            if self.watch_over() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll) => {}
                _ = &mut interrupt => {
                    warn!("Interrupted, shutting the fleet down");
                    interrupted = true;
                    break;
                }
            }
        }

        self.stop(|role| role != SUPERVISOR, grace).await;
        self.stop(|_| true, grace).await;

        let exits = self
            .tracked
            .iter()
            .map(|t| ExitRecord::new(&t.process, t.status))
            .collect();
        (exits, interrupted)
    }
}

/// Runs one fleet from fabric allocation to the last reap.
pub struct Orchestrator {
    config: FleetConfig,
}

impl Orchestrator {
    pub fn new(config: FleetConfig) -> Self {
        Self { config }
    }

    /// Launches the fleet, sharing `log` with every child, and waits for
    /// it to finish or for `interrupt`.
    pub async fn run<F: Future>(&self, log: &SharedLog, interrupt: F) -> Result<FleetReport, FleetError> {
        let grace = self.config.supervisor.grace;
        let fabric = ChannelFabric::allocate()?;
        let mut launcher = Launcher::new(&self.config.program, log.raw_fd(), self.config.workers.clone());

        for role in WorkerRole::ALL {
            if let Err(e) = launcher.spawn_worker(role, &fabric) {
                error!("Launch failed: {}", e);
                launcher.abort(grace).await;
                return Err(e);
            }
        }
        let pids = launcher.pids();
        if let Err(e) = launcher.spawn_supervisor(&pids, &self.config.supervisor, &fabric) {
            error!("Launch failed: {}", e);
            launcher.abort(grace).await;
            return Err(e);
        }

        // Every child holds its own ends now
        drop(fabric);
        info!("Fleet running: {} processes", launcher.launched().len());

        let reaper = Reaper::new(launcher.into_processes(), self.config.reap_poll)
            .with_primary(WorkerRole::Blackboard.name());
        let (exits, interrupted) = reaper.run(interrupt, grace).await;
        Ok(FleetReport {
            seed: self.config.workers.seed,
            exits,
            interrupted,
        })
    }
}
