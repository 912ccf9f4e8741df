//! The supervisor ("watchdog") policy
//!
//! Every cycle the supervisor sleeps one poll interval (plus optional
//! seeded jitter), probes every monitored pid and refreshes its liveness
//! records. Once any record is older than the timeout it escalates:
//!
//! ```text
//! Monitoring --stale record--> Terminating
//!                                 |-- SIGTERM to every pid
//!                                 |-- wait grace period (capped)
//!                                 |-- SIGKILL to every pid still present
//!                                 `-- report (process exits non-zero)
//! ```
//!
//! The forced signal must go out within `timeout + poll_interval` of the
//! last confirmed activity, so the grace period is cut short when the
//! stale record was detected late in that window.
//!
//! The first probe is deliberately one interval after start so that freshly
//! exec'd workers have installed their probe handling.
//!
//! Note that probe delivery is conflated with liveness: a wedged process
//! whose signal handling still runs is counted as alive.

use crate::config::{LivenessSource, SupervisorConfig};
use dronefield_env::{ControlSignal, EnvError, FleetContext, ProcessControl, WorkerPid};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Reports when the fleet last produced observable activity.
pub trait ActivitySource: Send {
    /// Last modification time of the watched resource, if readable.
    fn last_activity(&self) -> Option<SystemTime>;
}

/// What the supervisor did when it gave up on the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationReport {
    /// Pids whose liveness record had expired
    pub stale: Vec<WorkerPid>,
    /// Oldest liveness record among the stale pids
    pub last_activity: Duration,
    /// When the graceful signal went out
    pub graceful_at: Duration,
    /// When the forced signal went out
    pub forced_at: Duration,
    /// Pids that were still present and received the forced signal
    pub killed: Vec<WorkerPid>,
}

/// Heartbeat supervisor over a fixed set of pids.
pub struct Supervisor<Ctx: FleetContext, Ctl: ProcessControl> {
    ctx: Arc<Ctx>,
    control: Ctl,
    config: SupervisorConfig,

    /// Liveness record: last confirmed activity per pid
    last_active: BTreeMap<WorkerPid, Duration>,

    /// Used by `LivenessSource::LogActivity`
    activity: Option<Box<dyn ActivitySource>>,
    last_mtime: Option<SystemTime>,

    rng: ChaCha8Rng,
    cycles: u64,
}

impl<Ctx: FleetContext, Ctl: ProcessControl> Supervisor<Ctx, Ctl> {
    /// Starts monitoring `pids`; every record begins at the current time.
    pub fn new(ctx: Arc<Ctx>, control: Ctl, pids: &[WorkerPid], config: SupervisorConfig) -> Self {
        let now = ctx.now();
        let rng = ChaCha8Rng::seed_from_u64(ctx.seed() ^ 0x5eed);
        Self {
            ctx,
            control,
            config,
            last_active: pids.iter().map(|pid| (*pid, now)).collect(),
            activity: None,
            last_mtime: None,
            rng,
            cycles: 0,
        }
    }

    /// Supplies the resource watched by `LivenessSource::LogActivity`.
    pub fn with_activity_source(mut self, source: Box<dyn ActivitySource>) -> Self {
        self.last_mtime = source.last_activity();
        self.activity = Some(source);
        self
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn pids(&self) -> Vec<WorkerPid> {
        self.last_active.keys().copied().collect()
    }

    /// Last confirmed activity of `pid`.
    pub fn last_active(&self, pid: WorkerPid) -> Option<Duration> {
        self.last_active.get(&pid).copied()
    }

    fn next_interval(&mut self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.config.poll_interval;
        }
        self.config.poll_interval + Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
    }

    fn probe_all(&mut self, now: Duration, stamp: bool) {
        for (pid, last) in self.last_active.iter_mut() {
            match self.control.deliver(*pid, ControlSignal::Probe) {
                Ok(()) => {
                    if stamp {
                        *last = now;
                    }
                }
                Err(EnvError::ProcessGone(_)) => debug!("Probe to {} failed: process gone", pid),
                Err(e) => warn!("Probe to {} failed: {}", pid, e),
            }
        }
    }

    /// Runs one monitoring cycle.
    ///
    /// Returns the stale pids when the timeout has been exceeded.
    pub async fn cycle(&mut self) -> Option<Vec<WorkerPid>> {
        let interval = self.next_interval();
        self.ctx.sleep(interval).await;
        self.cycles += 1;
        let now = self.ctx.now();

        let log_mtime = match (self.config.source, self.activity.as_ref()) {
            (LivenessSource::LogActivity, Some(source)) => Some(source.last_activity()),
            _ => None,
        };
        match log_mtime {
            Some(mtime) => {
                // Workers log on every probe; the log must move between cycles
                if mtime.is_some() && mtime > self.last_mtime {
                    for last in self.last_active.values_mut() {
                        *last = now;
                    }
                }
                self.last_mtime = mtime.max(self.last_mtime);
                self.probe_all(now, false);
            }
            None => self.probe_all(now, true),
        }

        let stale: Vec<WorkerPid> = self
            .last_active
            .iter()
            .filter(|(_, last)| now.saturating_sub(**last) >= self.config.timeout)
            .map(|(pid, _)| *pid)
            .collect();
        (!stale.is_empty()).then_some(stale)
    }

    /// Terminates every monitored pid: graceful signal, grace period, forced signal.
    pub async fn escalate(&mut self, stale: Vec<WorkerPid>) -> EscalationReport {
        let last_activity = stale
            .iter()
            .filter_map(|pid| self.last_active(*pid))
            .min()
            .unwrap_or_default();
        error!(
            "No response from {:?} since {:.1}s, terminating the fleet",
            stale,
            last_activity.as_secs_f64()
        );

        let graceful_at = self.ctx.now();
        for pid in self.last_active.keys() {
            if let Err(e) = self.control.deliver(*pid, ControlSignal::Shutdown) {
                debug!("Shutdown to {} failed: {}", pid, e);
            }
        }

        let deadline = last_activity + self.config.timeout + self.config.poll_interval;
        let grace = self.config.grace.min(deadline.saturating_sub(graceful_at));
        if grace < self.config.grace {
            debug!("Grace period shortened to {:?}", grace);
        }
        self.ctx.sleep(grace).await;

        let forced_at = self.ctx.now();
        let mut killed = Vec::new();
        for pid in self.last_active.keys() {
            if !self.control.is_present(*pid) {
                continue;
            }
            match self.control.deliver(*pid, ControlSignal::Kill) {
                Ok(()) => killed.push(*pid),
                Err(e) => debug!("Kill to {} failed: {}", pid, e),
            }
        }
        info!("Fleet terminated ({} forced)", killed.len());

        EscalationReport {
            stale,
            last_activity,
            graceful_at,
            forced_at,
            killed,
        }
    }

    /// Monitors until the fleet stops responding, then terminates it.
    pub async fn run(&mut self) -> EscalationReport {
        info!(
            "Supervising {} processes (poll={:?}, timeout={:?}, grace={:?}, source={})",
            self.last_active.len(),
            self.config.poll_interval,
            self.config.timeout,
            self.config.grace,
            self.config.source
        );
        loop {
            if let Some(stale) = self.cycle().await {
                return self.escalate(stale).await;
            }
        }
    }
}
